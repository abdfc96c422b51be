pub mod chat;
pub mod classify;
pub mod img;
pub mod relay;
pub mod tool_server;
pub mod tools;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use concierge_config::AppConfig;
use concierge_core::provider::Provider;
use concierge_providers::GeminiProvider;

pub type CmdResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Load configuration from `path`, or the default location.
pub fn load_config(path: Option<&Path>) -> CmdResult<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_with(path),
        None => AppConfig::load(),
    };
    Ok(config.map_err(|e| format!("Failed to load config: {e}"))?)
}

/// The Gemini backend. Fails with setup instructions when no key is configured.
pub fn build_provider(config: &AppConfig) -> CmdResult<Arc<dyn Provider>> {
    let Some(api_key) = config.gemini_api_key.clone().filter(|k| !k.is_empty()) else {
        eprintln!();
        eprintln!("  ERROR: No Gemini API key configured!");
        eprintln!();
        eprintln!("  Set the environment variable (or put it in .env):");
        eprintln!("    GEMINI_API_KEY=...");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    };
    Ok(Arc::new(GeminiProvider::new(
        api_key,
        config.api_url.clone(),
        config.timeouts.generation(),
    )))
}

/// The running binary; it serves the default tool servers.
pub fn self_exe() -> CmdResult<PathBuf> {
    Ok(std::env::current_exe().map_err(|e| format!("Cannot locate own executable: {e}"))?)
}
