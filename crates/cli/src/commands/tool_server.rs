//! `concierge tool-server`: Serve a tool registry over stdio.
//!
//! Stdout is the protocol channel; all logging goes to stderr.

use std::time::Duration;

use clap::ValueEnum;
use concierge_config::{OPERATION_TIMEOUT_ENV, TimeoutConfig};
use concierge_mcp::ToolServer;
use concierge_tools::{GuildApi, SearchEndpoints, discord_registry, http, search_registry};
use tracing::info;

use super::CmdResult;

const DEFAULT_DISCORD_API_URL: &str = "https://discord.com/api/v10";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ToolServerKind {
    /// google_search, weather_search, wikipedia_search
    Search,
    /// get_server_info, list_channels, list_roles, list_members
    Discord,
}

pub async fn run(kind: ToolServerKind) -> CmdResult {
    let server = build(kind, |key| std::env::var(key).ok())?;
    info!(server = %server.info().name, "Tool server listening on stdio");
    server.serve_stdio().await?;
    Ok(())
}

/// Per-operation bound set by the launching relay, or the default.
fn operation_timeout(env: &impl Fn(&str) -> Option<String>) -> Duration {
    env(OPERATION_TIMEOUT_ENV)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
        .unwrap_or_else(|| TimeoutConfig::default().operation())
}

/// Build the server for `kind`, reading Discord credentials and the operation
/// timeout through `env`.
pub fn build(kind: ToolServerKind, env: impl Fn(&str) -> Option<String>) -> CmdResult<ToolServer> {
    let operation_timeout = operation_timeout(&env);
    info!(timeout_ms = operation_timeout.as_millis() as u64, "Operation timeout");
    let server = match kind {
        ToolServerKind::Search => ToolServer::new(
            "concierge-search",
            search_registry(&SearchEndpoints::default(), operation_timeout),
        ),
        ToolServerKind::Discord => {
            let var = |key: &str| env(key).filter(|v| !v.trim().is_empty());
            let token = var("DISCORD_TOKEN").ok_or("DISCORD_TOKEN is not set")?;
            let guild = var("DISCORD_GUILD_ID").ok_or("DISCORD_GUILD_ID is not set")?;
            let api_url = var("DISCORD_API_URL").unwrap_or_else(|| DEFAULT_DISCORD_API_URL.into());
            let api = GuildApi::new(http::client(http::LOOKUP_TIMEOUT), api_url, token, guild);
            ToolServer::new("concierge-discord", discord_registry(api, operation_timeout))
        }
    };
    Ok(server)
}
