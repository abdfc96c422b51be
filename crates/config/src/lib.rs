//! Configuration loading, validation, and management for Concierge.
//!
//! Loads configuration from `~/.concierge/config.toml` (after reading a `.env`
//! file from the working directory) with environment variable overrides.
//! Validates all settings at startup.

use concierge_core::capability::{DISCORD_METADATA, SEARCH};
use concierge_core::tool::ToolDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Carries `timeouts.operation_ms` to a tool server launched from this binary.
pub const OPERATION_TIMEOUT_ENV: &str = "CONCIERGE_OPERATION_MS";

/// The root configuration structure.
///
/// Maps directly to `~/.concierge/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Gemini API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gemini_api_key: Option<String>,

    /// Base URL of the generation backend
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Model used for chat replies
    #[serde(default = "default_model")]
    pub model: String,

    /// Model used by the `!img` command
    #[serde(default = "default_image_model")]
    pub image_model: String,

    /// Maximum function-call round trips per generation
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,

    #[serde(default)]
    pub discord: DiscordConfig,

    #[serde(default)]
    pub persona: PersonaConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    /// Explicit tool servers. When empty, defaults are derived (see
    /// [`AppConfig::tool_descriptors`]).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_servers: Vec<ToolServerConfig>,

    /// Executable replacing the default search server launch command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_server_path: Option<String>,

    /// Executable replacing the default Discord metadata server launch command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord_server_path: Option<String>,
}

fn default_api_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}
fn default_model() -> String {
    "gemini-2.0-flash".into()
}
fn default_image_model() -> String {
    "gemini-2.0-flash-preview-image-generation".into()
}
fn default_max_tool_rounds() -> u32 {
    10
}
fn default_true() -> bool {
    true
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("gemini_api_key", &redact(&self.gemini_api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("image_model", &self.image_model)
            .field("max_tool_rounds", &self.max_tool_rounds)
            .field("discord", &self.discord)
            .field("persona", &self.persona)
            .field("timeouts", &self.timeouts)
            .field("audit", &self.audit)
            .field("routing", &self.routing)
            .field("tool_servers", &self.tool_servers)
            .field("search_server_path", &self.search_server_path)
            .field("discord_server_path", &self.discord_server_path)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,

    /// Guild whose metadata the discord-metadata server exposes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,

    /// The bot's own user id, used to detect and strip mentions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_user_id: Option<String>,

    #[serde(default = "default_discord_api_url")]
    pub api_url: String,

    /// Maximum characters per outbound message.
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,

    /// Appended to replies that had to be cut.
    #[serde(default = "default_truncation_marker")]
    pub truncation_marker: String,
}

fn default_discord_api_url() -> String {
    "https://discord.com/api/v10".into()
}
fn default_max_message_len() -> usize {
    2000
}
fn default_truncation_marker() -> String {
    concierge_core::channel::TRUNCATION_MARKER.into()
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("bot_token", &redact(&self.bot_token))
            .field("guild_id", &self.guild_id)
            .field("bot_user_id", &self.bot_user_id)
            .field("api_url", &self.api_url)
            .field("max_message_len", &self.max_message_len)
            .field("truncation_marker", &self.truncation_marker)
            .finish()
    }
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            guild_id: None,
            bot_user_id: None,
            api_url: default_discord_api_url(),
            max_message_len: default_max_message_len(),
            truncation_marker: default_truncation_marker(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Optional text file appended to the system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_path: Option<PathBuf>,
}

fn default_system_prompt() -> String {
    "あなたはDiscordサーバーに存在する親切で有能なAIアシスタントで、名前はコンシェルジュです。\
     Discordの会話で役立つ情報を簡潔に日本語で返答してください。"
        .into()
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            profile_path: None,
        }
    }
}

impl PersonaConfig {
    /// The system prompt with the profile file (if any) appended.
    pub fn resolve(&self) -> String {
        let Some(path) = &self.profile_path else {
            return self.system_prompt.clone();
        };
        match std::fs::read_to_string(path) {
            Ok(profile) if !profile.trim().is_empty() => {
                format!("{}\n\n{}", self.system_prompt, profile.trim())
            }
            Ok(_) => self.system_prompt.clone(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Profile file unreadable, using bare system prompt");
                self.system_prompt.clone()
            }
        }
    }
}

/// Bounded waits, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// `initialize` round trip after spawning a tool server
    #[serde(default = "default_handshake_ms")]
    pub handshake_ms: u64,

    /// Any other request to a tool server (`tools/list`, `tools/call`)
    #[serde(default = "default_request_ms")]
    pub request_ms: u64,

    /// One backend generation call
    #[serde(default = "default_generation_ms")]
    pub generation_ms: u64,

    /// One operation handler inside a tool server
    #[serde(default = "default_operation_ms")]
    pub operation_ms: u64,
}

fn default_handshake_ms() -> u64 {
    10_000
}
fn default_request_ms() -> u64 {
    30_000
}
fn default_generation_ms() -> u64 {
    120_000
}
fn default_operation_ms() -> u64 {
    15_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake_ms: default_handshake_ms(),
            request_ms: default_request_ms(),
            generation_ms: default_generation_ms(),
            operation_ms: default_operation_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn handshake(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }
    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }
    pub fn generation(&self) -> Duration {
        Duration::from_millis(self.generation_ms)
    }
    pub fn operation(&self) -> Duration {
        Duration::from_millis(self.operation_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_audit_path")]
    pub path: PathBuf,
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("log").join("chat_history.txt")
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_audit_path(),
        }
    }
}

/// Keyword tables for capability routing, checked in field order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_discord_keywords")]
    pub discord_keywords: Vec<String>,

    #[serde(default = "default_search_keywords")]
    pub search_keywords: Vec<String>,
}

fn default_discord_keywords() -> Vec<String> {
    ["サーバー情報", "メンバーリスト", "メンバー", "ロール", "チャンネル", "Discord"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_search_keywords() -> Vec<String> {
    ["天気", "検索", "調べて", "Wikipedia", "ググって", "ニュース"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            discord_keywords: default_discord_keywords(),
            search_keywords: default_search_keywords(),
        }
    }
}

/// An explicitly configured tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub required_env: Vec<String>,
}

impl From<&ToolServerConfig> for ToolDescriptor {
    fn from(c: &ToolServerConfig) -> Self {
        ToolDescriptor {
            name: c.name.clone(),
            command: c.command.clone(),
            args: c.args.clone(),
            env: c.env.clone(),
            required_env: c.required_env.clone(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.concierge/config.toml).
    ///
    /// A `.env` file in the working directory is read first. Environment
    /// overrides:
    /// - `GEMINI_API_KEY`, `CONCIERGE_MODEL`
    /// - `DISCORD_TOKEN`, `DISCORD_GUILD_ID`, `DISCORD_BOT_USER_ID`
    /// - `SEARCH_MCP_PATH`, `DISCORD_MCP_PATH`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(&Self::config_dir().join("config.toml"))
    }

    /// Like [`AppConfig::load`] with an explicit config file.
    pub fn load_with(path: &Path) -> Result<Self, ConfigError> {
        if let Ok(env_path) = dotenvy::dotenv() {
            tracing::debug!(path = %env_path.display(), "Loaded .env file");
        }
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, without env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides from `lookup`. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("GEMINI_API_KEY") {
            self.gemini_api_key = Some(key);
        }
        if let Some(model) = get("CONCIERGE_MODEL") {
            self.model = model;
        }
        if let Some(token) = get("DISCORD_TOKEN") {
            self.discord.bot_token = Some(token);
        }
        if let Some(guild) = get("DISCORD_GUILD_ID") {
            self.discord.guild_id = Some(guild);
        }
        if let Some(user) = get("DISCORD_BOT_USER_ID") {
            self.discord.bot_user_id = Some(user);
        }
        if let Some(path) = get("SEARCH_MCP_PATH") {
            self.search_server_path = Some(path);
        }
        if let Some(path) = get("DISCORD_MCP_PATH") {
            self.discord_server_path = Some(path);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".concierge")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discord.max_message_len == 0 {
            return Err(ConfigError::ValidationError(
                "discord.max_message_len must be > 0".into(),
            ));
        }

        let t = &self.timeouts;
        if [t.handshake_ms, t.request_ms, t.generation_ms, t.operation_ms].contains(&0) {
            return Err(ConfigError::ValidationError(
                "timeouts must be > 0 ms".into(),
            ));
        }

        let mut seen = HashSet::new();
        for server in &self.tool_servers {
            if server.name.trim().is_empty() || server.command.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "tool_servers entries need a name and a command".into(),
                ));
            }
            if !seen.insert(server.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate tool server name '{}'",
                    server.name
                )));
            }
        }

        Ok(())
    }

    /// Resolve the tool servers to launch.
    ///
    /// Explicit `[[tool_servers]]` win. Otherwise a `search` server is always
    /// configured, and a `discord-metadata` server is added when a guild id and
    /// bot token are known. `self_exe` is the running binary, which serves both
    /// via `tool-server <kind>`.
    pub fn tool_descriptors(&self, self_exe: &Path) -> Vec<ToolDescriptor> {
        if !self.tool_servers.is_empty() {
            return self.tool_servers.iter().map(ToolDescriptor::from).collect();
        }

        let exe = self_exe.display().to_string();
        let operation_ms = self.timeouts.operation_ms.to_string();
        let launch = |name: &str, kind: &str, override_path: &Option<String>| {
            let descriptor = match override_path {
                Some(path) => ToolDescriptor::new(name, path.clone()),
                None => ToolDescriptor::new(name, exe.clone()).with_args(["tool-server", kind]),
            };
            descriptor.with_env(OPERATION_TIMEOUT_ENV, operation_ms.clone())
        };

        let mut descriptors = vec![launch(SEARCH, "search", &self.search_server_path)];

        if let (Some(token), Some(guild)) = (&self.discord.bot_token, &self.discord.guild_id) {
            descriptors.push(
                launch(DISCORD_METADATA, "discord", &self.discord_server_path)
                    .with_env("DISCORD_TOKEN", token.clone())
                    .with_env("DISCORD_GUILD_ID", guild.clone())
                    .with_env("DISCORD_API_URL", self.discord.api_url.clone())
                    .requiring_env("DISCORD_TOKEN")
                    .requiring_env("DISCORD_GUILD_ID"),
            );
        }

        descriptors
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            image_model: default_image_model(),
            max_tool_rounds: default_max_tool_rounds(),
            discord: DiscordConfig::default(),
            persona: PersonaConfig::default(),
            timeouts: TimeoutConfig::default(),
            audit: AuditConfig::default(),
            routing: RoutingConfig::default(),
            tool_servers: vec![],
            search_server_path: None,
            discord_server_path: None,
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.model, "gemini-2.0-flash");
        assert_eq!(config.discord.max_message_len, 2000);
    }

    #[test]
    fn temperature_key_is_ignored() {
        let config: AppConfig = toml::from_str("temperature = 1.5\nmodel = \"m\"").unwrap();
        assert_eq!(config.model, "m");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_timeouts_rejected() {
        let mut config = AppConfig::default();
        config.timeouts.operation_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.api_url, default_api_url());
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "model = [").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn duplicate_tool_servers_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[tool_servers]]
name = "search"
command = "/usr/bin/a"

[[tool_servers]]
name = "search"
command = "/usr/bin/b"
"#
        )
        .unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        config.apply_env(env_of(&[
            ("GEMINI_API_KEY", "g-key"),
            ("DISCORD_TOKEN", "d-token"),
            ("DISCORD_GUILD_ID", "42"),
            ("CONCIERGE_MODEL", ""),
        ]));
        assert_eq!(config.gemini_api_key.as_deref(), Some("g-key"));
        assert_eq!(config.discord.guild_id.as_deref(), Some("42"));
        // Empty values do not override
        assert_eq!(config.model, "gemini-2.0-flash");
    }

    #[test]
    fn default_descriptors_use_self_exe() {
        let config = AppConfig::default();
        let descriptors = config.tool_descriptors(Path::new("/opt/concierge"));
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].name, SEARCH);
        assert_eq!(descriptors[0].command, "/opt/concierge");
        assert_eq!(descriptors[0].args, vec!["tool-server", "search"]);
        assert_eq!(
            descriptors[0].env.get(OPERATION_TIMEOUT_ENV).map(String::as_str),
            Some("15000")
        );
    }

    #[test]
    fn configured_operation_timeout_reaches_every_default_server() {
        let toml_str = r#"
[timeouts]
operation_ms = 2500

[discord]
bot_token = "t"
guild_id = "722"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        let descriptors = config.tool_descriptors(Path::new("/opt/concierge"));
        assert_eq!(descriptors.len(), 2);
        for descriptor in &descriptors {
            assert_eq!(
                descriptor.env.get(OPERATION_TIMEOUT_ENV).map(String::as_str),
                Some("2500")
            );
        }
    }

    #[test]
    fn discord_descriptor_needs_guild_and_token() {
        let mut config = AppConfig::default();
        config.apply_env(env_of(&[("DISCORD_TOKEN", "t")]));
        assert_eq!(config.tool_descriptors(Path::new("x")).len(), 1);

        config.apply_env(env_of(&[("DISCORD_GUILD_ID", "722"), ("DISCORD_MCP_PATH", "/srv/discord-mcp")]));
        let descriptors = config.tool_descriptors(Path::new("x"));
        assert_eq!(descriptors.len(), 2);
        let discord = &descriptors[1];
        assert_eq!(discord.name, DISCORD_METADATA);
        assert_eq!(discord.command, "/srv/discord-mcp");
        assert!(discord.args.is_empty());
        assert_eq!(discord.env.get("DISCORD_GUILD_ID").map(String::as_str), Some("722"));
        assert!(discord.missing_env().is_empty());
    }

    #[test]
    fn explicit_tool_servers_win() {
        let toml_str = r#"
[[tool_servers]]
name = "search"
command = "python"
args = ["search_mcp_server.py"]
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        let descriptors = config.tool_descriptors(Path::new("/opt/concierge"));
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].command, "python");
        assert_eq!(descriptors[0].args, vec!["search_mcp_server.py"]);
    }

    #[test]
    fn persona_appends_profile() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "趣味: 散歩").unwrap();
        let persona = PersonaConfig {
            system_prompt: "base".into(),
            profile_path: Some(file.path().to_path_buf()),
        };
        assert_eq!(persona.resolve(), "base\n\n趣味: 散歩");

        let missing = PersonaConfig {
            system_prompt: "base".into(),
            profile_path: Some(PathBuf::from("/nonexistent/profile.txt")),
        };
        assert_eq!(missing.resolve(), "base");
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = AppConfig::default();
        config.gemini_api_key = Some("super-secret".into());
        config.discord.bot_token = Some("also-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("also-secret"));
    }
}
