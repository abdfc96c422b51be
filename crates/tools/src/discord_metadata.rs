//! Discord metadata operations: read-only facts about one guild.
//!
//! Backs the `discord-metadata` tool server. Every operation performs a single
//! Discord REST call authenticated with the bot token.

use std::sync::Arc;

use async_trait::async_trait;
use concierge_core::error::ToolError;
use concierge_core::tool::{Tool, ToolOutput};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::http;

/// Connection settings for the guild being described.
#[derive(Clone)]
pub struct GuildApi {
    client: reqwest::Client,
    api_url: String,
    token: String,
    guild_id: String,
}

impl std::fmt::Debug for GuildApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuildApi")
            .field("api_url", &self.api_url)
            .field("token", &"[REDACTED]")
            .field("guild_id", &self.guild_id)
            .finish()
    }
}

impl GuildApi {
    pub fn new(
        client: reqwest::Client,
        api_url: impl Into<String>,
        token: impl Into<String>,
        guild_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            token: token.into(),
            guild_id: guild_id.into(),
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        tool: &str,
        path: &[&str],
        query: &[(&str, String)],
    ) -> Result<T, ToolError> {
        let segments = ["guilds", self.guild_id.as_str()]
            .into_iter()
            .chain(path.iter().copied());
        let url = http::join_segments(&self.api_url, segments)?;
        debug!(tool = %tool, url = %url, "Discord REST request");

        let resp = self
            .client
            .get(url)
            .header("Authorization", format!("Bot {}", self.token))
            .query(query)
            .send()
            .await
            .map_err(|e| http::request_failed(tool, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ToolError::ExecutionFailed {
                tool_name: tool.to_string(),
                reason: format!("Discord API returned {status}: {body}"),
            });
        }
        resp.json().await.map_err(|e| http::request_failed(tool, e))
    }
}

/// Run `op`, turning failures into an error text result.
fn report(tool: &str, result: Result<String, ToolError>) -> ToolOutput {
    match result {
        Ok(text) => ToolOutput::text(text),
        Err(e) => {
            warn!(tool = %tool, error = %e, "Discord metadata lookup failed");
            ToolOutput::error(format!("Discord情報取得エラー: {e}"))
        }
    }
}

fn no_params() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

// ── get_server_info ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Guild {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    owner_id: Option<String>,
    #[serde(default)]
    approximate_member_count: Option<u64>,
    #[serde(default)]
    approximate_presence_count: Option<u64>,
    #[serde(default)]
    premium_subscription_count: Option<u64>,
}

pub struct ServerInfoTool {
    api: Arc<GuildApi>,
}

impl ServerInfoTool {
    pub fn new(api: Arc<GuildApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for ServerInfoTool {
    fn name(&self) -> &str {
        "get_server_info"
    }

    fn description(&self) -> &str {
        "Discordサーバーの基本情報（名前、メンバー数など）を取得する"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        no_params()
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let result = self
            .api
            .get::<Guild>(self.name(), &[], &[("with_counts", "true".into())])
            .await
            .map(|g| {
                let mut lines = vec![format!("サーバー名: {}", g.name), format!("ID: {}", g.id)];
                if let Some(d) = g.description.filter(|d| !d.is_empty()) {
                    lines.push(format!("説明: {d}"));
                }
                if let Some(owner) = g.owner_id {
                    lines.push(format!("オーナーID: {owner}"));
                }
                if let Some(n) = g.approximate_member_count {
                    lines.push(format!("メンバー数: {n}"));
                }
                if let Some(n) = g.approximate_presence_count {
                    lines.push(format!("オンライン: {n}"));
                }
                if let Some(n) = g.premium_subscription_count {
                    lines.push(format!("ブースト数: {n}"));
                }
                lines.join("\n")
            });
        Ok(report(self.name(), result))
    }
}

// ── list_channels ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GuildChannel {
    name: String,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    position: i64,
}

fn channel_kind(kind: u8) -> &'static str {
    match kind {
        0 => "テキスト",
        2 => "ボイス",
        4 => "カテゴリ",
        5 => "アナウンス",
        13 => "ステージ",
        15 => "フォーラム",
        _ => "その他",
    }
}

pub struct ListChannelsTool {
    api: Arc<GuildApi>,
}

impl ListChannelsTool {
    pub fn new(api: Arc<GuildApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for ListChannelsTool {
    fn name(&self) -> &str {
        "list_channels"
    }

    fn description(&self) -> &str {
        "Discordサーバーのチャンネル一覧を取得する"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        no_params()
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let result = self
            .api
            .get::<Vec<GuildChannel>>(self.name(), &["channels"], &[])
            .await
            .map(|mut channels| {
                channels.sort_by_key(|c| c.position);
                let mut lines = vec![format!("チャンネル数: {}", channels.len())];
                lines.extend(
                    channels
                        .iter()
                        .map(|c| format!("- {} ({})", c.name, channel_kind(c.kind))),
                );
                lines.join("\n")
            });
        Ok(report(self.name(), result))
    }
}

// ── list_roles ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Role {
    name: String,
    #[serde(default)]
    position: i64,
    #[serde(default)]
    managed: bool,
}

pub struct ListRolesTool {
    api: Arc<GuildApi>,
}

impl ListRolesTool {
    pub fn new(api: Arc<GuildApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for ListRolesTool {
    fn name(&self) -> &str {
        "list_roles"
    }

    fn description(&self) -> &str {
        "Discordサーバーのロール一覧を取得する"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        no_params()
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let result = self
            .api
            .get::<Vec<Role>>(self.name(), &["roles"], &[])
            .await
            .map(|mut roles| {
                // Highest role first, as Discord displays them.
                roles.sort_by_key(|r| std::cmp::Reverse(r.position));
                let mut lines = vec![format!("ロール数: {}", roles.len())];
                lines.extend(roles.iter().map(|r| {
                    if r.managed {
                        format!("- {} (連携)", r.name)
                    } else {
                        format!("- {}", r.name)
                    }
                }));
                lines.join("\n")
            });
        Ok(report(self.name(), result))
    }
}

// ── list_members ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Member {
    user: Option<User>,
    #[serde(default)]
    nick: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    username: String,
    #[serde(default)]
    global_name: Option<String>,
    #[serde(default)]
    bot: bool,
}

impl Member {
    fn display(&self) -> Option<String> {
        let user = self.user.as_ref()?;
        let shown = self
            .nick
            .as_deref()
            .or(user.global_name.as_deref())
            .unwrap_or(&user.username);
        let mut line = if shown == user.username {
            format!("- {shown}")
        } else {
            format!("- {shown} (@{})", user.username)
        };
        if user.bot {
            line.push_str(" [BOT]");
        }
        Some(line)
    }
}

pub struct ListMembersTool {
    api: Arc<GuildApi>,
}

impl ListMembersTool {
    pub fn new(api: Arc<GuildApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for ListMembersTool {
    fn name(&self) -> &str {
        "list_members"
    }

    fn description(&self) -> &str {
        "Discordサーバーのメンバー一覧を取得する"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "limit": {
                    "type": "integer",
                    "description": "取得するメンバー数（デフォルト: 50、最大: 1000）",
                    "default": 50
                }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let limit = arguments["limit"].as_u64().unwrap_or(50).clamp(1, 1000);
        let result = self
            .api
            .get::<Vec<Member>>(self.name(), &["members"], &[("limit", limit.to_string())])
            .await
            .map(|members| {
                let mut lines = vec![format!("取得したメンバー数: {}", members.len())];
                lines.extend(members.iter().filter_map(Member::display));
                lines.join("\n")
            });
        Ok(report(self.name(), result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn api(server: &mockito::Server) -> Arc<GuildApi> {
        Arc::new(GuildApi::new(
            http::client(Duration::from_secs(5)),
            server.url(),
            "test-token",
            "722",
        ))
    }

    #[tokio::test]
    async fn server_info_uses_bot_auth_and_counts() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/guilds/722")
            .match_query(mockito::Matcher::UrlEncoded("with_counts".into(), "true".into()))
            .match_header("authorization", "Bot test-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"722","name":"もくもく会","approximate_member_count":42}"#)
            .create_async()
            .await;

        let output = ServerInfoTool::new(api(&server))
            .execute(serde_json::json!({}))
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(!output.is_error);
        assert!(output.text.contains("サーバー名: もくもく会"));
        assert!(output.text.contains("メンバー数: 42"));
    }

    #[tokio::test]
    async fn channels_are_sorted_by_position() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/guilds/722/channels")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[{"name":"雑談","type":0,"position":2},{"name":"お知らせ","type":5,"position":0},{"name":"作業通話","type":2,"position":1}]"#,
            )
            .create_async()
            .await;

        let output = ListChannelsTool::new(api(&server))
            .execute(serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(
            output.text,
            "チャンネル数: 3\n- お知らせ (アナウンス)\n- 作業通話 (ボイス)\n- 雑談 (テキスト)"
        );
    }

    #[tokio::test]
    async fn roles_highest_first() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/guilds/722/roles")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[{"name":"@everyone","position":0},{"name":"管理者","position":3},{"name":"Concierge","position":2,"managed":true}]"#,
            )
            .create_async()
            .await;

        let output = ListRolesTool::new(api(&server))
            .execute(serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(
            output.text,
            "ロール数: 3\n- 管理者\n- Concierge (連携)\n- @everyone"
        );
    }

    #[tokio::test]
    async fn members_pass_limit_and_prefer_nick() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/guilds/722/members")
            .match_query(mockito::Matcher::UrlEncoded("limit".into(), "2".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[{"user":{"username":"taro"},"nick":"たろう"},{"user":{"username":"concierge","bot":true}}]"#,
            )
            .create_async()
            .await;

        let output = ListMembersTool::new(api(&server))
            .execute(serde_json::json!({"limit": 2}))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(
            output.text,
            "取得したメンバー数: 2\n- たろう (@taro)\n- concierge [BOT]"
        );
    }

    #[tokio::test]
    async fn api_errors_become_error_text() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(403)
            .with_body(r#"{"message":"Missing Access","code":50001}"#)
            .create_async()
            .await;

        let output = ListRolesTool::new(api(&server))
            .execute(serde_json::json!({}))
            .await
            .unwrap();
        assert!(output.is_error);
        assert!(output.text.starts_with("Discord情報取得エラー:"));
        assert!(output.text.contains("403"));
    }

    #[test]
    fn debug_hides_token() {
        let api = GuildApi::new(reqwest::Client::new(), "https://discord.com/api/v10", "secret", "1");
        assert!(!format!("{api:?}").contains("secret"));
    }
}
