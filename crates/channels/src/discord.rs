//! Discord channel adapter.
//!
//! Inbound messages arrive over the Discord gateway (serenity); each one is
//! filtered (bot authors, messages not mentioning this bot), stripped of the
//! mention marker, and handed to the relay with its first attachment.
//! Outbound replies go through the REST API (`POST /channels/{id}/messages`,
//! multipart when an image is attached).

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use concierge_core::channel::{
    Channel, ChannelId, InboundAttachment, InboundEvent, OutboundReply, truncate_text,
};
use concierge_core::error::ChannelError;
use serenity::all::{Attachment, Context, EventHandler, GatewayIntents, Message, Ready};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Attachments larger than this are not downloaded.
pub const MAX_ATTACHMENT_BYTES: u64 = 20 * 1024 * 1024;

/// Discord channel configuration.
#[derive(Clone)]
pub struct DiscordConfig {
    /// Bot token from the Discord Developer Portal.
    pub bot_token: Option<String>,
    /// The bot's own user id. Resolved at startup when not configured.
    pub bot_user_id: Option<String>,
    pub api_url: String,
    pub max_message_len: usize,
    pub truncation_marker: String,
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("bot_token", &"[REDACTED]")
            .field("bot_user_id", &self.bot_user_id)
            .field("api_url", &self.api_url)
            .field("max_message_len", &self.max_message_len)
            .finish()
    }
}

impl From<&concierge_config::DiscordConfig> for DiscordConfig {
    fn from(c: &concierge_config::DiscordConfig) -> Self {
        Self {
            bot_token: c.bot_token.clone(),
            bot_user_id: c.bot_user_id.clone(),
            api_url: c.api_url.trim_end_matches('/').to_string(),
            max_message_len: c.max_message_len,
            truncation_marker: c.truncation_marker.clone(),
        }
    }
}

/// The parts of a gateway message the relay looks at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscordMessage {
    pub id: String,
    pub channel_id: String,
    pub author_id: String,
    pub author_is_bot: bool,
    pub content: String,
    /// User ids mentioned in the message.
    pub mentions: Vec<String>,
    pub attachment: Option<InboundAttachment>,
}

impl From<&Message> for DiscordMessage {
    fn from(msg: &Message) -> Self {
        Self {
            id: msg.id.to_string(),
            channel_id: msg.channel_id.to_string(),
            author_id: msg.author.id.to_string(),
            author_is_bot: msg.author.bot,
            content: msg.content.clone(),
            mentions: msg.mentions.iter().map(|u| u.id.to_string()).collect(),
            attachment: None,
        }
    }
}

/// Remove `<@id>` and `<@!id>` markers for `id`, then trim.
pub fn strip_mentions(text: &str, id: &str) -> String {
    text.replace(&format!("<@{id}>"), "")
        .replace(&format!("<@!{id}>"), "")
        .trim()
        .to_string()
}

/// Gateway intents the relay needs: guild and DM messages with content.
pub fn gateway_intents() -> GatewayIntents {
    GatewayIntents::GUILD_MESSAGES | GatewayIntents::DIRECT_MESSAGES | GatewayIntents::MESSAGE_CONTENT
}

/// Discord channel adapter.
pub struct DiscordChannel {
    config: DiscordConfig,
    channel_id: ChannelId,
    client: reqwest::Client,
    bot_user_id: OnceLock<String>,
    inbound_tx: tokio::sync::Mutex<Option<mpsc::Sender<Result<InboundEvent, ChannelError>>>>,
}

impl DiscordChannel {
    pub fn new(config: DiscordConfig) -> Self {
        let bot_user_id = OnceLock::new();
        if let Some(id) = config.bot_user_id.clone().filter(|id| !id.is_empty()) {
            let _ = bot_user_id.set(id);
        }
        Self {
            config,
            channel_id: ChannelId("discord".into()),
            client: reqwest::Client::new(),
            bot_user_id,
            inbound_tx: tokio::sync::Mutex::new(None),
        }
    }

    /// The bot's own user id, once known.
    pub fn bot_user_id(&self) -> Option<&str> {
        self.bot_user_id.get().map(String::as_str)
    }

    /// Record the bot's user id. The first value wins.
    pub fn set_bot_user_id(&self, id: impl Into<String>) {
        let _ = self.bot_user_id.set(id.into());
    }

    /// Look up the bot's own user id with `GET /users/@me` unless already known.
    pub async fn resolve_bot_user_id(&self) -> Result<String, ChannelError> {
        if let Some(id) = self.bot_user_id() {
            return Ok(id.to_string());
        }
        let token = self.token()?;
        let url = format!("{}/users/@me", self.config.api_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bot {token}"))
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionLost(format!("Discord /users/@me: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChannelError::NotConfigured(format!(
                "Discord rejected the bot token (HTTP {status})"
            )));
        }
        let me: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChannelError::ConnectionLost(format!("Discord /users/@me: {e}")))?;
        let id = me["id"]
            .as_str()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ChannelError::ConnectionLost("Discord /users/@me returned no id".into()))?;

        info!(bot_user_id = %id, "Resolved Discord bot user");
        self.set_bot_user_id(id);
        Ok(id.to_string())
    }

    /// Convert a gateway message into an inbound event, or `None` when the
    /// relay should not answer it.
    ///
    /// Until the bot's own id is known no message counts as addressed to it.
    pub fn to_event(&self, msg: DiscordMessage) -> Option<InboundEvent> {
        let (mentions_agent, text) = match self.bot_user_id() {
            Some(bot) => {
                let mentioned = msg.mentions.iter().any(|m| m == bot)
                    || msg.content.contains(&format!("<@{bot}>"))
                    || msg.content.contains(&format!("<@!{bot}>"));
                (mentioned, strip_mentions(&msg.content, bot))
            }
            None => (false, msg.content.trim().to_string()),
        };

        let event = InboundEvent {
            channel_id: self.channel_id.clone(),
            chat_id: msg.channel_id,
            message_id: Some(msg.id),
            sender_id: msg.author_id,
            author_is_bot: msg.author_is_bot,
            mentions_agent,
            text,
            attachment: msg.attachment,
        };
        event.should_handle().then_some(event)
    }

    /// Hand a gateway message to the relay. Returns whether it was accepted.
    pub async fn ingest(&self, msg: DiscordMessage) -> Result<bool, ChannelError> {
        let message_id = msg.id.clone();
        let Some(event) = self.to_event(msg) else {
            debug!(message_id = %message_id, "Ignoring Discord message");
            return Ok(false);
        };

        let guard = self.inbound_tx.lock().await;
        let tx = guard
            .as_ref()
            .ok_or_else(|| ChannelError::ConnectionLost("Channel not started".into()))?;
        tx.send(Ok(event))
            .await
            .map_err(|_| ChannelError::ConnectionLost("Message channel closed".into()))?;
        Ok(true)
    }

    /// Connect to the gateway and feed messages into [`ingest`](Self::ingest)
    /// until the connection ends. Stops the channel on return.
    pub async fn run_gateway(self: Arc<Self>) -> Result<(), ChannelError> {
        let token = self.token()?.to_string();
        let handler = GatewayHandler {
            channel: Arc::clone(&self),
        };
        let result = match serenity::Client::builder(&token, gateway_intents())
            .event_handler(handler)
            .await
        {
            Ok(mut client) => client
                .start()
                .await
                .map_err(|e| ChannelError::ConnectionLost(format!("Discord gateway: {e}"))),
            Err(e) => Err(ChannelError::ConnectionLost(format!("Discord gateway: {e}"))),
        };
        self.stop().await?;
        result
    }

    fn token(&self) -> Result<&str, ChannelError> {
        self.config
            .bot_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ChannelError::NotConfigured("Discord bot token is not set".into()))
    }

    fn delivery_error(reason: impl std::fmt::Display) -> ChannelError {
        ChannelError::DeliveryFailed {
            channel: "discord".into(),
            reason: reason.to_string(),
        }
    }

    fn payload(&self, reply: &OutboundReply, reply_to: Option<&str>) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "allowed_mentions": {"parse": [], "replied_user": true},
        });
        if let Some(text) = &reply.text {
            payload["content"] = serde_json::json!(truncate_text(
                text,
                self.config.max_message_len,
                &self.config.truncation_marker
            ));
        }
        if let Some(message_id) = reply_to {
            payload["message_reference"] =
                serde_json::json!({"message_id": message_id, "fail_if_not_exists": false});
        }
        if let Some(file) = &reply.file {
            payload["attachments"] = serde_json::json!([{"id": 0, "filename": file.filename}]);
        }
        payload
    }
}

#[async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &str {
        "discord"
    }

    fn id(&self) -> &ChannelId {
        &self.channel_id
    }

    fn max_message_len(&self) -> usize {
        self.config.max_message_len
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<InboundEvent, ChannelError>>, ChannelError> {
        info!("Discord channel starting");
        let (tx, rx) = mpsc::channel(64);
        *self.inbound_tx.lock().await = Some(tx);
        Ok(rx)
    }

    async fn send(
        &self,
        chat_id: &str,
        reply: &OutboundReply,
        reply_to: Option<&str>,
    ) -> Result<(), ChannelError> {
        if reply.text.is_none() && reply.file.is_none() {
            return Ok(());
        }
        let token = self.token()?;
        let url = format!("{}/channels/{}/messages", self.config.api_url, chat_id);
        let payload = self.payload(reply, reply_to);

        let request = self
            .client
            .post(&url)
            .header("Authorization", format!("Bot {token}"));

        let request = match &reply.file {
            Some(file) => {
                let part = reqwest::multipart::Part::bytes(file.bytes.clone())
                    .file_name(file.filename.clone())
                    .mime_str(&file.mime_type)
                    .map_err(Self::delivery_error)?;
                let form = reqwest::multipart::Form::new()
                    .text("payload_json", payload.to_string())
                    .part("files[0]", part);
                request.multipart(form)
            }
            None => request.json(&payload),
        };

        debug!(
            chat_id = %chat_id,
            reply_to = ?reply_to,
            has_file = reply.file.is_some(),
            "Discord send"
        );

        let response = request.send().await.map_err(Self::delivery_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Discord rejected message");
            return Err(Self::delivery_error(format!("HTTP {status}: {body}")));
        }
        Ok(())
    }

    async fn send_typing(&self, chat_id: &str) -> Result<(), ChannelError> {
        let token = self.token()?;
        let url = format!("{}/channels/{}/typing", self.config.api_url, chat_id);
        self.client
            .post(&url)
            .header("Authorization", format!("Bot {token}"))
            .send()
            .await
            .map_err(Self::delivery_error)?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        info!("Discord channel stopping");
        *self.inbound_tx.lock().await = None;
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, ChannelError> {
        Ok(self.token().is_ok())
    }
}

/// Serenity event handler feeding a [`DiscordChannel`].
struct GatewayHandler {
    channel: Arc<DiscordChannel>,
}

#[async_trait]
impl EventHandler for GatewayHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(
            bot_name = %ready.user.name,
            guilds = ready.guilds.len(),
            "Discord gateway ready"
        );
        self.channel.set_bot_user_id(ready.user.id.to_string());
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let mut message = DiscordMessage::from(&msg);
        if self.channel.to_event(message.clone()).is_none() {
            return;
        }
        if let Some(attachment) = msg.attachments.first() {
            message.attachment = download_attachment(attachment).await;
        }
        if let Err(e) = self.channel.ingest(message).await {
            warn!(error = %e, "Failed to hand Discord message to relay");
        }
    }
}

async fn download_attachment(attachment: &Attachment) -> Option<InboundAttachment> {
    if u64::from(attachment.size) > MAX_ATTACHMENT_BYTES {
        warn!(filename = %attachment.filename, size = attachment.size, "Attachment too large, skipped");
        return None;
    }
    match attachment.download().await {
        Ok(bytes) => Some(InboundAttachment {
            filename: attachment.filename.clone(),
            mime_type: attachment.content_type.clone(),
            bytes,
        }),
        Err(e) => {
            warn!(filename = %attachment.filename, error = %e, "Attachment download failed");
            None
        }
    }
}
