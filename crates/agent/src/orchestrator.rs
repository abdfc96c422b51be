//! The relay orchestrator: owns conversation state and turns inbound events
//! into delivered replies.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use concierge_config::AppConfig;
use concierge_core::capability::GeneratedReply;
use concierge_core::channel::{Channel, InboundAttachment, InboundEvent, OutboundReply, TRUNCATION_MARKER};
use concierge_core::error::ChannelError;
use concierge_core::message::{Conversation, ConversationId, Turn};
use concierge_core::provider::Provider;
use concierge_mcp::SessionTimeouts;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::audit::AuditLog;
use crate::client::{ClientSettings, ConversationalClient};
use crate::dispatch::Dispatcher;
use crate::router::CapabilityRouter;

/// Prefix that turns a message into an image generation request.
pub const IMAGE_COMMAND: &str = "!img ";

/// First line of the reply sent when nothing could be generated.
pub const ERROR_REPLY: &str = "申し訳ありません。応答の生成中にエラーが発生しました。";

pub struct RelayOrchestrator {
    router: CapabilityRouter,
    dispatcher: Dispatcher,
    client: Arc<ConversationalClient>,
    audit: Option<AuditLog>,
    /// One conversation per chat id, kept for the life of the process.
    /// Entries are never evicted, like the audit log is never rotated.
    conversations: Mutex<HashMap<String, Arc<Mutex<Conversation>>>>,
    truncation_marker: String,
}

impl RelayOrchestrator {
    pub fn new(
        router: CapabilityRouter,
        dispatcher: Dispatcher,
        client: Arc<ConversationalClient>,
    ) -> Self {
        Self {
            router,
            dispatcher,
            client,
            audit: None,
            conversations: Mutex::new(HashMap::new()),
            truncation_marker: TRUNCATION_MARKER.to_string(),
        }
    }

    /// Wire everything from configuration. `self_exe` serves the default tool servers.
    pub fn from_config(config: &AppConfig, provider: Arc<dyn Provider>, self_exe: &Path) -> Self {
        let client = Arc::new(ConversationalClient::new(
            provider,
            ClientSettings::from_config(config),
        ));
        let dispatcher = Dispatcher::new(Arc::clone(&client), config.tool_descriptors(self_exe))
            .with_session_timeouts(SessionTimeouts {
                handshake: config.timeouts.handshake(),
                request: config.timeouts.request(),
            })
            .with_generation_timeout(config.timeouts.generation());

        let mut orchestrator = Self::new(CapabilityRouter::from_config(&config.routing), dispatcher, client)
            .with_truncation_marker(config.discord.truncation_marker.clone());
        if config.audit.enabled {
            orchestrator = orchestrator.with_audit(AuditLog::new(&config.audit.path));
        }
        orchestrator
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_truncation_marker(mut self, marker: impl Into<String>) -> Self {
        self.truncation_marker = marker.into();
        self
    }

    pub fn router(&self) -> &CapabilityRouter {
        &self.router
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The conversation for `chat_id`, created on first use.
    pub async fn conversation(&self, chat_id: &str) -> Arc<Mutex<Conversation>> {
        let mut conversations = self.conversations.lock().await;
        Arc::clone(conversations.entry(chat_id.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(Conversation::with_id(ConversationId::from(chat_id))))
        }))
    }

    /// A snapshot of the turns recorded for `chat_id`.
    pub async fn history(&self, chat_id: &str) -> Vec<Turn> {
        let conversation = self.conversation(chat_id).await;
        let conversation = conversation.lock().await;
        conversation.turns().to_vec()
    }

    /// Produce the reply to one message. Never fails.
    ///
    /// Requests for the same chat are processed one at a time so turns are
    /// appended in order; different chats run concurrently.
    pub async fn respond(
        &self,
        chat_id: &str,
        text: &str,
        attachment: Option<&InboundAttachment>,
    ) -> GeneratedReply {
        if let Some(prompt) = text.strip_prefix(IMAGE_COMMAND) {
            return self.respond_image(prompt.trim()).await;
        }

        let conversation = self.conversation(chat_id).await;
        let mut conversation = conversation.lock().await;

        let user_turn = Turn::user(text);
        self.audit(&user_turn).await;
        conversation.push(user_turn);

        let decision = self.router.classify(text);
        info!(
            chat_id = %chat_id,
            route = ?decision.candidates().iter().map(|c| c.label()).collect::<Vec<_>>(),
            "Routing message"
        );

        match self.dispatcher.dispatch(&decision, &conversation, attachment).await {
            Ok(dispatched) => {
                debug!(chat_id = %chat_id, served_by = ?dispatched.served_by, "Reply generated");
                let reply = dispatched.reply;
                let model_turn = Turn::model(reply.text().unwrap_or_default());
                self.audit(&model_turn).await;
                if reply.text().is_some() {
                    conversation.push(model_turn);
                }
                reply
            }
            Err(e) => {
                warn!(chat_id = %chat_id, error = %e, "All generation attempts failed");
                let reply = GeneratedReply::new(Some(format!("{ERROR_REPLY}\n{e}")), None);
                if let Some(text) = reply.text() {
                    self.audit(&Turn::model(text)).await;
                }
                reply
            }
        }
    }

    async fn respond_image(&self, prompt: &str) -> GeneratedReply {
        info!(prompt_len = prompt.chars().count(), "Image generation requested");
        self.audit(&Turn::user(format!("{IMAGE_COMMAND}{prompt}"))).await;
        let reply = if prompt.is_empty() {
            GeneratedReply::with_sentinel(None, None, crate::client::IMAGE_FAILED)
        } else {
            self.client.generate_image(prompt).await
        };
        let logged = match (reply.text(), reply.image()) {
            (Some(text), _) => text.to_string(),
            (None, Some(image)) => format!("[image.{}]", image.extension()),
            (None, None) => String::new(),
        };
        self.audit(&Turn::model(logged)).await;
        reply
    }

    /// Handle one inbound event end to end: generate, then deliver on `channel`.
    pub async fn handle_event(
        &self,
        channel: &dyn Channel,
        event: InboundEvent,
    ) -> Result<(), ChannelError> {
        if !event.should_handle() {
            debug!(channel = %channel.name(), "Skipping event");
            return Ok(());
        }

        if let Err(e) = channel.send_typing(&event.chat_id).await {
            debug!(channel = %channel.name(), error = %e, "Typing indicator failed");
        }

        let reply = self
            .respond(&event.chat_id, &event.text, event.attachment.as_ref())
            .await;
        let outbound =
            OutboundReply::from_generated(reply, channel.max_message_len(), &self.truncation_marker);
        channel
            .send(&event.chat_id, &outbound, event.message_id.as_deref())
            .await
    }

    async fn audit(&self, turn: &Turn) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.append(turn).await {
                warn!(path = %audit.path().display(), error = %e, "Failed to write audit log");
            }
        }
    }
}
