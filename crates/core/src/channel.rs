//! Channel trait: the abstraction over messaging platforms.
//!
//! A Channel delivers inbound events from a platform (Discord, terminal) and
//! accepts outbound replies. The relay only consumes the cleaned text and an
//! optional attachment; platform structure stays inside the adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capability::{GeneratedReply, ImagePayload};
use crate::error::ChannelError;

/// Default marker appended to truncated replies.
pub const TRUNCATION_MARKER: &str = "\n...(省略)";

/// Unique identifier for a channel instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A binary attachment carried by an inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundAttachment {
    pub filename: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// A message received from a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub channel_id: ChannelId,

    /// The chat/group/DM identifier within the channel; also the conversation key.
    pub chat_id: String,

    /// Platform message id, used to thread the reply.
    pub message_id: Option<String>,

    pub sender_id: String,

    pub author_is_bot: bool,

    pub mentions_agent: bool,

    /// Text with any mention marker already stripped.
    pub text: String,

    pub attachment: Option<InboundAttachment>,
}

impl InboundEvent {
    /// Whether the relay should answer this event.
    pub fn should_handle(&self) -> bool {
        !self.author_is_bot && self.mentions_agent && !self.text.trim().is_empty()
    }
}

/// A named file on an outbound reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFile {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// A reply ready for delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundReply {
    pub text: Option<String>,
    pub file: Option<OutboundFile>,
}

impl OutboundReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            file: None,
        }
    }

    /// Convert a generated reply, truncating text to `max_len` characters.
    pub fn from_generated(reply: GeneratedReply, max_len: usize, marker: &str) -> Self {
        let (text, image) = reply.into_parts();
        Self {
            text: text.map(|t| truncate_text(&t, max_len, marker)),
            file: image.map(image_file),
        }
    }
}

fn image_file(image: ImagePayload) -> OutboundFile {
    OutboundFile {
        filename: format!("image.{}", image.extension()),
        mime_type: image.mime_type,
        bytes: image.bytes,
    }
}

/// Truncate `text` to at most `max_len` characters.
///
/// Text that fits is returned unchanged. Otherwise the text is cut so that the
/// result, marker included, is at most `max_len` characters long.
pub fn truncate_text(text: &str, max_len: usize, marker: &str) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let marker_len = marker.chars().count();
    if marker_len >= max_len {
        return text.chars().take(max_len).collect();
    }
    let mut out: String = text.chars().take(max_len - marker_len).collect();
    out.push_str(marker);
    out
}

/// The core Channel trait.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name (e.g., "discord", "cli").
    fn name(&self) -> &str;

    /// Unique ID for this channel instance.
    fn id(&self) -> &ChannelId;

    /// Maximum number of characters in one outbound message.
    fn max_message_len(&self) -> usize {
        2000
    }

    /// Start listening for incoming events.
    async fn start(
        &self,
    ) -> Result<
        tokio::sync::mpsc::Receiver<Result<InboundEvent, ChannelError>>,
        ChannelError,
    >;

    /// Send a reply to a specific chat.
    async fn send(
        &self,
        chat_id: &str,
        reply: &OutboundReply,
        reply_to: Option<&str>,
    ) -> Result<(), ChannelError>;

    /// Send a typing indicator (if the platform supports it).
    async fn send_typing(&self, _chat_id: &str) -> Result<(), ChannelError> {
        Ok(())
    }

    /// Stop the channel gracefully.
    async fn stop(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    /// Health check: is the channel connected and operational?
    async fn health_check(&self) -> Result<bool, ChannelError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(bot: bool, mentioned: bool, text: &str) -> InboundEvent {
        InboundEvent {
            channel_id: ChannelId("discord".into()),
            chat_id: "c1".into(),
            message_id: None,
            sender_id: "u1".into(),
            author_is_bot: bot,
            mentions_agent: mentioned,
            text: text.into(),
            attachment: None,
        }
    }

    #[test]
    fn short_text_is_unchanged() {
        let text = "こんにちは";
        assert_eq!(truncate_text(text, 2000, TRUNCATION_MARKER), text);
        let exact = "a".repeat(2000);
        assert_eq!(truncate_text(&exact, 2000, TRUNCATION_MARKER), exact);
    }

    #[test]
    fn long_text_is_truncated_with_marker() {
        let text = "あ".repeat(2500);
        let out = truncate_text(&text, 2000, TRUNCATION_MARKER);
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert_eq!(out.chars().count(), 2000);
    }

    #[test]
    fn truncation_never_exceeds_max_for_any_length() {
        for len in [0usize, 1, 5, 9, 10, 11, 50] {
            let text = "x".repeat(len);
            let out = truncate_text(&text, 10, TRUNCATION_MARKER);
            assert!(out.chars().count() <= 10, "len {len} produced {out:?}");
        }
    }

    #[test]
    fn oversized_marker_is_dropped() {
        let out = truncate_text("abcdefgh", 3, TRUNCATION_MARKER);
        assert_eq!(out, "abc");
    }

    #[test]
    fn event_filtering() {
        assert!(event(false, true, "hi").should_handle());
        assert!(!event(true, true, "hi").should_handle());
        assert!(!event(false, false, "hi").should_handle());
        assert!(!event(false, true, "   ").should_handle());
    }

    #[test]
    fn generated_image_becomes_named_file() {
        let reply = GeneratedReply::new(
            Some("できました".into()),
            Some(ImagePayload {
                mime_type: "image/png".into(),
                bytes: vec![9, 9],
            }),
        );
        let out = OutboundReply::from_generated(reply, 2000, TRUNCATION_MARKER);
        assert_eq!(out.text.as_deref(), Some("できました"));
        let file = out.file.unwrap();
        assert_eq!(file.filename, "image.png");
        assert_eq!(file.bytes, vec![9, 9]);
    }
}
