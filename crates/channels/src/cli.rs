//! CLI channel: interactive terminal-based chat.
//!
//! Reads from stdin, writes to stdout. Every line counts as addressed to the
//! agent, so the relay pipeline can be driven locally without Discord.
//! Used for `concierge chat`.

use async_trait::async_trait;
use concierge_core::channel::{Channel, ChannelId, InboundEvent, OutboundReply};
use concierge_core::error::ChannelError;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const CHAT_ID: &str = "cli_session";

/// What one line of terminal input means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliInput {
    Message(String),
    Exit,
    Blank,
}

/// Classify one line of terminal input.
pub fn parse_line(line: &str) -> CliInput {
    let line = line.trim();
    if line.is_empty() {
        return CliInput::Blank;
    }
    if matches!(line, "exit" | "quit" | "/exit" | "/quit" | ":q") {
        return CliInput::Exit;
    }
    CliInput::Message(line.to_string())
}

/// Interactive CLI channel for terminal-based chat.
pub struct CliChannel {
    id: ChannelId,
}

impl CliChannel {
    pub fn new() -> Self {
        Self {
            id: ChannelId("cli".into()),
        }
    }

    fn event(&self, text: String) -> InboundEvent {
        InboundEvent {
            channel_id: self.id.clone(),
            chat_id: CHAT_ID.into(),
            message_id: None,
            sender_id: "local_user".into(),
            author_is_bot: false,
            mentions_agent: true,
            text,
            attachment: None,
        }
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a reply for the terminal.
pub fn render_reply(reply: &OutboundReply) -> String {
    let mut out = reply.text.clone().unwrap_or_default();
    if let Some(file) = &reply.file {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!(
            "[attachment: {} ({}, {} bytes)]",
            file.filename,
            file.mime_type,
            file.bytes.len()
        ));
    }
    out
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    fn id(&self) -> &ChannelId {
        &self.id
    }

    fn max_message_len(&self) -> usize {
        usize::MAX
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<InboundEvent, ChannelError>>, ChannelError> {
        let (tx, rx) = mpsc::channel(32);
        let template = self.event(String::new());

        tokio::spawn(async move {
            let stdin = io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match parse_line(&line) {
                        CliInput::Blank => continue,
                        CliInput::Exit => break,
                        CliInput::Message(text) => {
                            let event = InboundEvent {
                                text,
                                ..template.clone()
                            };
                            if tx.send(Ok(event)).await.is_err() {
                                break;
                            }
                        }
                    },
                    Ok(None) => break, // EOF (Ctrl+D)
                    Err(e) => {
                        let _ = tx.send(Err(ChannelError::ConnectionLost(e.to_string()))).await;
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn send(
        &self,
        _chat_id: &str,
        reply: &OutboundReply,
        _reply_to: Option<&str>,
    ) -> Result<(), ChannelError> {
        println!("{}", render_reply(reply));
        Ok(())
    }
}
