//! The fallback chain.
//!
//! Each candidate of a [`RoutingDecision`] is one attempt. A tool-server
//! attempt opens a session, fetches its catalog, generates with the session
//! attached and closes the session whatever happened. Any failure is logged
//! and the next candidate is tried. When every candidate has failed, one last
//! generation runs with no augmentation at all.

use std::sync::Arc;
use std::time::Duration;

use concierge_core::Error;
use concierge_core::capability::{Capability, GeneratedReply, RoutingDecision};
use concierge_core::channel::InboundAttachment;
use concierge_core::error::{ProviderError, SessionError};
use concierge_core::message::Conversation;
use concierge_core::tool::ToolDescriptor;
use concierge_mcp::{SessionTimeouts, ToolSession};
use tracing::{debug, info, warn};

use crate::client::{Augmentation, ConversationalClient};

/// What served a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServedBy {
    Candidate(Capability),
    /// Every candidate failed; generated with no augmentation.
    AbsoluteFallback,
}

/// A successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub reply: GeneratedReply,
    pub served_by: ServedBy,
    /// Failures of the candidates tried before the one that served.
    pub failures: Vec<String>,
}

/// Runs routing decisions against the configured tool servers.
pub struct Dispatcher {
    client: Arc<ConversationalClient>,
    descriptors: Vec<ToolDescriptor>,
    session_timeouts: SessionTimeouts,
    generation_timeout: Duration,
}

impl Dispatcher {
    pub fn new(client: Arc<ConversationalClient>, descriptors: Vec<ToolDescriptor>) -> Self {
        Self {
            client,
            descriptors,
            session_timeouts: SessionTimeouts::default(),
            generation_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_session_timeouts(mut self, timeouts: SessionTimeouts) -> Self {
        self.session_timeouts = timeouts;
        self
    }

    /// Bound for one generation, function-calling rounds included.
    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    /// Walk the chain. Fails only when the absolute fallback fails too.
    pub async fn dispatch(
        &self,
        decision: &RoutingDecision,
        conversation: &Conversation,
        attachment: Option<&InboundAttachment>,
    ) -> Result<Dispatched, ProviderError> {
        let mut failures = Vec::new();

        for (i, candidate) in decision.iter().enumerate() {
            debug!(attempt = i + 1, candidate = %candidate, "Trying capability");
            match self.attempt(candidate, conversation, attachment).await {
                Ok(reply) => {
                    info!(attempt = i + 1, candidate = %candidate, "Capability served request");
                    return Ok(Dispatched {
                        reply,
                        served_by: ServedBy::Candidate(candidate.clone()),
                        failures,
                    });
                }
                Err(e) => {
                    warn!(attempt = i + 1, candidate = %candidate, error = %e, "Capability failed, trying next");
                    failures.push(format!("{candidate}: {e}"));
                }
            }
        }

        warn!(failures = failures.len(), "All capabilities failed, generating without augmentation");
        let reply = self
            .generate(conversation, attachment, Augmentation::None)
            .await?;
        Ok(Dispatched {
            reply,
            served_by: ServedBy::AbsoluteFallback,
            failures,
        })
    }

    /// One attempt at one candidate.
    pub async fn attempt(
        &self,
        candidate: &Capability,
        conversation: &Conversation,
        attachment: Option<&InboundAttachment>,
    ) -> Result<GeneratedReply, Error> {
        let name = match candidate {
            Capability::HostedSearch => {
                return Ok(self
                    .generate(conversation, attachment, Augmentation::HostedSearch)
                    .await?);
            }
            Capability::ToolServer(name) => name,
        };

        let descriptor = self.descriptor(name).ok_or_else(|| SessionError::Launch {
            server: name.clone(),
            reason: "no tool server configured under this name".into(),
        })?;

        let mut session = ToolSession::open(descriptor, self.session_timeouts).await?;
        let outcome = self.use_session(&session, conversation, attachment).await;
        session.close().await;
        outcome
    }

    async fn use_session(
        &self,
        session: &ToolSession,
        conversation: &Conversation,
        attachment: Option<&InboundAttachment>,
    ) -> Result<GeneratedReply, Error> {
        let catalog = session.catalog().await?;
        if catalog.is_empty() {
            return Err(SessionError::Protocol {
                server: session.server().to_string(),
                reason: "server advertises no operations".into(),
            }
            .into());
        }
        let augmentation = Augmentation::Functions {
            host: session,
            catalog: &catalog,
        };
        Ok(self.generate(conversation, attachment, augmentation).await?)
    }

    async fn generate(
        &self,
        conversation: &Conversation,
        attachment: Option<&InboundAttachment>,
        augmentation: Augmentation<'_>,
    ) -> Result<GeneratedReply, ProviderError> {
        tokio::time::timeout(
            self.generation_timeout,
            self.client.generate(conversation, attachment, augmentation),
        )
        .await
        .map_err(|_| {
            ProviderError::Timeout(format!(
                "generation exceeded {}ms",
                self.generation_timeout.as_millis()
            ))
        })?
    }
}
