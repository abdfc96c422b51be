//! The relay core of Concierge.
//!
//! For every inbound message:
//!
//! 1. **Route**: the [`CapabilityRouter`] matches the text against its keyword
//!    table and yields an ordered list of capabilities ending in hosted search.
//! 2. **Dispatch**: the [`Dispatcher`] tries each capability in turn. A tool
//!    server is launched as a subprocess for the attempt and always closed
//!    afterwards; any failure moves on to the next candidate.
//! 3. **Generate**: the [`ConversationalClient`] calls the backend with the
//!    chosen capability attached, running function calls against the session.
//! 4. **Record**: the [`RelayOrchestrator`] appends the turns to the chat's
//!    conversation and the [`AuditLog`], then hands the reply to the channel.

pub mod audit;
pub mod client;
pub mod dispatch;
pub mod orchestrator;
pub mod router;

pub use audit::AuditLog;
pub use client::{
    Augmentation, ClientSettings, ConversationalClient, FunctionHost, IMAGE_FAILED, TEMPERATURE,
};
pub use dispatch::{Dispatched, Dispatcher, ServedBy};
pub use orchestrator::{ERROR_REPLY, IMAGE_COMMAND, RelayOrchestrator};
pub use router::{CapabilityRouter, RoutingRule};
