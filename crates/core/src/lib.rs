//! # Concierge Core
//!
//! Domain types, traits, and error definitions for the Concierge chat relay.
//! This crate has **no I/O of its own**: it defines the domain model that the
//! protocol, provider, channel and agent crates implement against.
//!
//! ## Design Philosophy
//!
//! Every seam is a trait here: the generation backend ([`Provider`]), the
//! messaging transport ([`Channel`]) and tool-server operations ([`Tool`]).
//! Implementations live in their own crates so each can be replaced with a
//! scripted stand-in in tests.

pub mod capability;
pub mod channel;
pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use capability::{Capability, GeneratedReply, RoutingDecision};
pub use channel::{Channel, ChannelId, InboundEvent, OutboundReply};
pub use error::{Error, Result};
pub use message::{Conversation, ConversationId, Role, Turn};
pub use provider::{Provider, ProviderRequest, ProviderResponse};
pub use tool::{OperationSpec, Tool, ToolCatalog, ToolDescriptor, ToolOutput, ToolRegistry};
