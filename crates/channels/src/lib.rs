//! Messaging channels for Concierge.
//!
//! Each channel connects to a chat surface and relays messages to/from the
//! relay orchestrator. Channels are trait-based and platform-agnostic.
//!
//! Available channels:
//! - **CLI**: interactive terminal chat (stdin/stdout)
//! - **Discord**: inbound over the gateway, replies over the REST API

pub mod cli;
pub mod discord;

pub use cli::CliChannel;
pub use discord::{DiscordChannel, DiscordConfig, DiscordMessage};
