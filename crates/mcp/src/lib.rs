//! Tool sessions for Concierge.
//!
//! A tool server is a child process speaking line-delimited JSON-RPC 2.0 on
//! its stdin/stdout (the `initialize` / `tools/list` / `tools/call` subset of
//! MCP). This crate holds both ends:
//! - [`ToolSession`]: launch a server, handshake, list and call operations, close;
//! - [`ToolServer`]: serve a [`concierge_core::ToolRegistry`] over any byte stream.

pub mod server;
pub mod session;
pub mod transport;
pub mod types;

pub use server::ToolServer;
pub use session::{SessionTimeouts, ToolSession};
pub use transport::{StdioTransport, TransportError};
pub use types::Implementation;
