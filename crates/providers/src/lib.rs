//! Generation backends for Concierge.
//!
//! All backends implement [`concierge_core::Provider`]. Gemini is the only
//! one shipped; function-calling schemas go through [`schema::sanitize`].

pub mod gemini;
pub mod schema;

pub use gemini::GeminiProvider;
