//! Provider trait: the abstraction over the generative-AI backend.
//!
//! A Provider takes role-tagged contents plus at most one tool attachment and
//! returns the model's content parts: text, function calls, inline images.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capability::ImagePayload;
use crate::error::ProviderError;
use crate::message::{Role, Turn};

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// One piece of a content block.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    FunctionCall {
        name: String,
        args: serde_json::Value,
    },
    FunctionResponse {
        name: String,
        response: serde_json::Value,
    },
    InlineData(ImagePayload),
}

/// A role-tagged block of parts.
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part::Text(text.into())],
        }
    }

    /// Concatenated text parts, `None` if there are none.
    pub fn joined_text(&self) -> Option<String> {
        let texts: Vec<&str> = self
            .parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.concat())
        }
    }

    /// Function calls requested in this block, in order.
    pub fn function_calls(&self) -> Vec<(&str, &serde_json::Value)> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::FunctionCall { name, args } => Some((name.as_str(), args)),
                _ => None,
            })
            .collect()
    }

    /// The last inline image in this block.
    pub fn image(&self) -> Option<&ImagePayload> {
        self.parts.iter().rev().find_map(|p| match p {
            Part::InlineData(img) => Some(img),
            _ => None,
        })
    }
}

impl From<&Turn> for Content {
    fn from(turn: &Turn) -> Self {
        Content::text(turn.role, turn.text.clone())
    }
}

/// What, if anything, is attached to a request.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ToolAttachment {
    #[default]
    None,
    /// The backend's built-in web search.
    HostedSearch,
    /// Callable functions (the catalog of a live tool session).
    Functions(Vec<ToolDefinition>),
}

/// Output kinds the model is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Text,
    Image,
}

/// A single generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub model: String,
    pub system_instruction: Option<String>,
    pub contents: Vec<Content>,
    /// Sampling temperature (0.0 = deterministic)
    pub temperature: f32,
    pub tools: ToolAttachment,
    pub response_modalities: Vec<Modality>,
}

impl ProviderRequest {
    /// A text-only request with temperature 0 and no attachment.
    pub fn new(model: impl Into<String>, contents: Vec<Content>) -> Self {
        Self {
            model: model.into(),
            system_instruction: None,
            contents,
            temperature: 0.0,
            tools: ToolAttachment::None,
            response_modalities: vec![Modality::Text],
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A complete response from a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    /// The model's content block (role `Model`).
    pub content: Content,
    pub usage: Option<Usage>,
    /// Which model actually responded
    pub model: String,
}

/// The core Provider trait.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "gemini").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError>;

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_are_deterministic() {
        let req = ProviderRequest::new("gemini-2.0-flash", vec![]);
        assert_eq!(req.temperature, 0.0);
        assert_eq!(req.tools, ToolAttachment::None);
        assert_eq!(req.response_modalities, vec![Modality::Text]);
    }

    #[test]
    fn content_accessors() {
        let content = Content {
            role: Role::Model,
            parts: vec![
                Part::Text("東京は".into()),
                Part::FunctionCall {
                    name: "weather_search".into(),
                    args: serde_json::json!({"location": "東京"}),
                },
                Part::Text("晴れです".into()),
            ],
        };
        assert_eq!(content.joined_text().as_deref(), Some("東京は晴れです"));
        let calls = content.function_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "weather_search");
        assert!(content.image().is_none());
    }

    #[test]
    fn turn_converts_to_content() {
        let turn = Turn::model("hi");
        let content = Content::from(&turn);
        assert_eq!(content.role, Role::Model);
        assert_eq!(content.joined_text().as_deref(), Some("hi"));
    }

    #[test]
    fn modality_serializes_uppercase() {
        let json = serde_json::to_string(&vec![Modality::Text, Modality::Image]).unwrap();
        assert_eq!(json, r#"["TEXT","IMAGE"]"#);
    }
}
