//! Gemini provider over the Generative Language REST API.
//!
//! Supports:
//! - `generateContent` with role-tagged contents and a system instruction
//! - Function declarations (tool-session catalogs) and function responses
//! - The hosted Google Search tool
//! - TEXT and IMAGE response modalities (inline image data, base64)

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use concierge_core::capability::ImagePayload;
use concierge_core::error::ProviderError;
use concierge_core::message::Role;
use concierge_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::schema;

pub const DEFAULT_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// A Gemini backend.
pub struct GeminiProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl GeminiProvider {
    /// Create a provider; `timeout` bounds every HTTP call.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "HTTP client builder failed, using defaults");
                reqwest::Client::new()
            });

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// The public Gemini endpoint with a 120 s timeout.
    pub fn with_key(api_key: impl Into<String>) -> Self {
        Self::new(api_key, DEFAULT_API_URL, Duration::from_secs(120))
    }

    /// Build the `generateContent` body.
    fn to_api_request(request: &ProviderRequest) -> ApiRequest {
        let contents = request.contents.iter().map(ApiContent::from).collect();

        let system_instruction = request
            .system_instruction
            .as_ref()
            .filter(|s| !s.trim().is_empty())
            .map(|s| ApiContent {
                role: None,
                parts: vec![ApiPart::text(s.clone())],
            });

        let tools = match &request.tools {
            ToolAttachment::None => None,
            ToolAttachment::HostedSearch => Some(vec![ApiTool {
                google_search: Some(serde_json::json!({})),
                function_declarations: None,
            }]),
            ToolAttachment::Functions(defs) if defs.is_empty() => None,
            ToolAttachment::Functions(defs) => Some(vec![ApiTool {
                google_search: None,
                function_declarations: Some(defs.iter().map(to_declaration).collect()),
            }]),
        };

        ApiRequest {
            contents,
            system_instruction,
            tools,
            generation_config: GenerationConfig {
                temperature: request.temperature,
                response_modalities: request.response_modalities.clone(),
            },
        }
    }

    fn from_api_response(api: ApiResponse, model: &str) -> Result<ProviderResponse, ProviderError> {
        let usage = api.usage_metadata.map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        });

        let Some(candidate) = api.candidates.into_iter().next() else {
            let reason = api
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates".into());
            warn!(reason = %reason, "Gemini returned no candidates");
            return Ok(ProviderResponse {
                content: Content {
                    role: Role::Model,
                    parts: vec![],
                },
                usage,
                model: api.model_version.unwrap_or_else(|| model.to_string()),
            });
        };

        let mut parts = Vec::new();
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(text) = part.text {
                parts.push(Part::Text(text));
            }
            if let Some(call) = part.function_call {
                parts.push(Part::FunctionCall {
                    name: call.name,
                    args: call.args.unwrap_or_else(|| serde_json::json!({})),
                });
            }
            if let Some(data) = part.inline_data {
                let bytes = BASE64.decode(data.data.as_bytes()).map_err(|e| {
                    ProviderError::ApiError {
                        status_code: 200,
                        message: format!("Invalid inline image data: {e}"),
                    }
                })?;
                parts.push(Part::InlineData(ImagePayload {
                    mime_type: data.mime_type,
                    bytes,
                }));
            }
        }

        debug!(
            parts = parts.len(),
            finish_reason = ?candidate.finish_reason,
            "Gemini response parsed"
        );

        Ok(ProviderResponse {
            content: Content {
                role: Role::Model,
                parts,
            },
            usage,
            model: api.model_version.unwrap_or_else(|| model.to_string()),
        })
    }
}

fn to_declaration(def: &ToolDefinition) -> ApiFunctionDeclaration {
    ApiFunctionDeclaration {
        name: def.name.clone(),
        description: def.description.clone(),
        parameters: (!schema::is_empty_object(&def.parameters))
            .then(|| schema::sanitize(&def.parameters)),
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, request.model);
        let body = Self::to_api_request(&request);

        let attachment = match &request.tools {
            ToolAttachment::None => "none",
            ToolAttachment::HostedSearch => "hosted-search",
            ToolAttachment::Functions(_) => "functions",
        };
        debug!(
            model = %request.model,
            contents = request.contents.len(),
            attachment,
            "Sending generateContent request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Gemini returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        Self::from_api_response(api_response, &request.model)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

// --- Gemini API types (internal) ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequest {
    contents: Vec<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiTool>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ApiPart>,
}

impl From<&Content> for ApiContent {
    fn from(content: &Content) -> Self {
        ApiContent {
            role: Some(content.role.as_str().to_string()),
            parts: content.parts.iter().map(ApiPart::from).collect(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<ApiFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<ApiFunctionResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<ApiInlineData>,
}

impl ApiPart {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            ..Default::default()
        }
    }
}

impl From<&Part> for ApiPart {
    fn from(part: &Part) -> Self {
        match part {
            Part::Text(t) => ApiPart::text(t.clone()),
            Part::FunctionCall { name, args } => ApiPart {
                function_call: Some(ApiFunctionCall {
                    name: name.clone(),
                    args: Some(args.clone()),
                }),
                ..Default::default()
            },
            Part::FunctionResponse { name, response } => ApiPart {
                function_response: Some(ApiFunctionResponse {
                    name: name.clone(),
                    response: response.clone(),
                }),
                ..Default::default()
            },
            Part::InlineData(img) => ApiPart {
                inline_data: Some(ApiInlineData {
                    mime_type: img.mime_type.clone(),
                    data: BASE64.encode(&img.bytes),
                }),
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunctionCall {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    args: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiTool {
    #[serde(skip_serializing_if = "Option::is_none")]
    google_search: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_declarations: Option<Vec<ApiFunctionDeclaration>>,
}

#[derive(Debug, Serialize)]
struct ApiFunctionDeclaration {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_modalities: Vec<Modality>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
    #[serde(default)]
    usage_metadata: Option<ApiUsage>,
    #[serde(default)]
    prompt_feedback: Option<ApiPromptFeedback>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCandidate {
    #[serde(default)]
    content: Option<ApiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::message::Role;

    fn provider(server: &mockito::Server) -> GeminiProvider {
        GeminiProvider::new("test-key", server.url(), Duration::from_secs(5))
    }

    fn request() -> ProviderRequest {
        let mut req = ProviderRequest::new(
            "gemini-2.0-flash",
            vec![Content::text(Role::User, "こんにちは")],
        );
        req.system_instruction = Some("あなたはコンシェルジュです".into());
        req
    }

    #[test]
    fn hosted_search_serializes_as_google_search() {
        let mut req = request();
        req.tools = ToolAttachment::HostedSearch;
        let body = serde_json::to_value(GeminiProvider::to_api_request(&req)).unwrap();
        assert_eq!(body["tools"], serde_json::json!([{"googleSearch": {}}]));
        assert_eq!(body["generationConfig"]["temperature"], 0.0);
        assert_eq!(body["generationConfig"]["responseModalities"], serde_json::json!(["TEXT"]));
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "あなたはコンシェルジュです");
        assert_eq!(body["contents"][0]["role"], "user");
    }

    #[test]
    fn functions_serialize_as_declarations() {
        let mut req = request();
        req.tools = ToolAttachment::Functions(vec![
            ToolDefinition {
                name: "weather_search".into(),
                description: "天気".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {"location": {"type": "string", "default": "東京"}},
                    "required": ["location"]
                }),
            },
            ToolDefinition {
                name: "list_roles".into(),
                description: "ロール".into(),
                parameters: serde_json::json!({"type": "object", "properties": {}}),
            },
        ]);
        let body = serde_json::to_value(GeminiProvider::to_api_request(&req)).unwrap();
        let decls = &body["tools"][0]["functionDeclarations"];
        assert_eq!(decls[0]["name"], "weather_search");
        assert!(decls[0]["parameters"]["properties"]["location"].get("default").is_none());
        assert!(decls[1].get("parameters").is_none());
    }

    #[test]
    fn no_attachment_omits_tools() {
        let body = serde_json::to_value(GeminiProvider::to_api_request(&request())).unwrap();
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn function_round_trip_parts_serialize() {
        let content = Content {
            role: Role::User,
            parts: vec![Part::FunctionResponse {
                name: "weather_search".into(),
                response: serde_json::json!({"result": "晴れ"}),
            }],
        };
        let api = serde_json::to_value(ApiContent::from(&content)).unwrap();
        assert_eq!(api["parts"][0]["functionResponse"]["name"], "weather_search");
        assert_eq!(api["parts"][0]["functionResponse"]["response"]["result"], "晴れ");
    }

    #[tokio::test]
    async fn complete_parses_text_and_function_calls() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-2.0-flash:generateContent")
            .match_header("x-goog-api-key", "test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"調べます"},{"functionCall":{"name":"weather_search","args":{"location":"東京"}}}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":10,"candidatesTokenCount":5,"totalTokenCount":15}}"#,
            )
            .create_async()
            .await;

        let resp = provider(&server).complete(request()).await.unwrap();
        mock.assert_async().await;

        assert_eq!(resp.content.joined_text().as_deref(), Some("調べます"));
        let calls = resp.content.function_calls();
        assert_eq!(calls, vec![("weather_search", &serde_json::json!({"location": "東京"}))]);
        assert_eq!(resp.usage.unwrap().total_tokens, 15);
        assert_eq!(resp.model, "gemini-2.0-flash");
    }

    #[tokio::test]
    async fn complete_decodes_inline_images() {
        let mut server = mockito::Server::new_async().await;
        let data = BASE64.encode([0x89, b'P', b'N', b'G']);
        let _mock = server
            .mock("POST", mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"candidates":[{{"content":{{"parts":[{{"text":"猫の絵です"}},{{"inlineData":{{"mimeType":"image/png","data":"{data}"}}}}]}}}}]}}"#
            ))
            .create_async()
            .await;

        let resp = provider(&server).complete(request()).await.unwrap();
        let image = resp.content.image().unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.bytes, vec![0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn empty_candidates_yield_empty_content() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#)
            .create_async()
            .await;

        let resp = provider(&server).complete(request()).await.unwrap();
        assert!(resp.content.parts.is_empty());
    }

    #[tokio::test]
    async fn status_codes_map_to_errors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", mockito::Matcher::Any)
            .with_status(429)
            .with_header("retry-after", "12")
            .create_async()
            .await;
        let err = provider(&server).complete(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { retry_after_secs: 12 }));

        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", mockito::Matcher::Any)
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;
        let err = provider(&server).complete(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::ApiError { status_code: 500, .. }));

        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", mockito::Matcher::Any)
            .with_status(403)
            .create_async()
            .await;
        let err = provider(&server).complete(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
    }

    #[test]
    fn debug_hides_key() {
        let p = GeminiProvider::with_key("AIza-secret");
        assert!(!format!("{p:?}").contains("AIza-secret"));
    }
}
