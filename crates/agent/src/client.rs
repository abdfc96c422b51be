//! The conversational client: one generation, optionally augmented.
//!
//! With a live tool session attached, the session's catalog is sent as
//! function declarations and the client runs the function-calling loop:
//! every function call the model makes is executed on the session and its
//! result fed back, until the model answers with text or the round limit is
//! reached. Intermediate rounds never touch the [`Conversation`].

use std::sync::Arc;

use async_trait::async_trait;
use concierge_core::capability::{GeneratedReply, ImagePayload};
use concierge_core::channel::InboundAttachment;
use concierge_core::error::{ProviderError, SessionError};
use concierge_core::message::{Conversation, Role};
use concierge_core::provider::{
    Content, Modality, Part, Provider, ProviderRequest, ToolAttachment,
};
use concierge_core::tool::{ToolCatalog, ToolOutput};
use concierge_mcp::ToolSession;
use tracing::{debug, info, warn};

/// Reply text when image generation fails.
pub const IMAGE_FAILED: &str = "画像生成に失敗しました。";

/// Every backend call samples greedily so replies are reproducible.
pub const TEMPERATURE: f32 = 0.0;

/// Something that can execute the model's function calls.
#[async_trait]
pub trait FunctionHost: Send + Sync {
    /// Name used in logs.
    fn host_name(&self) -> &str;

    async fn call_function(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, SessionError>;
}

#[async_trait]
impl FunctionHost for ToolSession {
    fn host_name(&self) -> &str {
        self.server()
    }

    async fn call_function(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, SessionError> {
        self.call_tool(name, arguments).await
    }
}

/// The single capability attached to one generation.
#[derive(Clone, Copy)]
pub enum Augmentation<'a> {
    None,
    HostedSearch,
    Functions {
        host: &'a dyn FunctionHost,
        catalog: &'a ToolCatalog,
    },
}

impl Augmentation<'_> {
    fn label(&self) -> &str {
        match self {
            Self::None => "none",
            Self::HostedSearch => "hosted-search",
            Self::Functions { host, .. } => host.host_name(),
        }
    }
}

/// Settings for [`ConversationalClient`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub model: String,
    pub image_model: String,
    pub system_prompt: String,
    pub max_tool_rounds: u32,
}

impl ClientSettings {
    pub fn from_config(config: &concierge_config::AppConfig) -> Self {
        Self {
            model: config.model.clone(),
            image_model: config.image_model.clone(),
            system_prompt: config.persona.resolve(),
            max_tool_rounds: config.max_tool_rounds,
        }
    }
}

/// Wraps the generation backend.
pub struct ConversationalClient {
    provider: Arc<dyn Provider>,
    settings: ClientSettings,
}

impl ConversationalClient {
    pub fn new(provider: Arc<dyn Provider>, settings: ClientSettings) -> Self {
        Self { provider, settings }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Generate a reply to `conversation`.
    ///
    /// `attachment` is sent inline with the last user turn when it is an image.
    pub async fn generate(
        &self,
        conversation: &Conversation,
        attachment: Option<&InboundAttachment>,
        augmentation: Augmentation<'_>,
    ) -> Result<GeneratedReply, ProviderError> {
        let mut contents = thread_contents(conversation, attachment);

        let tools = match augmentation {
            Augmentation::None => ToolAttachment::None,
            Augmentation::HostedSearch => ToolAttachment::HostedSearch,
            Augmentation::Functions { catalog, .. } => {
                ToolAttachment::Functions(catalog.definitions())
            }
        };

        debug!(
            turns = conversation.len(),
            augmentation = augmentation.label(),
            "Generating reply"
        );

        let mut round = 0;
        loop {
            let response = self
                .provider
                .complete(self.request(contents.clone(), tools.clone()))
                .await?;
            let content = response.content;

            let calls: Vec<(String, serde_json::Value)> = content
                .function_calls()
                .into_iter()
                .map(|(name, args)| (name.to_string(), args.clone()))
                .collect();

            let Augmentation::Functions { host, .. } = augmentation else {
                return Ok(reply_from(&content));
            };
            if calls.is_empty() {
                return Ok(reply_from(&content));
            }

            round += 1;
            if round > self.settings.max_tool_rounds {
                warn!(
                    server = host.host_name(),
                    rounds = self.settings.max_tool_rounds,
                    "Function-calling round limit reached"
                );
                return Ok(reply_from(&content));
            }

            let mut responses = Vec::with_capacity(calls.len());
            for (name, args) in calls {
                info!(server = host.host_name(), tool = %name, round, "Executing function call");
                let output = host
                    .call_function(&name, args)
                    .await
                    .map_err(|e| ProviderError::ToolRoundTrip(e.to_string()))?;
                responses.push(Part::FunctionResponse {
                    response: function_response(&output),
                    name,
                });
            }

            contents.push(content);
            contents.push(Content {
                role: Role::User,
                parts: responses,
            });
        }
    }

    /// Generate an image (and optional text) for `prompt`.
    ///
    /// Never fails: backend errors become the image failure sentinel.
    pub async fn generate_image(&self, prompt: &str) -> GeneratedReply {
        let mut request = ProviderRequest::new(
            self.settings.image_model.clone(),
            vec![Content::text(Role::User, prompt)],
        );
        request.temperature = TEMPERATURE;
        request.response_modalities = vec![Modality::Text, Modality::Image];

        match self.provider.complete(request).await {
            Ok(response) => {
                let (text, image) = parts_of(&response.content);
                GeneratedReply::with_sentinel(text, image, IMAGE_FAILED)
            }
            Err(e) => {
                warn!(error = %e, "Image generation failed");
                GeneratedReply::with_sentinel(None, None, IMAGE_FAILED)
            }
        }
    }

    fn request(&self, contents: Vec<Content>, tools: ToolAttachment) -> ProviderRequest {
        let mut request = ProviderRequest::new(self.settings.model.clone(), contents);
        request.temperature = TEMPERATURE;
        request.tools = tools;
        if !self.settings.system_prompt.is_empty() {
            request.system_instruction = Some(self.settings.system_prompt.clone());
        }
        request
    }
}

fn thread_contents(
    conversation: &Conversation,
    attachment: Option<&InboundAttachment>,
) -> Vec<Content> {
    let mut contents: Vec<Content> = conversation.turns().iter().map(Content::from).collect();

    let image = attachment.and_then(|a| {
        let mime = a.mime_type.as_deref()?;
        mime.starts_with("image/").then(|| ImagePayload {
            mime_type: mime.to_string(),
            bytes: a.bytes.clone(),
        })
    });
    if let Some(image) = image {
        match contents.iter_mut().rev().find(|c| c.role == Role::User) {
            Some(last_user) => last_user.parts.push(Part::InlineData(image)),
            None => contents.push(Content {
                role: Role::User,
                parts: vec![Part::InlineData(image)],
            }),
        }
    }
    contents
}

fn function_response(output: &ToolOutput) -> serde_json::Value {
    if output.is_error {
        serde_json::json!({ "error": output.text })
    } else {
        serde_json::json!({ "content": output.text })
    }
}

fn parts_of(content: &Content) -> (Option<String>, Option<ImagePayload>) {
    (content.joined_text(), content.image().cloned())
}

fn reply_from(content: &Content) -> GeneratedReply {
    let (text, image) = parts_of(content);
    GeneratedReply::new(text, image)
}
