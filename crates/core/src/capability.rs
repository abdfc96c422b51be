//! Capabilities, routing decisions and generated replies.

use serde::{Deserialize, Serialize};

/// Reply text used when the backend produced neither text nor an image.
pub const GENERATION_FAILED: &str = "応答を生成できませんでした。";

/// Name of the subprocess capability that answers search/weather/encyclopedia queries.
pub const SEARCH: &str = "search";

/// Name of the subprocess capability that answers platform (Discord) metadata queries.
pub const DISCORD_METADATA: &str = "discord-metadata";

/// Something that can be attached to a generation request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Capability {
    /// A tool server launched as a subprocess, identified by its descriptor name.
    ToolServer(String),
    /// The backend's built-in hosted search. Always available; no subprocess.
    HostedSearch,
}

impl Capability {
    pub fn tool_server(name: impl Into<String>) -> Self {
        Self::ToolServer(name.into())
    }

    /// Label used in logs.
    pub fn label(&self) -> &str {
        match self {
            Self::ToolServer(name) => name,
            Self::HostedSearch => "hosted-search",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Ordered list of capabilities to try for one request.
///
/// Always non-empty and always ends with [`Capability::HostedSearch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    candidates: Vec<Capability>,
}

impl RoutingDecision {
    /// Build a decision from preferred candidates; the terminal fallback is appended.
    pub fn new(preferred: impl IntoIterator<Item = Capability>) -> Self {
        let mut candidates: Vec<Capability> = preferred
            .into_iter()
            .filter(|c| *c != Capability::HostedSearch)
            .collect();
        candidates.push(Capability::HostedSearch);
        Self { candidates }
    }

    /// A decision that consists of the terminal fallback only.
    pub fn fallback_only() -> Self {
        Self::new(std::iter::empty())
    }

    pub fn first(&self) -> &Capability {
        // Invariant: never empty, see `new`.
        &self.candidates[0]
    }

    pub fn candidates(&self) -> &[Capability] {
        &self.candidates
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Capability> {
        self.candidates.iter()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Always false; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

impl<'a> IntoIterator for &'a RoutingDecision {
    type Item = &'a Capability;
    type IntoIter = std::slice::Iter<'a, Capability>;

    fn into_iter(self) -> Self::IntoIter {
        self.candidates.iter()
    }
}

/// Binary image returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImagePayload {
    /// File extension matching the MIME type, for attachment names.
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }
}

/// Result of one generation: text, an image, or both. Never neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedReply {
    text: Option<String>,
    image: Option<ImagePayload>,
}

impl GeneratedReply {
    /// Build a reply, substituting [`GENERATION_FAILED`] when both parts are absent.
    pub fn new(text: Option<String>, image: Option<ImagePayload>) -> Self {
        Self::with_sentinel(text, image, GENERATION_FAILED)
    }

    /// Like [`GeneratedReply::new`] with a caller-chosen sentinel.
    pub fn with_sentinel(
        text: Option<String>,
        image: Option<ImagePayload>,
        sentinel: &str,
    ) -> Self {
        let text = text.filter(|t| !t.trim().is_empty());
        if text.is_none() && image.is_none() {
            return Self {
                text: Some(sentinel.to_string()),
                image: None,
            };
        }
        Self { text, image }
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn image(&self) -> Option<&ImagePayload> {
        self.image.as_ref()
    }

    pub fn into_parts(self) -> (Option<String>, Option<ImagePayload>) {
        (self.text, self.image)
    }

    /// Whether this reply is the "generation failed" sentinel.
    pub fn is_failure_sentinel(&self) -> bool {
        self.image.is_none() && self.text.as_deref() == Some(GENERATION_FAILED)
    }
}
