//! Web and encyclopedia search operations of the search tool server.

use async_trait::async_trait;
use concierge_core::error::ToolError;
use concierge_core::tool::{Tool, ToolOutput};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::http::{self, required_str};

/// Remote endpoints used by the search operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchEndpoints {
    /// DuckDuckGo Instant Answer API.
    pub instant_answer: String,
    /// Wikipedia site root; `{lang}` is replaced by the language code.
    pub wikipedia: String,
}

impl Default for SearchEndpoints {
    fn default() -> Self {
        Self {
            instant_answer: "https://api.duckduckgo.com/".into(),
            wikipedia: "https://{lang}.wikipedia.org".into(),
        }
    }
}

// ── google_search ───────────────────────────────────────────────────

pub struct GoogleSearchTool {
    client: reqwest::Client,
    endpoint: String,
}

impl GoogleSearchTool {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    async fn lookup(&self, query: &str) -> Result<InstantAnswer, ToolError> {
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| http::request_failed(self.name(), e))?;

        resp.json()
            .await
            .map_err(|e| http::request_failed(self.name(), e))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstantAnswer {
    #[serde(default)]
    r#abstract: String,
    #[serde(default)]
    related_topics: Vec<serde_json::Value>,
}

/// Render an instant answer the way the search server reports it.
fn render_instant_answer(query: &str, answer: &InstantAnswer, num_results: usize) -> String {
    let mut results = Vec::new();
    if !answer.r#abstract.is_empty() {
        results.push(format!("要約: {}", answer.r#abstract));
    }
    // Topic groups carry no "Text" of their own and are skipped.
    results.extend(
        answer
            .related_topics
            .iter()
            .take(num_results)
            .filter_map(|topic| topic.get("Text").and_then(|t| t.as_str()))
            .filter(|text| !text.is_empty())
            .map(|text| format!("関連: {text}")),
    );
    if results.is_empty() {
        results.push(format!("'{query}'に関する詳細な情報は見つかりませんでした。"));
    }
    results.truncate(num_results.max(1));

    format!("検索クエリ: {query}\n\n{}", results.join("\n\n"))
}

#[async_trait]
impl Tool for GoogleSearchTool {
    fn name(&self) -> &str {
        "google_search"
    }

    fn description(&self) -> &str {
        "Google検索を実行して結果を取得する"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "検索クエリ"
                },
                "num_results": {
                    "type": "integer",
                    "description": "取得する検索結果の数（デフォルト: 5）",
                    "default": 5
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let query = required_str(&arguments, "query")?;
        let num_results = arguments["num_results"].as_u64().unwrap_or(5).clamp(1, 20) as usize;

        match self.lookup(query).await {
            Ok(answer) => {
                debug!(query = %query, "Web search completed");
                Ok(ToolOutput::text(render_instant_answer(query, &answer, num_results)))
            }
            Err(e) => {
                warn!(query = %query, error = %e, "Web search failed");
                Ok(ToolOutput::error(format!("検索エラー: {e}")))
            }
        }
    }
}

// ── wikipedia_search ────────────────────────────────────────────────

pub struct WikipediaSearchTool {
    client: reqwest::Client,
    site_template: String,
}

#[derive(Debug, Deserialize)]
struct PageSummary {
    title: Option<String>,
    extract: Option<String>,
    content_urls: Option<ContentUrls>,
}

#[derive(Debug, Deserialize)]
struct ContentUrls {
    desktop: Option<PageUrl>,
}

#[derive(Debug, Deserialize)]
struct PageUrl {
    page: Option<String>,
}

impl PageSummary {
    fn render(&self) -> String {
        let title = self.title.as_deref().unwrap_or("不明");
        let extract = self
            .extract
            .as_deref()
            .filter(|e| !e.is_empty())
            .unwrap_or("概要が見つかりませんでした。");
        let mut text = format!("Wikipedia: {title}\n\n{extract}");
        if let Some(page) = self
            .content_urls
            .as_ref()
            .and_then(|u| u.desktop.as_ref())
            .and_then(|d| d.page.as_deref())
        {
            text.push_str(&format!("\n\n詳細: {page}"));
        }
        text
    }
}

impl WikipediaSearchTool {
    pub fn new(client: reqwest::Client, site_template: impl Into<String>) -> Self {
        Self {
            client,
            site_template: site_template.into(),
        }
    }

    async fn summary(&self, query: &str, language: &str) -> Result<Option<PageSummary>, ToolError> {
        if language.is_empty() || !language.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ToolError::InvalidArguments(format!("invalid language code '{language}'")));
        }
        let site = self.site_template.replace("{lang}", language);
        let url = http::join_segments(&site, ["api", "rest_v1", "page", "summary", query])?;

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| http::request_failed(self.name(), e))?;

        if resp.status() != reqwest::StatusCode::OK {
            debug!(status = %resp.status(), query = %query, "No Wikipedia summary");
            return Ok(None);
        }
        resp.json()
            .await
            .map(Some)
            .map_err(|e| http::request_failed(self.name(), e))
    }
}

#[async_trait]
impl Tool for WikipediaSearchTool {
    fn name(&self) -> &str {
        "wikipedia_search"
    }

    fn description(&self) -> &str {
        "Wikipedia検索を実行して記事の概要を取得する"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Wikipedia検索クエリ"
                },
                "language": {
                    "type": "string",
                    "description": "言語コード（ja, en など）",
                    "default": "ja"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let query = required_str(&arguments, "query")?;
        let language = arguments["language"].as_str().unwrap_or("ja");

        match self.summary(query, language).await {
            Ok(Some(page)) => Ok(ToolOutput::text(page.render())),
            Ok(None) => Ok(ToolOutput::text(format!(
                "'{query}'に関するWikipedia記事が見つかりませんでした。"
            ))),
            Err(e) => {
                warn!(query = %query, error = %e, "Wikipedia search failed");
                Ok(ToolOutput::error(format!("Wikipedia検索エラー: {e}")))
            }
        }
    }
}
