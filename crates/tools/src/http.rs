//! Shared HTTP plumbing for operations that perform one remote lookup.

use std::time::Duration;

use concierge_core::error::ToolError;

/// Bound for a single outbound lookup.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

const USER_AGENT: &str = concat!("concierge/", env!("CARGO_PKG_VERSION"));

/// Build a client with the lookup timeout applied to every request.
pub fn client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "HTTP client builder failed, using defaults");
            reqwest::Client::new()
        })
}

/// Parse `base` and append `segments` as percent-encoded path segments.
pub fn join_segments<'a>(
    base: &str,
    segments: impl IntoIterator<Item = &'a str>,
) -> Result<reqwest::Url, ToolError> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|e| ToolError::InvalidArguments(format!("bad base URL '{base}': {e}")))?;
    url.path_segments_mut()
        .map_err(|_| ToolError::InvalidArguments(format!("base URL '{base}' cannot have a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Map a transport failure into a tool error for `tool`.
pub fn request_failed(tool: &str, e: reqwest::Error) -> ToolError {
    if e.is_timeout() {
        ToolError::Timeout {
            tool_name: tool.to_string(),
            timeout_secs: LOOKUP_TIMEOUT.as_secs(),
        }
    } else {
        ToolError::ExecutionFailed {
            tool_name: tool.to_string(),
            reason: e.to_string(),
        }
    }
}

/// Fetch a required string argument.
pub fn required_str<'a>(arguments: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolError> {
    arguments[key]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_are_encoded() {
        let url = join_segments("https://ja.wikipedia.org/", ["api", "rest_v1", "page", "summary", "東京 タワー"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://ja.wikipedia.org/api/rest_v1/page/summary/%E6%9D%B1%E4%BA%AC%20%E3%82%BF%E3%83%AF%E3%83%BC"
        );
    }

    #[test]
    fn slashes_in_segments_are_escaped() {
        let url = join_segments("http://127.0.0.1:1234", ["summary", "AC/DC"]).unwrap();
        assert!(url.path().ends_with("/summary/AC%2FDC"));
    }

    #[test]
    fn blank_arguments_are_missing() {
        let args = serde_json::json!({"query": "  ", "location": "東京"});
        assert!(required_str(&args, "query").is_err());
        assert!(required_str(&args, "nope").is_err());
        assert_eq!(required_str(&args, "location").unwrap(), "東京");
    }
}
