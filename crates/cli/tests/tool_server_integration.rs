//! End-to-end tests against the real `concierge` binary.
//!
//! The search tool server is launched as a subprocess exactly as the relay
//! launches it, and driven over stdio.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use concierge_agent::{CapabilityRouter, ClientSettings, ConversationalClient, Dispatcher, RelayOrchestrator};
use concierge_config::RoutingConfig;
use concierge_core::error::{ProviderError, SessionError};
use concierge_core::message::Role;
use concierge_core::provider::{Content, Part, Provider, ProviderRequest, ProviderResponse};
use concierge_core::tool::ToolDescriptor;
use concierge_mcp::{SessionTimeouts, ToolSession};

const BIN: &str = env!("CARGO_BIN_EXE_concierge");

fn search_server() -> ToolDescriptor {
    ToolDescriptor::new("search", BIN).with_args(["tool-server", "search"])
}

fn timeouts() -> SessionTimeouts {
    SessionTimeouts {
        handshake: Duration::from_secs(10),
        request: Duration::from_secs(10),
    }
}

// ── Mock Provider ────────────────────────────────────────────────────────

/// Replays scripted contents and records every request.
struct ScriptedProvider {
    script: Mutex<Vec<Content>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(script: Vec<Content>) -> Self {
        Self {
            script: Mutex::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            panic!("ScriptedProvider exhausted");
        }
        Ok(ProviderResponse {
            content: script.remove(0),
            usage: None,
            model: request.model,
        })
    }
}

fn process_exists(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists()
}

fn settings() -> ClientSettings {
    ClientSettings {
        model: "mock-model".into(),
        image_model: "mock-image-model".into(),
        system_prompt: String::new(),
        max_tool_rounds: 10,
    }
}

// ── Session lifecycle ────────────────────────────────────────────────────

#[tokio::test]
async fn search_server_advertises_its_catalog() {
    let mut session = ToolSession::open(&search_server(), timeouts()).await.unwrap();
    assert_eq!(
        session.server_info().map(|i| i.name.as_str()),
        Some("concierge-search")
    );

    let catalog = session.catalog().await.unwrap();
    assert_eq!(
        catalog.names(),
        vec!["google_search", "weather_search", "wikipedia_search"]
    );
    let weather = catalog.get("weather_search").unwrap().parameters();
    assert_eq!(weather[0].name, "location");
    assert!(weather[0].required);

    let pid = session.pid().unwrap();
    session.close().await;
    assert!(!process_exists(pid));
    session.close().await;
    assert!(session.is_closed());
}

#[tokio::test]
async fn weather_call_returns_text() {
    let mut session = ToolSession::open(&search_server(), timeouts()).await.unwrap();
    let output = session
        .call_tool("weather_search", serde_json::json!({"location": "東京"}))
        .await
        .unwrap();
    session.close().await;

    assert!(!output.is_error);
    assert!(output.text.starts_with("東京の天気情報"));
}

#[tokio::test]
async fn negative_results_are_not_errors() {
    let mut session = ToolSession::open(&search_server(), timeouts()).await.unwrap();

    let unknown = session.call_tool("nope", serde_json::json!({})).await.unwrap();
    assert!(unknown.is_error);
    assert_eq!(unknown.text, "Unknown tool: nope");

    let bad_args = session
        .call_tool("weather_search", serde_json::json!({}))
        .await
        .unwrap();
    assert!(bad_args.is_error);

    let bad_language = session
        .call_tool(
            "wikipedia_search",
            serde_json::json!({"query": "東京", "language": "../etc"}),
        )
        .await
        .unwrap();
    assert!(bad_language.is_error);

    // The server survives all of the above.
    assert!(session.is_alive().await);
    session.close().await;
}

#[tokio::test]
async fn independent_sessions_per_request() {
    let mut first = ToolSession::open(&search_server(), timeouts()).await.unwrap();
    let mut second = ToolSession::open(&search_server(), timeouts()).await.unwrap();
    let (first_pid, second_pid) = (first.pid().unwrap(), second.pid().unwrap());
    assert_ne!(first_pid, second_pid);

    let (output, ()) = tokio::join!(
        second.call_tool("weather_search", serde_json::json!({"location": "大阪"})),
        async {
            first.close().await;
            assert!(!process_exists(first_pid));
        }
    );
    assert!(output.unwrap().text.contains("大阪"));
    assert!(process_exists(second_pid));
    second.close().await;
    assert!(!process_exists(second_pid));
}

#[tokio::test]
async fn discord_server_without_credentials_fails_handshake() {
    let descriptor = ToolDescriptor::new("discord-metadata", BIN).with_args(["tool-server", "discord"]);
    let err = ToolSession::open(&descriptor, timeouts()).await.unwrap_err();
    assert!(matches!(err, SessionError::Handshake { .. }), "got {err:?}");
}

// ── Relay scenario ───────────────────────────────────────────────────────

#[tokio::test]
async fn weather_question_is_answered_through_search_server() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Content {
            role: Role::Model,
            parts: vec![Part::FunctionCall {
                name: "weather_search".into(),
                args: serde_json::json!({"location": "東京"}),
            }],
        },
        Content::text(Role::Model, "東京の天気をお伝えします。"),
    ]));
    let client = Arc::new(ConversationalClient::new(provider.clone(), settings()));
    let dispatcher = Dispatcher::new(Arc::clone(&client), vec![search_server()])
        .with_session_timeouts(timeouts());
    let relay = RelayOrchestrator::new(
        CapabilityRouter::from_config(&RoutingConfig::default()),
        dispatcher,
        client,
    );

    let reply = relay.respond("c1", "東京の天気を教えて", None).await;
    assert_eq!(reply.text(), Some("東京の天気をお伝えします。"));

    let requests = provider.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    match &requests[1].contents.last().unwrap().parts[0] {
        Part::FunctionResponse { name, response } => {
            assert_eq!(name, "weather_search");
            assert!(response["content"].as_str().unwrap().contains("東京"));
        }
        other => panic!("expected a function response, got {other:?}"),
    }
    drop(requests);

    let history = relay.history("c1").await;
    assert_eq!(history.len(), 2);
}

// ── CLI surface ──────────────────────────────────────────────────────────

#[test]
fn classify_prints_routing_chain() {
    let dir = tempfile::tempdir().unwrap();
    let run = |text: &str| {
        let out = std::process::Command::new(BIN)
            .current_dir(dir.path())
            .args(["--config", &dir.path().join("none.toml").display().to_string()])
            .args(["classify", text])
            .output()
            .unwrap();
        assert!(out.status.success());
        String::from_utf8(out.stdout).unwrap().trim().to_string()
    };

    assert_eq!(run("東京の天気を教えて"), "search -> hosted-search");
    assert_eq!(run("メンバーリストを見せて"), "discord-metadata -> hosted-search");
    assert_eq!(run("こんにちは"), "hosted-search");
}
