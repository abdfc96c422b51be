//! Server side: answer `initialize`, `tools/list`, and `tools/call` for a
//! [`ToolRegistry`] over a line-delimited byte stream.

use concierge_core::tool::ToolRegistry;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::types::{
    Implementation, InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    PROTOCOL_VERSION, ServerCapabilities, ToolContent, ToolDef, ToolsCallParams, ToolsCallResult,
    ToolsCapability, ToolsListResult,
};

/// A tool server: a registry of operations plus the handshake state.
pub struct ToolServer {
    info: Implementation,
    registry: ToolRegistry,
    initialized: bool,
}

impl ToolServer {
    pub fn new(name: impl Into<String>, registry: ToolRegistry) -> Self {
        Self {
            info: Implementation {
                name: name.into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
            registry,
            initialized: false,
        }
    }

    pub fn info(&self) -> &Implementation {
        &self.info
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Serve requests until the reader reaches end of input.
    pub async fn serve<R, W>(mut self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!(server = %self.info.name, tools = ?self.registry.names(), "Tool server ready");

        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let Some(resp) = self.handle_line(&line).await else {
                continue;
            };
            let mut payload = serde_json::to_string(&resp)?;
            payload.push('\n');
            writer.write_all(payload.as_bytes()).await?;
            writer.flush().await?;
        }

        info!(server = %self.info.name, "Input closed, tool server exiting");
        Ok(())
    }

    /// Serve on this process's stdin/stdout.
    pub async fn serve_stdio(self) -> std::io::Result<()> {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        self.serve(stdin, tokio::io::stdout()).await
    }

    /// Handle one raw line. Returns `None` for blank lines and notifications.
    pub async fn handle_line(&mut self, line: &str) -> Option<JsonRpcResponse> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        let value: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Unparseable request line");
                return Some(JsonRpcResponse::failure(Value::Null, JsonRpcError::parse_error(e)));
            }
        };

        let request: JsonRpcRequest = match serde_json::from_value(value.clone()) {
            Ok(r) => r,
            Err(e) => {
                let id = value.get("id").cloned().unwrap_or(Value::Null);
                return Some(JsonRpcResponse::failure(
                    id,
                    JsonRpcError::new(crate::types::INVALID_REQUEST, format!("Invalid request: {e}")),
                ));
            }
        };

        self.handle_request(request).await
    }

    /// Dispatch a parsed request or notification.
    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let Some(id) = request.id.clone() else {
            self.handle_notification(&request);
            return None;
        };
        debug!(method = %request.method, id = %id, "client -> server");

        let outcome = match request.method.as_str() {
            "initialize" => Ok(self.handle_initialize()),
            "ping" => Ok(serde_json::json!({})),
            _ if !self.initialized => Err(JsonRpcError::not_initialized()),
            "tools/list" => Ok(self.handle_tools_list()),
            "tools/call" => self.handle_tools_call(request.params).await,
            other => Err(JsonRpcError::method_not_found(other)),
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(id, error),
        })
    }

    fn handle_notification(&mut self, request: &JsonRpcRequest) {
        match request.method.as_str() {
            "notifications/initialized" => debug!("Client confirmed initialization"),
            other => debug!(method = %other, "Ignoring notification"),
        }
    }

    fn handle_initialize(&mut self) -> Value {
        self.initialized = true;
        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
            },
            server_info: self.info.clone(),
        };
        serde_json::to_value(result).unwrap_or(Value::Null)
    }

    fn handle_tools_list(&self) -> Value {
        let tools = self
            .registry
            .catalog()
            .operations
            .into_iter()
            .map(|op| ToolDef {
                name: op.name,
                description: op.description,
                input_schema: op.input_schema,
            })
            .collect();
        serde_json::to_value(ToolsListResult { tools }).unwrap_or(Value::Null)
    }

    async fn handle_tools_call(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: ToolsCallParams = params
            .ok_or_else(|| JsonRpcError::invalid_params("missing params"))
            .and_then(|p| serde_json::from_value(p).map_err(JsonRpcError::invalid_params))?;

        info!(tool = %params.name, "Executing tool");
        let output = self.registry.dispatch(&params.name, params.arguments).await;

        let result = ToolsCallResult {
            content: vec![ToolContent::Text { text: output.text }],
            is_error: output.is_error,
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::new(crate::types::INTERNAL_ERROR, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{METHOD_NOT_FOUND, NOT_INITIALIZED, PARSE_ERROR};
    use async_trait::async_trait;
    use concierge_core::error::ToolError;
    use concierge_core::tool::{Tool, ToolOutput};

    struct Greet;

    #[async_trait]
    impl Tool for Greet {
        fn name(&self) -> &str {
            "greet"
        }
        fn description(&self) -> &str {
            "Say hello"
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            })
        }
        async fn execute(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
            let name = arguments["name"]
                .as_str()
                .ok_or_else(|| ToolError::InvalidArguments("name is required".into()))?;
            Ok(ToolOutput::text(format!("こんにちは、{name}さん")))
        }
    }

    fn server() -> ToolServer {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(Greet));
        ToolServer::new("test", registry)
    }

    async fn initialized() -> ToolServer {
        let mut s = server();
        s.handle_line(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"t","version":"0"}}}"#)
            .await
            .unwrap();
        s
    }

    #[tokio::test]
    async fn initialize_reports_server_info() {
        let mut s = server();
        let resp = s
            .handle_line(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#)
            .await
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "test");
        assert!(s.is_initialized());
    }

    #[tokio::test]
    async fn requests_before_initialize_are_rejected() {
        let mut s = server();
        let resp = s
            .handle_line(r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#)
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, NOT_INITIALIZED);
        assert_eq!(resp.id, serde_json::json!(7));
    }

    #[tokio::test]
    async fn notifications_get_no_reply() {
        let mut s = initialized().await;
        let resp = s
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        assert!(resp.is_none());
        assert!(s.handle_line("   ").await.is_none());
    }

    #[tokio::test]
    async fn garbage_is_a_parse_error() {
        let mut s = server();
        let resp = s.handle_line("{not json").await.unwrap();
        assert_eq!(resp.error.unwrap().code, PARSE_ERROR);
        assert_eq!(resp.id, Value::Null);
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let mut s = initialized().await;
        let resp = s
            .handle_line(r#"{"jsonrpc":"2.0","id":2,"method":"resources/list"}"#)
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn tools_list_and_call() {
        let mut s = initialized().await;
        let list = s
            .handle_line(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#)
            .await
            .unwrap()
            .result
            .unwrap();
        assert_eq!(list["tools"][0]["name"], "greet");
        assert_eq!(list["tools"][0]["inputSchema"]["required"][0], "name");

        let call = s
            .handle_line(r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"greet","arguments":{"name":"太郎"}}}"#)
            .await
            .unwrap()
            .result
            .unwrap();
        assert_eq!(call["content"][0]["type"], "text");
        assert_eq!(call["content"][0]["text"], "こんにちは、太郎さん");
        assert_eq!(call["isError"], false);
    }

    #[tokio::test]
    async fn unknown_tool_is_a_negative_result() {
        let mut s = initialized().await;
        let call = s
            .handle_line(r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"nope","arguments":{}}}"#)
            .await
            .unwrap()
            .result
            .unwrap();
        assert_eq!(call["isError"], true);
        assert_eq!(call["content"][0]["text"], "Unknown tool: nope");
    }

    #[tokio::test]
    async fn serve_over_in_memory_stream() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"greet","arguments":{"name":"花子"}}}"#,
            "\n",
        );
        let mut output = Vec::new();
        server()
            .serve(tokio::io::BufReader::new(input.as_bytes()), &mut output)
            .await
            .unwrap();

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: JsonRpcResponse = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.id, serde_json::json!(2));
        assert_eq!(second.result.unwrap()["content"][0]["text"], "こんにちは、花子さん");
    }
}
