//! Client side of one tool-server session.
//!
//! A session owns exactly one child process. It is opened for a single
//! request, used, and closed; sessions are never shared across requests.

use std::time::Duration;

use concierge_core::error::SessionError;
use concierge_core::tool::{OperationSpec, ToolCatalog, ToolDescriptor, ToolOutput};
use tracing::{debug, info, warn};

use crate::transport::{StdioTransport, TransportError};
use crate::types::{
    Implementation, InitializeParams, InitializeResult, JsonRpcResponse, PROTOCOL_VERSION,
    ToolsCallParams, ToolsCallResult, ToolsListResult,
};

/// Bounded waits for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// The `initialize` round trip.
    pub handshake: Duration,
    /// Every later request.
    pub request: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(10),
            request: Duration::from_secs(30),
        }
    }
}

/// A live connection to one tool server.
pub struct ToolSession {
    server: String,
    transport: Option<StdioTransport>,
    pid: Option<u32>,
    timeouts: SessionTimeouts,
    server_info: Option<Implementation>,
}

impl std::fmt::Debug for ToolSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSession")
            .field("server", &self.server)
            .field("open", &self.transport.is_some())
            .field("pid", &self.pid)
            .field("server_info", &self.server_info)
            .finish()
    }
}

impl ToolSession {
    /// Launch the server described by `descriptor` and complete the handshake.
    ///
    /// On any failure the child process is terminated before returning.
    pub async fn open(
        descriptor: &ToolDescriptor,
        timeouts: SessionTimeouts,
    ) -> Result<Self, SessionError> {
        let server = descriptor.name.clone();

        let missing = descriptor.missing_env();
        if !missing.is_empty() {
            return Err(SessionError::Launch {
                server,
                reason: format!("missing environment: {}", missing.join(", ")),
            });
        }

        let transport = StdioTransport::spawn(&descriptor.command, &descriptor.args, &descriptor.env)
            .map_err(|e| SessionError::Launch {
                server: server.clone(),
                reason: e.to_string(),
            })?;

        let mut session = Self {
            server,
            pid: transport.pid(),
            transport: Some(transport),
            timeouts,
            server_info: None,
        };

        if let Err(e) = session.initialize().await {
            warn!(server = %session.server, error = %e, "Tool server handshake failed");
            session.close().await;
            return Err(e);
        }
        Ok(session)
    }

    async fn initialize(&mut self) -> Result<(), SessionError> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: serde_json::json!({}),
            client_info: Implementation {
                name: "concierge".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        };
        let params = serde_json::to_value(&params).map_err(|e| self.handshake_error(e))?;

        let transport = self.transport()?;
        let resp = transport
            .request("initialize", Some(params), self.timeouts.handshake)
            .await
            .map_err(|e| self.handshake_error(e))?;

        if let Some(err) = resp.error {
            return Err(self.handshake_error(err));
        }
        let result = resp
            .result
            .ok_or_else(|| self.handshake_error("initialize returned no result"))?;
        let result: InitializeResult =
            serde_json::from_value(result).map_err(|e| self.handshake_error(e))?;

        info!(
            server = %self.server,
            protocol = %result.protocol_version,
            server_name = %result.server_info.name,
            "Tool server initialized"
        );

        transport
            .notify("notifications/initialized", None)
            .await
            .map_err(|e| self.handshake_error(e))?;
        self.server_info = Some(result.server_info);
        Ok(())
    }

    /// The capability name this session serves.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Name and version the server reported during the handshake.
    pub fn server_info(&self) -> Option<&Implementation> {
        self.server_info.as_ref()
    }

    /// Fetch the operations this server advertises.
    pub async fn catalog(&self) -> Result<ToolCatalog, SessionError> {
        let result = self.call("tools/list", None).await?;
        let list: ToolsListResult =
            serde_json::from_value(result).map_err(|e| self.protocol_error(e))?;

        debug!(server = %self.server, count = list.tools.len(), "Fetched tool catalog");

        Ok(ToolCatalog::new(
            list.tools
                .into_iter()
                .map(|t| OperationSpec {
                    name: t.name,
                    description: t.description,
                    input_schema: t.input_schema,
                })
                .collect(),
        ))
    }

    /// Invoke one operation. Negative results (`isError`) are returned, not raised.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, SessionError> {
        let params = ToolsCallParams {
            name: name.into(),
            arguments,
        };
        let params = serde_json::to_value(&params).map_err(|e| self.protocol_error(e))?;

        debug!(server = %self.server, tool = %name, "Calling tool");
        let result = self.call("tools/call", Some(params)).await?;
        let result: ToolsCallResult =
            serde_json::from_value(result).map_err(|e| self.protocol_error(e))?;

        Ok(ToolOutput {
            text: result.joined_text(),
            is_error: result.is_error,
        })
    }

    /// OS process id of the server. Still reported after [`close`](Self::close).
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the server process is still running.
    pub async fn is_alive(&self) -> bool {
        match &self.transport {
            Some(t) => t.is_alive().await,
            None => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    /// Terminate the server process. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.shutdown().await;
            debug!(server = %self.server, "Tool session closed");
        }
    }

    async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, SessionError> {
        let transport = self.transport()?;
        let resp = transport
            .request(method, params, self.timeouts.request)
            .await
            .map_err(|e| match e {
                TransportError::Timeout(d) => SessionError::Timeout {
                    server: self.server.clone(),
                    operation: method.to_string(),
                    timeout_ms: d.as_millis() as u64,
                },
                other => self.protocol_error(other),
            })?;
        self.unwrap_result(method, resp)
    }

    fn unwrap_result(
        &self,
        method: &str,
        resp: JsonRpcResponse,
    ) -> Result<serde_json::Value, SessionError> {
        if let Some(err) = resp.error {
            return Err(self.protocol_error(format!("{method}: {err}")));
        }
        resp.result
            .ok_or_else(|| self.protocol_error(format!("{method} returned no result")))
    }

    fn transport(&self) -> Result<&StdioTransport, SessionError> {
        self.transport
            .as_ref()
            .ok_or_else(|| self.protocol_error("session is closed"))
    }

    fn handshake_error(&self, reason: impl std::fmt::Display) -> SessionError {
        SessionError::Handshake {
            server: self.server.clone(),
            reason: reason.to_string(),
        }
    }

    fn protocol_error(&self, reason: impl std::fmt::Display) -> SessionError {
        SessionError::Protocol {
            server: self.server.clone(),
            reason: reason.to_string(),
        }
    }
}
