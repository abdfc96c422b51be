//! Stdio transport: spawn a child process and exchange line-delimited JSON-RPC
//! over its stdin/stdout.

use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::types::{JsonRpcRequest, JsonRpcResponse};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Failures below the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("server closed the connection")]
    Closed,
}

/// A running tool-server process.
///
/// The child is killed when the transport is dropped.
pub struct StdioTransport {
    child: Mutex<Child>,
    pid: Option<u32>,
    stdin: Mutex<Option<ChildStdin>>,
    pending: PendingMap,
    /// Set once the reader loop has ended.
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Spawn the server process and start the reader loop.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<Self, TransportError> {
        info!(command = %command, args = ?args, "Spawning tool server process");

        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let pid = child.id();
        let stdin = child.stdin.take().ok_or(TransportError::Closed)?;
        let stdout = child.stdout.take().ok_or(TransportError::Closed)?;

        if let Some(stderr) = child.stderr.take() {
            let command = command.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        debug!(command = %command, stderr = %trimmed, "Tool server stderr");
                    }
                }
            });
        }

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = Arc::clone(&pending);
        let closed = Arc::new(AtomicBool::new(false));
        let reader_closed = Arc::clone(&closed);
        let handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        trace!(raw = %trimmed, "server -> client");
                        match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                            Ok(resp) => {
                                let Some(id) = resp.id.as_u64() else {
                                    warn!(id = %resp.id, "Response with non-numeric id");
                                    continue;
                                };
                                match reader_pending.lock().await.remove(&id) {
                                    Some(tx) => {
                                        let _ = tx.send(resp);
                                    }
                                    None => warn!(id, "Response for unknown request id"),
                                }
                            }
                            Err(e) => {
                                debug!(error = %e, line = %trimmed, "Server sent non-response line");
                            }
                        }
                    }
                    Ok(None) => {
                        debug!("Tool server stdout closed");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Error reading tool server stdout");
                        break;
                    }
                }
            }
            // Wake every waiter; nothing more will arrive.
            reader_closed.store(true, Ordering::SeqCst);
            reader_pending.lock().await.clear();
        });

        Ok(Self {
            child: Mutex::new(child),
            pid,
            stdin: Mutex::new(Some(stdin)),
            pending,
            closed,
            next_id: AtomicU64::new(1),
            reader_handle: Mutex::new(Some(handle)),
        })
    }

    /// Send a request and wait up to `timeout` for its response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        if self.closed.load(Ordering::SeqCst) {
            self.pending.lock().await.remove(&id);
            return Err(TransportError::Closed);
        }

        debug!(method = %method, id, "client -> server");
        if let Err(e) = self.write_line(&req).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(TransportError::Timeout(timeout))
            }
        }
    }

    /// Send a notification; no response is expected.
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), TransportError> {
        trace!(method = %method, "client -> server (notification)");
        self.write_line(&JsonRpcRequest::notification(method, params))
            .await
    }

    async fn write_line(&self, message: &JsonRpcRequest) -> Result<(), TransportError> {
        let mut payload = serde_json::to_string(message)?;
        payload.push('\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TransportError::Closed)?;
        stdin.write_all(payload.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// OS process id of the child.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the child process is still running.
    pub async fn is_alive(&self) -> bool {
        matches!(self.child.lock().await.try_wait(), Ok(None))
    }

    /// Close stdin, stop the reader, and terminate the child.
    ///
    /// The child gets a short grace period to exit on end-of-input before it
    /// is killed. Calling this more than once is harmless.
    pub async fn shutdown(&self) {
        self.stdin.lock().await.take();

        if let Some(handle) = self.reader_handle.lock().await.take() {
            handle.abort();
        }
        self.closed.store(true, Ordering::SeqCst);
        self.pending.lock().await.clear();

        let mut child = self.child.lock().await;
        match tokio::time::timeout(Duration::from_millis(500), child.wait()).await {
            Ok(Ok(status)) => debug!(?status, "Tool server exited"),
            _ => {
                if let Err(e) = child.kill().await {
                    debug!(error = %e, "Kill after grace period failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_and_shutdown() {
        let transport = StdioTransport::spawn("cat", &[], &BTreeMap::new()).unwrap();
        assert!(transport.is_alive().await);
        transport.shutdown().await;
        assert!(!transport.is_alive().await);
        // Second shutdown is a no-op
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn spawn_nonexistent_command() {
        let result = StdioTransport::spawn("nonexistent_command_xyz_42", &[], &BTreeMap::new());
        assert!(matches!(result, Err(TransportError::Spawn { .. })));
    }

    #[tokio::test]
    async fn request_routes_response_by_id() {
        let script = r#"read line; echo '{"jsonrpc":"2.0","id":1,"result":{"ok":true}}'; sleep 5"#;
        let transport =
            StdioTransport::spawn("sh", &["-c".into(), script.into()], &BTreeMap::new()).unwrap();
        let resp = transport
            .request("ping", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(resp.result.unwrap()["ok"], true);
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn request_fails_fast_when_server_exits() {
        let transport =
            StdioTransport::spawn("sh", &["-c".into(), "exit 0".into()], &BTreeMap::new())
                .unwrap();
        let result = transport.request("ping", None, Duration::from_secs(10)).await;
        assert!(matches!(
            result,
            Err(TransportError::Closed) | Err(TransportError::Io(_))
        ));
    }

    #[tokio::test]
    async fn request_times_out() {
        let transport = StdioTransport::spawn("sleep", &["5".into()], &BTreeMap::new()).unwrap();
        let result = transport
            .request("ping", None, Duration::from_millis(200))
            .await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
        transport.shutdown().await;
    }
}
