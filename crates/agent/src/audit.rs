//! Append-only plain-text audit log, one `role: text` line per turn.

use std::path::{Path, PathBuf};

use concierge_core::message::Turn;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Shared by every request task; writes are serialized.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one turn. Newlines inside the text are kept as `\n` escapes so
    /// that every turn stays on one line.
    pub async fn append(&self, turn: &Turn) -> std::io::Result<()> {
        let line = format!("{}\n", turn.log_line().replace('\n', "\\n"));

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}
