//! Audit log stores: in-memory and JSONL file.

use async_trait::async_trait;
use relay_types::{AuditListOptions, AuditLogEntry, AuditStore, StoreError};
use tokio::io::AsyncWriteExt;

/// In-memory implementation of AuditStore (process lifetime only).
pub struct InMemoryAuditStore {
    entries: tokio::sync::RwLock<Vec<AuditLogEntry>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self {
            entries: tokio::sync::RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, entry: AuditLogEntry) -> Result<(), StoreError> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn list(&self, opts: &AuditListOptions) -> Result<Vec<AuditLogEntry>, StoreError> {
        let guard = self.entries.read().await;
        Ok(opts.apply(&guard))
    }
}

/// JSONL file-backed AuditStore (persists across restarts).
pub struct JsonlAuditStore {
    path: std::path::PathBuf,
    append_lock: tokio::sync::Mutex<()>,
}

impl JsonlAuditStore {
    pub fn new(path: impl AsRef<std::path::Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            append_lock: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait]
impl AuditStore for JsonlAuditStore {
    async fn append(&self, entry: AuditLogEntry) -> Result<(), StoreError> {
        let _guard = self.append_lock.lock().await;
        let line = serde_json::to_string(&entry).map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        f.write_all(format!("{}\n", line).as_bytes())
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        f.flush()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn list(&self, opts: &AuditListOptions) -> Result<Vec<AuditLogEntry>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Backend(e.to_string())),
        };
        let mut entries = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditLogEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        line = lineno + 1,
                        error = %e,
                        "skipping unreadable audit line"
                    )
                }
            }
        }
        Ok(opts.apply(&entries))
    }
}
