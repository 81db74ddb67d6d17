//! JSONL-backed append-only log.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::event::AuditEvent;
use crate::mask::mask_value;

pub type AuditResult<T> = Result<T, AuditError>;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Append-only audit log at a fixed path.
///
/// Appends are serialized by an in-process lock; line framing keeps the
/// file readable even if the process dies mid-write (the torn tail is
/// skipped on read).
pub struct AuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Masks and appends one event.
    pub async fn append(&self, event: &AuditEvent) -> AuditResult<()> {
        let mut value = serde_json::to_value(event)?;
        mask_value(&mut value);
        let mut line = serde_json::to_string(&value)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Reads every parseable event, in file order. Unparseable lines
    /// (torn tail after a crash) are skipped.
    pub async fn read_all(&self) -> AuditResult<Vec<AuditEvent>> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut events = Vec::new();
        let mut skipped = 0usize;
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEvent>(line) {
                Ok(event) => events.push(event),
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(skipped, path = %self.path.display(), "skipped unparseable audit lines");
        }
        debug!(count = events.len(), "audit log read");
        Ok(events)
    }

    /// Events for one order, in append order.
    pub async fn events_for_order(&self, order_id: &str) -> AuditResult<Vec<AuditEvent>> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .filter(|e| e.order_id == order_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AuditEventKind;
    use serde_json::json;

    fn log_in(dir: &tempfile::TempDir) -> AuditLog {
        AuditLog::new(dir.path().join("audit.log.jsonl"))
    }

    #[tokio::test]
    async fn append_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);

        let mut event = AuditEvent::new("ord-1", AuditEventKind::IngestPipeline);
        event.raw_text = Some("招牌鍋貼 x5".into());
        log.append(&event).await.unwrap();
        log.append(&AuditEvent::new("ord-2", AuditEventKind::DispatchDecision))
            .await
            .unwrap();

        let all = log.read_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].order_id, "ord-1");
        assert_eq!(log.events_for_order("ord-2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn secrets_never_reach_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);

        let mut event = AuditEvent::new("ord-1", AuditEventKind::IngestPipeline);
        event.llm_request = Some(json!({"api_key": "sk-live-9876543210", "model": "gpt-4o-mini"}));
        log.append(&event).await.unwrap();

        let raw = std::fs::read_to_string(log.path()).unwrap();
        assert!(!raw.contains("sk-live-9876543210"));
        assert!(raw.contains("gpt-4o-mini"));
    }

    #[tokio::test]
    async fn torn_trailing_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        log.append(&AuditEvent::new("ord-1", AuditEventKind::CacheWrite))
            .await
            .unwrap();

        // Simulate a crash mid-append.
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(log.path())
            .unwrap();
        file.write_all(b"{\"order_id\": \"ord-2\", \"event_t").unwrap();

        let all = log.read_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].order_id, "ord-1");
    }
}
