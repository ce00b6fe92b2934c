//! Append-only audit log (spec §4.7, §9 Open Question).
//!
//! The source hints at a SQLite-backed log but leaves the representation
//! open; we resolve that here as a single append-only JSON-lines file
//! guarded by an internal lock, matching the spec's "append-only,
//! process-wide, recoverable" requirement without pulling in a database
//! dependency the rest of the crate has no other use for (see DESIGN.md).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{ComplianceErrorKind, LabError, LabResult};

/// One audit-log line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub actor: String,
    pub action: String,
    pub envelope_id: String,
    pub timestamp_monotonic: f64,
    pub timestamp_wall: DateTime<Utc>,
}

/// Process-wide append-only log, opened lazily on the first write.
pub struct AuditLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    /// Append one entry. Failures are reported to the caller but must
    /// never mask a successful measurement result (spec §4.7, §7) —
    /// callers are expected to log-and-continue rather than propagate.
    pub async fn append(&self, entry: AuditEntry) -> LabResult<()> {
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| LabError::Compliance(ComplianceErrorKind::AuditWriteFailed(e.to_string())))?;

        let mut line = serde_json::to_string(&entry)
            .map_err(|e| LabError::Compliance(ComplianceErrorKind::AuditWriteFailed(e.to_string())))?;
        line.push('\n');

        file.write_all(line.as_bytes())
            .await
            .map_err(|e| LabError::Compliance(ComplianceErrorKind::AuditWriteFailed(e.to_string())))?;
        Ok(())
    }

    /// Read every recorded entry back, in append order. Used by recovery
    /// tooling and tests; not on the measurement hot path.
    pub async fn read_all(&self) -> LabResult<Vec<AuditEntry>> {
        read_all_sync(&self.path)
    }
}

fn read_all_sync(path: &Path) -> LabResult<Vec<AuditEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path)?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .map_err(|e| LabError::Compliance(ComplianceErrorKind::AuditWriteFailed(e.to_string())))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appended_entries_are_readable_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.jsonl"));

        log.append(AuditEntry {
            actor: "operator".into(),
            action: "sign".into(),
            envelope_id: "env-1".into(),
            timestamp_monotonic: 0.0,
            timestamp_wall: Utc::now(),
        })
        .await
        .unwrap();
        log.append(AuditEntry {
            actor: "operator".into(),
            action: "sign".into(),
            envelope_id: "env-2".into(),
            timestamp_monotonic: 1.0,
            timestamp_wall: Utc::now(),
        })
        .await
        .unwrap();

        let entries = log.read_all().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].envelope_id, "env-1");
        assert_eq!(entries[1].envelope_id, "env-2");
    }

    #[tokio::test]
    async fn reading_a_missing_log_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("missing.jsonl"));
        assert!(log.read_all().await.unwrap().is_empty());
    }
}
