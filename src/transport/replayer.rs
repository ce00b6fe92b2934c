//! Replayer transport: strict-sequence replay from a recorded session log
//! (spec §4.1, testable property 2/3).

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{LabError, LabResult};

use super::{LogEntryKind, SessionLogEntry, Transport, NO_ERROR_SENTINEL};

pub struct ReplayerTransport {
    log: Vec<SessionLogEntry>,
    cursor: Mutex<usize>,
    fatal_on_unconsumed: bool,
}

impl ReplayerTransport {
    pub fn new(log: Vec<SessionLogEntry>, fatal_on_unconsumed: bool) -> Self {
        Self {
            log,
            cursor: Mutex::new(0),
            fatal_on_unconsumed,
        }
    }

    async fn next_entry(&self, kind: LogEntryKind, command: &str) -> LabResult<SessionLogEntry> {
        let mut cursor = self.cursor.lock().await;
        let Some(entry) = self.log.get(*cursor) else {
            return Err(LabError::ReplayExhausted);
        };

        if entry.kind != kind || entry.command != command {
            return Err(LabError::ReplayMismatch {
                cursor: *cursor,
                expected: format!("{:?} {}", entry.kind, entry.command),
                actual: format!("{:?} {}", kind, command),
            });
        }

        *cursor += 1;
        Ok(entry.clone())
    }

    /// Number of trailing log entries never replayed. Call after the
    /// driving script finishes; logs a warning or fails per
    /// `fatal_on_unconsumed` (spec §4.1).
    pub async fn check_fully_consumed(&self) -> LabResult<()> {
        let cursor = *self.cursor.lock().await;
        let remaining = self.log.len() - cursor;
        if remaining == 0 {
            return Ok(());
        }
        if self.fatal_on_unconsumed {
            return Err(LabError::ReplayMismatch {
                cursor,
                expected: format!("{remaining} more recorded call(s)"),
                actual: "replay ended early".to_string(),
            });
        }
        warn!(remaining, "session replay finished with unconsumed trailing log entries");
        Ok(())
    }
}

#[async_trait]
impl Transport for ReplayerTransport {
    async fn connect(&self) -> LabResult<()> {
        Ok(())
    }

    async fn write(&self, cmd: &str) -> LabResult<()> {
        self.next_entry(LogEntryKind::Write, cmd).await?;
        Ok(())
    }

    async fn query(&self, cmd: &str) -> LabResult<String> {
        let entry = self.next_entry(LogEntryKind::Query, cmd).await?;
        Ok(entry.response.unwrap_or_default())
    }

    async fn read_raw(&self, _max_len: Option<usize>) -> LabResult<Vec<u8>> {
        // Binary blocks are not carried by the session document; the
        // preceding recorded query's response text stands in for them.
        Ok(Vec::new())
    }

    async fn clear_errors(&self) -> LabResult<Vec<String>> {
        // Walk forward consuming only the matching error-queue pattern,
        // without advancing past unrelated commands (spec §4.1).
        let mut errors = Vec::new();
        loop {
            let mut cursor = self.cursor.lock().await;
            let Some(entry) = self.log.get(*cursor) else {
                break;
            };
            if entry.kind != LogEntryKind::Query || entry.command != ":SYSTem:ERRor?" {
                break;
            }
            let response = entry.response.clone().unwrap_or_default();
            *cursor += 1;
            drop(cursor);
            if response.is_empty() || response == NO_ERROR_SENTINEL {
                break;
            }
            errors.push(response);
        }
        Ok(errors)
    }

    async fn close(&self) -> LabResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log() -> Vec<SessionLogEntry> {
        vec![
            SessionLogEntry {
                kind: LogEntryKind::Query,
                command: "*IDN?".into(),
                response: Some("Keysight,EDU36311A,0,1.0".into()),
                timestamp: 0.0,
            },
            SessionLogEntry {
                kind: LogEntryKind::Write,
                command: ":OUTP ON".into(),
                response: None,
                timestamp: 0.01,
            },
        ]
    }

    #[tokio::test]
    async fn replays_matching_commands_in_order() {
        let replayer = ReplayerTransport::new(sample_log(), false);
        assert_eq!(replayer.query("*IDN?").await.unwrap(), "Keysight,EDU36311A,0,1.0");
        replayer.write(":OUTP ON").await.unwrap();
        replayer.check_fully_consumed().await.unwrap();
    }

    #[tokio::test]
    async fn fails_with_mismatch_on_first_divergent_call() {
        let replayer = ReplayerTransport::new(sample_log(), false);
        let err = replayer.write(":OUTP ON").await.unwrap_err();
        assert!(matches!(err, LabError::ReplayMismatch { cursor: 0, .. }));
    }

    #[tokio::test]
    async fn fails_with_exhausted_past_the_end_of_the_log() {
        let replayer = ReplayerTransport::new(sample_log(), false);
        replayer.query("*IDN?").await.unwrap();
        replayer.write(":OUTP ON").await.unwrap();
        let err = replayer.write(":OUTP OFF").await.unwrap_err();
        assert!(matches!(err, LabError::ReplayExhausted));
    }

    #[tokio::test]
    async fn unconsumed_trailing_entries_are_a_warning_by_default() {
        let replayer = ReplayerTransport::new(sample_log(), false);
        replayer.query("*IDN?").await.unwrap();
        replayer.check_fully_consumed().await.unwrap();
    }

    #[tokio::test]
    async fn unconsumed_trailing_entries_are_fatal_when_configured() {
        let replayer = ReplayerTransport::new(sample_log(), true);
        replayer.query("*IDN?").await.unwrap();
        let err = replayer.check_fully_consumed().await.unwrap_err();
        assert!(matches!(err, LabError::ReplayMismatch { .. }));
    }
}
