//! Error taxonomy for the bench runtime.
//!
//! `LabError` consolidates every failure mode the transport, profile,
//! instrument, bench, session, and compliance layers can raise into one
//! `thiserror`-derived enum, so callers can match on a single `Result` type
//! end to end and tests can assert on structured fields (alias, command,
//! cursor, bound) instead of parsing messages.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type LabResult<T> = std::result::Result<T, LabError>;

/// Kinds of wire-level transport failure (spec §4.1).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportErrorKind {
    /// No response within the configured timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// Underlying I/O failure (serial/VISA/socket).
    #[error("I/O failure: {0}")]
    IoError(String),
    /// Operation attempted on a transport that has been closed.
    #[error("transport is closed")]
    Closed,
    /// Malformed response (bad block header, unexpected framing).
    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Session scheduling failures (spec §4.5, §7).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionErrorKind {
    /// A background task did not finish within its grace period.
    #[error("task '{0}' abandoned after grace period")]
    TaskAbandoned(String),
    /// Two acquisition callables returned an overlapping key.
    #[error("acquisition key '{0}' returned by more than one callable")]
    AcquisitionKeyConflict(String),
    /// The session observed a cancellation signal mid-run.
    #[error("session cancelled")]
    Cancelled,
}

/// Compliance-envelope failures (spec §4.7, §7).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComplianceErrorKind {
    /// Signature did not verify against the recorded key id.
    #[error("signature invalid for key '{0}'")]
    SignatureInvalid(String),
    /// The signing key referenced by `key_id` is not registered.
    #[error("signing key '{0}' unavailable")]
    KeyUnavailable(String),
    /// The audit log could not be appended to.
    #[error("audit write failed: {0}")]
    AuditWriteFailed(String),
}

/// The single error type returned by every fallible operation in this crate.
#[derive(Error, Debug)]
pub enum LabError {
    /// Bench or profile YAML malformed at the syntax/deserialization level.
    #[error("configuration error: {0}")]
    Config(String),

    /// A profile parsed but violates one of its internal invariants.
    #[error("profile error: {0}")]
    Profile(String),

    /// Transport-level (wire) failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportErrorKind),

    /// The instrument itself reported an error via its error queue.
    #[error("instrument reported error {code}: {text}")]
    Instrument {
        /// Device-reported error code (`:SYSTem:ERRor?` first field).
        code: i32,
        /// Device-reported error text.
        text: String,
    },

    /// A safety-proxy rejection. The offending value never reached the wire.
    #[error(
        "safety limit violation on {alias}/ch{channel} {quantity}: {value} outside [{bound_min}, {bound_max}]"
    )]
    SafetyLimit {
        /// Bench alias of the offending instrument.
        alias: String,
        /// Channel index.
        channel: u32,
        /// Quantity name (e.g. "voltage", "current").
        quantity: String,
        /// The rejected value.
        value: f64,
        /// Lower bound that was violated, if any.
        bound_min: f64,
        /// Upper bound that was violated, if any.
        bound_max: f64,
    },

    /// Replay observed a command that diverges from the recorded log.
    #[error("replay mismatch at cursor {cursor}: expected {expected:?}, got {actual:?}")]
    ReplayMismatch {
        /// Index into the session log at which the divergence occurred.
        cursor: usize,
        /// The recorded entry.
        expected: String,
        /// The command actually issued.
        actual: String,
    },

    /// Replay ran past the end of the recorded log.
    #[error("replay log exhausted (reached end while script issued more calls)")]
    ReplayExhausted,

    /// Measurement-session scheduling failure.
    #[error("session error: {0}")]
    Session(#[from] SessionErrorKind),

    /// Compliance envelope creation/verification failure.
    #[error("compliance error: {0}")]
    Compliance(#[from] ComplianceErrorKind),

    /// Best-effort close collected per-instrument failures (spec §4.4).
    #[error("{} instrument(s) failed to close cleanly", .0.len())]
    Shutdown(Vec<LabError>),

    /// A required feature was not compiled in.
    #[error("feature '{0}' is not enabled; rebuild with --features {0}")]
    FeatureNotEnabled(String),

    /// Wraps `std::io::Error` for file-based profile/bench/session loading.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wraps YAML (de)serialization failures.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Wraps configuration-layer failures from `figment`.
    #[error("configuration layer error: {0}")]
    Figment(#[from] figment::Error),
}

impl LabError {
    /// Build a [`LabError::SafetyLimit`] for a violated upper bound.
    pub fn safety_max(alias: impl Into<String>, channel: u32, quantity: impl Into<String>, value: f64, max: f64) -> Self {
        LabError::SafetyLimit {
            alias: alias.into(),
            channel,
            quantity: quantity.into(),
            value,
            bound_min: f64::NEG_INFINITY,
            bound_max: max,
        }
    }

    /// Build a [`LabError::SafetyLimit`] for a violated lower bound.
    pub fn safety_min(alias: impl Into<String>, channel: u32, quantity: impl Into<String>, value: f64, min: f64) -> Self {
        LabError::SafetyLimit {
            alias: alias.into(),
            channel,
            quantity: quantity.into(),
            value,
            bound_min: min,
            bound_max: f64::INFINITY,
        }
    }

    /// Process exit code for CLI entry points (spec §6: 0 ok, 1
    /// validation/IO failure, 2 replay mismatch, 3 safety violation).
    pub fn exit_code(&self) -> i32 {
        match self {
            LabError::ReplayMismatch { .. } | LabError::ReplayExhausted => 2,
            LabError::SafetyLimit { .. } => 3,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safety_limit_display_includes_context() {
        let err = LabError::safety_max("psu", 1, "voltage", 7.0, 6.0);
        let msg = err.to_string();
        assert!(msg.contains("psu"));
        assert!(msg.contains("voltage"));
        assert!(msg.contains("7"));
    }

    #[test]
    fn shutdown_error_counts_failures() {
        let err = LabError::Shutdown(vec![
            LabError::Instrument { code: -113, text: "undefined header".into() },
            LabError::ReplayExhausted,
        ]);
        assert!(err.to_string().contains("2 instrument"));
    }
}
