//! Transport abstraction and its four variants (spec §4.1, §5).
//!
//! Grounded on the teacher's `adapters/visa_adapter.rs`: blocking hardware
//! I/O offloaded onto `tokio::task::spawn_blocking`, one outstanding call per
//! session enforced by a mutex. The other three variants have no teacher
//! counterpart at this shape and are built from scratch in the same idiom.

mod hardware;
mod recorder;
mod replayer;
mod session_doc;
mod simulator;

pub use hardware::HardwareTransport;
pub use recorder::RecorderTransport;
pub use replayer::ReplayerTransport;
pub use session_doc::{AliasLog, LogEntryKind, SessionDocument, SessionLogEntry};
pub use simulator::SimulatorTransport;

use async_trait::async_trait;

use crate::error::LabResult;

/// Byte-level contract every transport variant satisfies (spec §4.1).
///
/// Per-instrument ordering (strict FIFO, one outstanding call at a time) is
/// a property each implementation must uphold internally — the trait itself
/// takes `&self` so callers can hold a transport behind an `Arc` without an
/// outer mutex.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the underlying resource. Must precede any other call.
    async fn connect(&self) -> LabResult<()>;

    /// Fire-and-forget write; returns once the transport has accepted the
    /// bytes, not once the instrument has acted on them.
    async fn write(&self, cmd: &str) -> LabResult<()>;

    /// Write `cmd` then read back a response, stripped of line terminators.
    async fn query(&self, cmd: &str) -> LabResult<String>;

    /// Read a raw byte block, honoring the `#<d><len><bytes>` IEEE-488.2
    /// binary-block convention when present.
    async fn read_raw(&self, max_len: Option<usize>) -> LabResult<Vec<u8>>;

    /// Drain the instrument's error queue via `:SYSTem:ERRor?` until the
    /// "no error" sentinel, returning whatever was queued.
    async fn clear_errors(&self) -> LabResult<Vec<String>>;

    /// Release transport resources. Idempotent: a second call is a no-op.
    async fn close(&self) -> LabResult<()>;
}

/// SCPI's "no error" error-queue sentinel (`:SYSTem:ERRor?` reply).
pub const NO_ERROR_SENTINEL: &str = "+0,\"No error\"";

/// Parse an IEEE-488.2 definite-length binary block: `#<d><len><bytes>`,
/// where `d` is a single ASCII digit giving the decimal digit-count of
/// `len`. Returns the payload with the header stripped.
pub fn parse_binary_block(raw: &[u8]) -> LabResult<Vec<u8>> {
    use crate::error::{LabError, TransportErrorKind};

    if raw.first() != Some(&b'#') {
        return Err(LabError::Transport(TransportErrorKind::Protocol(
            "binary block missing '#' header".into(),
        )));
    }

    let digit_count = *raw.get(1).ok_or_else(|| {
        LabError::Transport(TransportErrorKind::Protocol("binary block header truncated".into()))
    })? as char;
    let digit_count = digit_count.to_digit(10).ok_or_else(|| {
        LabError::Transport(TransportErrorKind::Protocol(
            "binary block digit-count is not a decimal digit".into(),
        ))
    })? as usize;

    let len_start = 2;
    let len_end = len_start + digit_count;
    let len_field = raw.get(len_start..len_end).ok_or_else(|| {
        LabError::Transport(TransportErrorKind::Protocol(
            "binary block length field truncated".into(),
        ))
    })?;
    let len_str = std::str::from_utf8(len_field).map_err(|_| {
        LabError::Transport(TransportErrorKind::Protocol("binary block length field not UTF-8".into()))
    })?;
    let len: usize = len_str.parse().map_err(|_| {
        LabError::Transport(TransportErrorKind::Protocol(format!(
            "binary block length field '{len_str}' is not a number"
        )))
    })?;

    let payload_start = len_end;
    let payload_end = payload_start + len;
    let payload = raw.get(payload_start..payload_end).ok_or_else(|| {
        LabError::Transport(TransportErrorKind::Protocol(format!(
            "binary block declares {len} bytes but only {} remain",
            raw.len().saturating_sub(payload_start)
        )))
    })?;

    Ok(payload.to_vec())
}

/// Strip a `#<d><len><bytes>` header if present; otherwise return `raw`
/// unchanged. Used by transports whose underlying response may or may not
/// be block-framed, depending on the profile-declared response grammar.
pub fn strip_binary_block_if_present(raw: Vec<u8>) -> Vec<u8> {
    if raw.first() == Some(&b'#') {
        parse_binary_block(&raw).unwrap_or(raw)
    } else {
        raw
    }
}
