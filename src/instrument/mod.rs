//! Polymorphic instrument runtime (spec §4.3).
//!
//! Device types are tagged variants over a fixed capability set, not duck
//! typing (spec §9 REDESIGN FLAG): each device-type driver below wraps one
//! [`InstrumentCore`] and exposes only the facades its device type actually
//! has. Cross-type misuse is a compile-time failure — there is no shared
//! `Instrument` trait object a caller could hand the wrong facade to.

pub mod awg;
pub mod dmm;
pub mod load;
pub mod power_meter;
pub mod psu;
pub mod sa;
pub mod scope;
pub mod vna;

pub use awg::Awg;
pub use dmm::Dmm;
pub use load::ElectronicLoad;
pub use power_meter::PowerMeter;
pub use psu::PowerSupply;
pub use sa::SpectrumAnalyzer;
pub use scope::Oscilloscope;
pub use vna::Vna;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{LabError, LabResult};
use crate::profile::ProfileSpec;
use crate::safety::{SafetyLimits, SafetyProxy};
use crate::transport::Transport;

/// Post-write error-sweep strategy (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSweep {
    /// Never query the error queue automatically.
    Off,
    /// Query after every `write`/`query` and fail immediately on a
    /// non-empty queue.
    PerCall,
    /// Query after every call but accumulate; surfaced on
    /// [`InstrumentCore::drain_batched_errors`].
    Batched,
    /// Query only once, on `close()`.
    OnClose,
}

impl Default for ErrorSweep {
    fn default() -> Self {
        ErrorSweep::PerCall
    }
}

/// State shared by every device-type driver (spec §4.3's "common skeleton"):
/// one transport, one profile, bench-assigned alias, and the safety overlay.
pub struct InstrumentCore {
    pub alias: String,
    pub profile: ProfileSpec,
    transport: Arc<dyn Transport>,
    safety: SafetyProxy,
    error_sweep: ErrorSweep,
    idn: Mutex<Option<String>>,
    pending_errors: Mutex<Vec<String>>,
}

impl InstrumentCore {
    pub fn new(
        profile: ProfileSpec,
        transport: Arc<dyn Transport>,
        alias: impl Into<String>,
        safety_limits: &SafetyLimits,
        error_sweep: ErrorSweep,
    ) -> Self {
        let alias = alias.into();
        let safety = SafetyProxy::new(alias.clone(), &profile.safety_schema, safety_limits);
        Self {
            alias,
            profile,
            transport,
            safety,
            error_sweep,
            idn: Mutex::new(None),
            pending_errors: Mutex::new(Vec::new()),
        }
    }

    /// Connect the transport and, unless suppressed, record `*IDN?` (spec §4.3).
    pub async fn connect(&self, suppress_idn: bool) -> LabResult<()> {
        self.transport.connect().await?;
        if !suppress_idn {
            let idn = self.transport.query("*IDN?").await?;
            *self.idn.lock().await = Some(idn);
        }
        Ok(())
    }

    pub async fn idn(&self) -> Option<String> {
        self.idn.lock().await.clone()
    }

    pub async fn close(&self) -> LabResult<()> {
        if self.error_sweep == ErrorSweep::OnClose {
            self.run_error_sweep().await?;
        }
        self.transport.close().await
    }

    /// Validate a physical-quantity setting before any I/O occurs.
    pub fn check_safety(&self, channel: u32, quantity: &str, value: f64) -> LabResult<()> {
        self.safety.check(channel, quantity, value)
    }

    pub async fn write(&self, cmd: &str) -> LabResult<()> {
        self.transport.write(cmd).await?;
        if self.error_sweep == ErrorSweep::PerCall {
            self.run_error_sweep().await?;
        }
        Ok(())
    }

    pub async fn query(&self, cmd: &str) -> LabResult<String> {
        let response = self.transport.query(cmd).await?;
        if self.error_sweep == ErrorSweep::PerCall {
            self.run_error_sweep().await?;
        }
        Ok(response)
    }

    pub async fn read_raw(&self, max_len: Option<usize>) -> LabResult<Vec<u8>> {
        self.transport.read_raw(max_len).await
    }

    async fn run_error_sweep(&self) -> LabResult<()> {
        let errors = self.transport.clear_errors().await?;
        if errors.is_empty() {
            return Ok(());
        }
        if self.error_sweep == ErrorSweep::Batched {
            self.pending_errors.lock().await.extend(errors);
            return Ok(());
        }
        let (code, text) = parse_scpi_error(&errors[0]);
        Err(LabError::Instrument { code, text })
    }

    /// Surface the first error accumulated under `ErrorSweep::Batched`, if any.
    pub async fn drain_batched_errors(&self) -> LabResult<()> {
        let mut pending = self.pending_errors.lock().await;
        if pending.is_empty() {
            return Ok(());
        }
        let (code, text) = parse_scpi_error(&pending.remove(0));
        Err(LabError::Instrument { code, text })
    }
}

/// Render a profile-declared (or built-in) command template against named
/// substitutions, e.g. `"VOLT {value},(@{channel})"` (spec §4.3).
pub fn format_command(template: &str, vars: &HashMap<String, String>) -> LabResult<String> {
    strfmt::strfmt(template, vars)
        .map_err(|e| LabError::Profile(format!("command template '{template}' failed: {e}")))
}

/// Parse a `:SYSTem:ERRor?` reply of the conventional `<code>,"<message>"`
/// shape. Falls back to `(-1, raw)` for anything else rather than failing
/// the whole error sweep over a malformed error message.
fn parse_scpi_error(raw: &str) -> (i32, String) {
    prse::try_parse!(raw, "{},\"{}\"").unwrap_or_else(|_| (-1, raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_a_named_command_template() {
        let mut vars = HashMap::new();
        vars.insert("value".to_string(), "3.3".to_string());
        vars.insert("channel".to_string(), "1".to_string());
        let cmd = format_command("VOLT {value},(@{channel})", &vars).unwrap();
        assert_eq!(cmd, "VOLT 3.3,(@1)");
    }

    #[test]
    fn parses_a_conventional_error_reply() {
        let (code, text) = parse_scpi_error(r#"-113,"Undefined header""#);
        assert_eq!(code, -113);
        assert_eq!(text, "Undefined header");
    }

    #[test]
    fn falls_back_on_an_unparsable_error_reply() {
        let (code, text) = parse_scpi_error("garbled");
        assert_eq!(code, -1);
        assert_eq!(text, "garbled");
    }
}
