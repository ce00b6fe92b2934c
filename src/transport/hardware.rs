//! Hardware transport: a VISA-style resource wrapped for async use (spec
//! §4.1, §5). Grounded on the teacher's `adapters/visa_adapter.rs` — blocking
//! `visa-rs` calls offloaded to `tokio::task::spawn_blocking`, a
//! `tokio::sync::Mutex` around the open instrument enforcing one outstanding
//! call per session (the per-instrument FIFO ordering guarantee in spec §5).

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{LabError, LabResult, TransportErrorKind};

use super::{strip_binary_block_if_present, Transport, NO_ERROR_SENTINEL};

#[cfg(feature = "instrument_visa")]
use std::sync::Arc;
#[cfg(feature = "instrument_visa")]
use tokio::sync::Mutex;
#[cfg(feature = "instrument_visa")]
use visa_rs::{DefaultRM, Instrument};

/// A VISA resource address (e.g. `"GPIB0::1::INSTR"`, `"TCPIP0::10.0.0.5::INSTR"`).
pub struct HardwareTransport {
    resource_string: String,
    timeout: Duration,
    line_terminator: String,
    #[cfg(feature = "instrument_visa")]
    instrument: Mutex<Option<Arc<Mutex<Box<dyn Instrument>>>>>,
}

impl HardwareTransport {
    pub fn new(resource_string: impl Into<String>, timeout: Duration) -> Self {
        Self {
            resource_string: resource_string.into(),
            timeout,
            line_terminator: "\n".to_string(),
            #[cfg(feature = "instrument_visa")]
            instrument: Mutex::new(None),
        }
    }

    pub fn with_line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }
}

#[cfg(feature = "instrument_visa")]
#[async_trait]
impl Transport for HardwareTransport {
    async fn connect(&self) -> LabResult<()> {
        let resource_string = self.resource_string.clone();
        let timeout_ms = self.timeout.as_millis() as u32;

        let instrument = tokio::task::spawn_blocking(move || {
            let rm = DefaultRM::new()
                .map_err(|e| TransportErrorKind::IoError(format!("failed to open VISA resource manager: {e}")))?;
            let instr = rm.open(&resource_string, timeout_ms, 0).map_err(|e| {
                TransportErrorKind::IoError(format!("failed to open VISA resource '{resource_string}': {e}"))
            })?;
            Ok::<Box<dyn Instrument>, TransportErrorKind>(instr)
        })
        .await
        .map_err(|e| TransportErrorKind::IoError(format!("VISA open task panicked: {e}")))??;

        *self.instrument.lock().await = Some(Arc::new(Mutex::new(instrument)));
        Ok(())
    }

    async fn write(&self, cmd: &str) -> LabResult<()> {
        let instrument = self.instrument_handle().await?;
        let line = format!("{cmd}{}", self.line_terminator);
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || {
            let mut guard = instrument.blocking_lock();
            guard
                .set_timeout(timeout.as_millis() as u32)
                .map_err(|e| TransportErrorKind::IoError(format!("failed to set VISA timeout: {e}")))?;
            guard
                .write(&line)
                .map_err(|e| TransportErrorKind::IoError(format!("VISA write failed: {e}")))?;
            Ok::<(), TransportErrorKind>(())
        })
        .await
        .map_err(|e| TransportErrorKind::IoError(format!("VISA write task panicked: {e}")))??;
        Ok(())
    }

    async fn query(&self, cmd: &str) -> LabResult<String> {
        let instrument = self.instrument_handle().await?;
        let line = format!("{cmd}{}", self.line_terminator);
        let timeout = self.timeout;

        let response = tokio::task::spawn_blocking(move || {
            let mut guard = instrument.blocking_lock();
            guard
                .set_timeout(timeout.as_millis() as u32)
                .map_err(|e| TransportErrorKind::IoError(format!("failed to set VISA timeout: {e}")))?;
            guard
                .query(&line)
                .map_err(|e| TransportErrorKind::IoError(format!("VISA query failed: {e}")))
        })
        .await
        .map_err(|e| TransportErrorKind::IoError(format!("VISA query task panicked: {e}")))??;

        Ok(response.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn read_raw(&self, max_len: Option<usize>) -> LabResult<Vec<u8>> {
        let instrument = self.instrument_handle().await?;
        let timeout = self.timeout;
        let max_len = max_len.unwrap_or(1 << 20);

        let raw = tokio::task::spawn_blocking(move || {
            let mut guard = instrument.blocking_lock();
            guard
                .set_timeout(timeout.as_millis() as u32)
                .map_err(|e| TransportErrorKind::IoError(format!("failed to set VISA timeout: {e}")))?;
            guard
                .read_raw(max_len)
                .map_err(|e| TransportErrorKind::IoError(format!("VISA raw read failed: {e}")))
        })
        .await
        .map_err(|e| TransportErrorKind::IoError(format!("VISA read task panicked: {e}")))??;

        Ok(strip_binary_block_if_present(raw))
    }

    async fn clear_errors(&self) -> LabResult<Vec<String>> {
        let mut errors = Vec::new();
        loop {
            let response = self.query(":SYSTem:ERRor?").await?;
            if response.is_empty() || response == NO_ERROR_SENTINEL {
                break;
            }
            errors.push(response);
        }
        Ok(errors)
    }

    async fn close(&self) -> LabResult<()> {
        self.instrument.lock().await.take();
        Ok(())
    }
}

#[cfg(feature = "instrument_visa")]
impl HardwareTransport {
    async fn instrument_handle(&self) -> LabResult<Arc<Mutex<Box<dyn Instrument>>>> {
        self.instrument
            .lock()
            .await
            .clone()
            .ok_or(LabError::Transport(TransportErrorKind::Closed))
    }
}

#[cfg(not(feature = "instrument_visa"))]
#[async_trait]
impl Transport for HardwareTransport {
    async fn connect(&self) -> LabResult<()> {
        Err(feature_not_enabled())
    }

    async fn write(&self, _cmd: &str) -> LabResult<()> {
        Err(feature_not_enabled())
    }

    async fn query(&self, _cmd: &str) -> LabResult<String> {
        Err(feature_not_enabled())
    }

    async fn read_raw(&self, _max_len: Option<usize>) -> LabResult<Vec<u8>> {
        Err(feature_not_enabled())
    }

    async fn clear_errors(&self) -> LabResult<Vec<String>> {
        Err(feature_not_enabled())
    }

    async fn close(&self) -> LabResult<()> {
        Ok(())
    }
}

#[cfg(not(feature = "instrument_visa"))]
fn feature_not_enabled() -> LabError {
    LabError::FeatureNotEnabled("instrument_visa".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_line_terminator() {
        let transport = HardwareTransport::new("GPIB0::1::INSTR", Duration::from_secs(5))
            .with_line_terminator("\r\n");
        assert_eq!(transport.line_terminator, "\r\n");
    }

    #[cfg(not(feature = "instrument_visa"))]
    #[tokio::test]
    async fn connect_fails_without_the_visa_feature() {
        let transport = HardwareTransport::new("GPIB0::1::INSTR", Duration::from_secs(5));
        let err = transport.connect().await.unwrap_err();
        assert!(err.to_string().contains("instrument_visa"));
    }
}
