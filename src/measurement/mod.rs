//! `MeasurementResult` and its constituents (spec §3).

mod frame;

pub use frame::{Column, ColumnValues, Frame};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::compliance::Envelope;

/// A scalar measurement with an optional propagated uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueWithSigma {
    pub value: f64,
    pub sigma: Option<f64>,
}

impl ValueWithSigma {
    pub fn exact(value: f64) -> Self {
        Self { value, sigma: None }
    }

    pub fn with_sigma(value: f64, sigma: f64) -> Self {
        Self { value, sigma: Some(sigma) }
    }
}

/// Structured record of what produced a result (spec §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Provenance {
    pub actor: String,
    pub instrument_idn: String,
    pub profile_hash: String,
    /// Sorted fingerprint of SCPI commands executed since the previous
    /// envelope (spec §4.7); a hex-encoded hash, not the raw trace.
    pub command_trace_fingerprint: String,
}

/// The tagged payload a [`MeasurementResult`] carries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeasurementValues {
    Scalar(ValueWithSigma),
    Waveform { frame: Frame },
    Tabular { frame: Frame },
}

/// A fully attributed measurement: payload, unit, timestamps, provenance,
/// and an optional compliance envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeasurementResult {
    pub values: MeasurementValues,
    pub units: String,
    pub timestamp_monotonic: f64,
    pub timestamp_wall: DateTime<Utc>,
    pub provenance: Provenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope: Option<Envelope>,
}

impl MeasurementResult {
    pub fn scalar(value: ValueWithSigma, units: impl Into<String>, provenance: Provenance, monotonic: f64) -> Self {
        Self {
            values: MeasurementValues::Scalar(value),
            units: units.into(),
            timestamp_monotonic: monotonic,
            timestamp_wall: Utc::now(),
            provenance,
            envelope: None,
        }
    }

    pub fn waveform(frame: Frame, units: impl Into<String>, provenance: Provenance, monotonic: f64) -> Self {
        Self {
            values: MeasurementValues::Waveform { frame },
            units: units.into(),
            timestamp_monotonic: monotonic,
            timestamp_wall: Utc::now(),
            provenance,
            envelope: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_result_carries_no_envelope_until_signed() {
        let result = MeasurementResult::scalar(
            ValueWithSigma::with_sigma(3.3, 0.01),
            "V",
            Provenance::default(),
            0.0,
        );
        assert!(result.envelope.is_none());
        assert_eq!(result.units, "V");
    }
}
