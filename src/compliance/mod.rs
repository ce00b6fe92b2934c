//! Compliance envelope: canonical hashing, signing, and verification (spec
//! §4.7, testable property 8).
//!
//! Grounded on the teacher's `experiment/document.rs` `new_uid()` idiom for
//! ID allocation; signing itself has no teacher precedent (the teacher
//! never signs anything) so `ed25519-dalek` is sourced from the pack's other
//! example manifests as an enrichment (see DESIGN.md) alongside `sha2`,
//! which the teacher already depends on.

pub mod audit;

pub use audit::AuditLog;

use std::collections::HashMap;

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ComplianceErrorKind, LabError, LabResult};
use crate::measurement::{ColumnValues, MeasurementResult, MeasurementValues};
use crate::profile::format_sim_number;

/// A detached signature over a result's canonical bytes (spec §4.7).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Random v4 id allocated when the envelope is signed; what
    /// [`audit::AuditEntry::envelope_id`] refers back to.
    pub id: String,
    pub alg: String,
    pub key_id: String,
    #[serde(with = "hex_bytes")]
    pub sig_bytes: Vec<u8>,
    pub hash_hex: String,
}

/// Holds the signing keys this process instance is configured with.
#[derive(Default)]
pub struct SigningKeyring {
    keys: HashMap<String, SigningKey>,
}

impl SigningKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key_id: impl Into<String>, key: SigningKey) {
        self.keys.insert(key_id.into(), key);
    }

    /// Canonicalize, hash, and sign `result` with the named key.
    pub fn sign(&self, key_id: &str, result: &MeasurementResult) -> LabResult<Envelope> {
        let key = self
            .keys
            .get(key_id)
            .ok_or_else(|| LabError::Compliance(ComplianceErrorKind::KeyUnavailable(key_id.to_string())))?;

        let canonical = canonical_bytes(result)?;
        let digest = Sha256::digest(&canonical);
        let signature = key.sign(&digest);

        Ok(Envelope {
            id: uuid::Uuid::new_v4().to_string(),
            alg: "ed25519-sha256".to_string(),
            key_id: key_id.to_string(),
            sig_bytes: signature.to_bytes().to_vec(),
            hash_hex: hex_encode(&digest),
        })
    }

    /// Recompute canonical bytes and hash, and verify the envelope's
    /// signature against its recorded `key_id`.
    pub fn verify(&self, result: &MeasurementResult, envelope: &Envelope) -> LabResult<bool> {
        let Some(key) = self.keys.get(&envelope.key_id) else {
            return Ok(false);
        };
        let verifying_key: VerifyingKey = key.verifying_key();

        let canonical = canonical_bytes(result)?;
        let digest = Sha256::digest(&canonical);
        if hex_encode(&digest) != envelope.hash_hex {
            return Ok(false);
        }

        let Ok(sig_bytes): Result<[u8; 64], _> = envelope.sig_bytes.as_slice().try_into() else {
            return Ok(false);
        };
        let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);
        Ok(verifying_key.verify(&digest, &signature).is_ok())
    }
}

/// Serialize a [`MeasurementResult`] into a stable byte sequence: fixed
/// field order, canonical number formatting, UTF-8 only (spec §4.7).
pub fn canonical_bytes(result: &MeasurementResult) -> LabResult<Vec<u8>> {
    let mut out = String::new();

    match &result.values {
        MeasurementValues::Scalar(v) => {
            out.push_str("kind=scalar;value=");
            out.push_str(&canonical_number(v.value)?);
            out.push_str(";sigma=");
            match v.sigma {
                Some(s) => out.push_str(&canonical_number(s)?),
                None => out.push_str("null"),
            }
        }
        MeasurementValues::Waveform { frame } | MeasurementValues::Tabular { frame } => {
            out.push_str("kind=frame;rows=");
            out.push_str(&frame.row_count().to_string());
            for column in &frame.columns {
                out.push_str(";col.");
                out.push_str(&column.name);
                out.push('=');
                match &column.values {
                    ColumnValues::Numbers(values) => {
                        for (i, value) in values.iter().enumerate() {
                            if i > 0 {
                                out.push(',');
                            }
                            match value {
                                Some(n) => out.push_str(&canonical_number(*n)?),
                                None => out.push_str("null"),
                            }
                        }
                    }
                    ColumnValues::Strings(values) => {
                        for (i, value) in values.iter().enumerate() {
                            if i > 0 {
                                out.push(',');
                            }
                            out.push_str(value.as_deref().unwrap_or("null"));
                        }
                    }
                }
            }
        }
    }

    out.push_str(";units=");
    out.push_str(&result.units);
    out.push_str(";timestamp_monotonic=");
    out.push_str(&canonical_number(result.timestamp_monotonic)?);
    out.push_str(";timestamp_wall=");
    out.push_str(&result.timestamp_wall.to_rfc3339());
    out.push_str(";provenance.actor=");
    out.push_str(&result.provenance.actor);
    out.push_str(";provenance.instrument_idn=");
    out.push_str(&result.provenance.instrument_idn);
    out.push_str(";provenance.profile_hash=");
    out.push_str(&result.provenance.profile_hash);
    out.push_str(";provenance.command_trace_fingerprint=");
    out.push_str(&result.provenance.command_trace_fingerprint);

    Ok(out.into_bytes())
}

fn canonical_number(n: f64) -> LabResult<String> {
    if n.is_nan() || n.is_infinite() {
        return Err(LabError::Compliance(ComplianceErrorKind::SignatureInvalid(
            "cannot canonicalize NaN/Inf value".to_string(),
        )));
    }
    Ok(format_sim_number(n))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        hex.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let hex = String::deserialize(deserializer)?;
        (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::{Provenance, ValueWithSigma};
    use rand::rngs::OsRng;

    fn sample_result(value: f64) -> MeasurementResult {
        MeasurementResult::scalar(
            ValueWithSigma::with_sigma(value, 0.01),
            "V",
            Provenance {
                actor: "operator".into(),
                instrument_idn: "Keysight,EDU36311A,0,1.0".into(),
                profile_hash: "deadbeef".into(),
                command_trace_fingerprint: "abc123".into(),
            },
            0.0,
        )
    }

    #[test]
    fn verify_round_trips_for_an_unmodified_result() {
        let mut keyring = SigningKeyring::new();
        keyring.insert("bench-key-1", SigningKey::generate(&mut OsRng));

        let result = sample_result(4.999);
        let envelope = keyring.sign("bench-key-1", &result).unwrap();
        assert!(keyring.verify(&result, &envelope).unwrap());
    }

    #[test]
    fn verify_fails_after_the_result_is_mutated() {
        let mut keyring = SigningKeyring::new();
        keyring.insert("bench-key-1", SigningKey::generate(&mut OsRng));

        let result = sample_result(4.999);
        let envelope = keyring.sign("bench-key-1", &result).unwrap();

        let mutated = sample_result(5.000);
        assert!(!keyring.verify(&mutated, &envelope).unwrap());
    }

    #[test]
    fn sign_fails_for_an_unknown_key() {
        let keyring = SigningKeyring::new();
        let err = keyring.sign("missing", &sample_result(1.0)).unwrap_err();
        assert!(matches!(err, LabError::Compliance(ComplianceErrorKind::KeyUnavailable(_))));
    }

    #[test]
    fn canonicalization_rejects_nan() {
        let result = sample_result(f64::NAN);
        let err = canonical_bytes(&result).unwrap_err();
        assert!(matches!(err, LabError::Compliance(ComplianceErrorKind::SignatureInvalid(_))));
    }
}
