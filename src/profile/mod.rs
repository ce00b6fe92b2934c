//! `ProfileSpec` — the typed model of a YAML instrument profile (spec §3, §4.2).
//!
//! A profile is data: it describes a device's channels, accuracy table,
//! safety-schema skeleton, and simulation rules. The runtime is the
//! interpreter; vendor-specific profile content is out of scope here
//! (spec §1).

mod rules;
mod validate;

pub use rules::{format_sim_number, ActionKind, ResponseEvalOrder, SimRule, SimValue};
pub use validate::migrate_legacy_rules;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LabError, LabResult};

/// The kind of instrument a profile describes (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Oscilloscope,
    Psu,
    Dmm,
    Awg,
    Load,
    Sa,
    Vna,
    PowerMeter,
}

/// One channel's static description within a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Channel index as addressed by SCPI commands (1-based, vendor-defined).
    pub index: u32,
    /// Functional role, e.g. `"analog"`, `"output"`, `"trigger"`.
    pub role: String,
    /// Free-form capability flags declared by the profile author.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// One entry of a profile's measurement-accuracy table (spec §3, §4.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracySpec {
    /// Percent-of-reading contribution to uncertainty.
    pub percent_reading: f64,
    /// Fixed-offset contribution to uncertainty, in `unit`.
    pub offset_value: f64,
    /// Physical unit the accuracy entry applies to.
    pub unit: String,
}

/// Per-quantity bound pair. `None` means unbounded in that direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub max: Option<f64>,
    pub min: Option<f64>,
}

/// Per-channel safety schema skeleton (spec §3). Actual operating limits
/// come from the bench overlay (§4.4); this is only the shape the bench's
/// limits are validated against (known channels, known quantities).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetySchema {
    /// channel index -> quantity name -> bound skeleton
    #[serde(default)]
    pub channels: HashMap<u32, HashMap<String, Bound>>,
}

/// `simulation:` block of a profile (spec §3, §4.6).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationSpec {
    /// Initial simulator state, deep-copied per `SimEngine` instance.
    #[serde(default)]
    pub state: HashMap<String, SimValue>,
    /// Ordered rule list, first-match-wins.
    #[serde(default)]
    pub scpi: Vec<SimRule>,
}

/// A fully parsed, validated instrument profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSpec {
    pub model_id: String,
    pub device_type: DeviceType,
    #[serde(default)]
    pub channels: Vec<ChannelSpec>,
    #[serde(default)]
    pub accuracy_table: HashMap<String, AccuracySpec>,
    #[serde(default)]
    pub safety_schema: SafetySchema,
    #[serde(default)]
    pub simulation: SimulationSpec,
}

impl ProfileSpec {
    /// Parse and validate a profile from a YAML document.
    pub fn from_yaml_str(yaml: &str) -> LabResult<Self> {
        let raw: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        let raw = migrate_legacy_rules(raw);
        let profile: ProfileSpec = serde_yaml::from_value(raw)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Parse and validate a profile from a file on disk.
    pub fn from_path(path: &Path) -> LabResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Look up a channel by its declared index.
    pub fn channel(&self, index: u32) -> Option<&ChannelSpec> {
        self.channels.iter().find(|c| c.index == index)
    }

    /// Look up an accuracy-table entry by its mode/range key.
    pub fn accuracy(&self, mode_key: &str) -> Option<&AccuracySpec> {
        self.accuracy_table.get(mode_key)
    }

    /// Ordered simulation rules, first-match-wins.
    pub fn sim_rules(&self) -> &[SimRule] {
        &self.simulation.scpi
    }

    /// Cross-field invariants from spec §3/§4.2.
    fn validate(&self) -> LabResult<()> {
        if self.model_id.trim().is_empty() {
            return Err(LabError::Profile("model_id must not be empty".into()));
        }

        let mut seen_index = std::collections::HashSet::new();
        for ch in &self.channels {
            if !seen_index.insert(ch.index) {
                return Err(LabError::Profile(format!(
                    "duplicate channel index {}",
                    ch.index
                )));
            }
        }

        // accuracy-table keys are unique by construction (HashMap), but the
        // YAML might declare an empty unit which is otherwise nonsensical.
        for (key, acc) in &self.accuracy_table {
            if acc.unit.trim().is_empty() {
                return Err(LabError::Profile(format!(
                    "accuracy entry '{key}' has an empty unit"
                )));
            }
        }

        for ch_index in self.safety_schema.channels.keys() {
            if self.channel(*ch_index).is_none() {
                return Err(LabError::Profile(format!(
                    "safety_schema references unknown channel {ch_index}"
                )));
            }
        }

        for rule in &self.simulation.scpi {
            rule.compile_pattern().map_err(|e| {
                LabError::Profile(format!("simulation rule '{}' does not compile: {e}", rule.command()))
            })?;
        }

        Ok(())
    }
}

/// Resolves namespaced profile keys (`vendor/model`) against a catalog
/// directory, falling back to treating the key as a file path (spec §4.2).
pub struct ProfileCatalog {
    root: PathBuf,
}

impl ProfileCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve and load a profile by namespaced key or absolute/relative path.
    pub fn load(&self, key_or_path: &str) -> LabResult<ProfileSpec> {
        let direct = Path::new(key_or_path);
        if direct.is_file() {
            return ProfileSpec::from_path(direct);
        }

        let candidate = self.root.join(format!("{key_or_path}.yaml"));
        if candidate.is_file() {
            return ProfileSpec::from_path(&candidate);
        }

        Err(LabError::Profile(format!(
            "no profile found for '{key_or_path}' (looked in {} and as a direct path)",
            candidate.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
model_id: keysight/EDU36311A
device_type: psu
channels:
  - index: 1
    role: output
  - index: 2
    role: output
accuracy_table:
  dc_5V:
    percent_reading: 0.05
    offset_value: 0.002
    unit: V
safety_schema:
  channels:
    1:
      voltage: { max: 30.0, min: 0.0 }
simulation:
  state:
    ch1_voltage: 0.0
  scpi:
    - command: "\\*IDN\\?"
      response: "Keysight,EDU36311A,0,1.0"
    - command: "VOLT (?P<v>[0-9.]+),\\(@1\\)"
      action: set
      target: ch1_voltage
      value: "float(groups.v)"
"#
    }

    #[test]
    fn parses_and_validates_a_well_formed_profile() {
        let profile = ProfileSpec::from_yaml_str(sample_yaml()).expect("parses");
        assert_eq!(profile.model_id, "keysight/EDU36311A");
        assert_eq!(profile.channel(1).unwrap().role, "output");
        assert!(profile.accuracy("dc_5V").is_some());
        assert_eq!(profile.sim_rules().len(), 2);
    }

    #[test]
    fn rejects_duplicate_channel_indices() {
        let yaml = r#"
model_id: x
device_type: dmm
channels:
  - index: 1
    role: a
  - index: 1
    role: b
"#;
        let err = ProfileSpec::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate channel index"));
    }

    #[test]
    fn rejects_safety_schema_referencing_unknown_channel() {
        let yaml = r#"
model_id: x
device_type: dmm
channels:
  - index: 1
    role: a
safety_schema:
  channels:
    9:
      voltage: { max: 5.0 }
"#;
        let err = ProfileSpec::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("unknown channel"));
    }

    #[test]
    fn rejects_non_compiling_regex_pattern() {
        let yaml = r#"
model_id: x
device_type: dmm
simulation:
  scpi:
    - command: "VOLT(("
      response: "ok"
"#;
        let err = ProfileSpec::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("does not compile"));
    }
}
