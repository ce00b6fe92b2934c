//! Session-document model for record/replay (spec §6).
//!
//! ```yaml
//! <alias>:
//!   profile: <profile-ref>
//!   log:
//!     - { type: write|query, command: <str>, response?: <str>, timestamp: <float seconds> }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::LabResult;

/// Whether a logged call was a fire-and-forget write or a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEntryKind {
    Write,
    Query,
}

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLogEntry {
    #[serde(rename = "type")]
    pub kind: LogEntryKind,
    pub command: String,
    /// Present for `query` entries, absent for `write` entries (spec §6
    /// invariant).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    pub timestamp: f64,
}

/// One instrument's recorded session: the profile it was recorded against
/// plus its ordered call log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AliasLog {
    pub profile: String,
    #[serde(default)]
    pub log: Vec<SessionLogEntry>,
}

/// A full bench recording: one [`AliasLog`] per instrument alias.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionDocument(pub HashMap<String, AliasLog>);

impl SessionDocument {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn alias_log(&self, alias: &str) -> Option<&AliasLog> {
        self.0.get(alias)
    }

    pub fn insert(&mut self, alias: impl Into<String>, log: AliasLog) {
        self.0.insert(alias.into(), log);
    }

    /// Merge another document's alias logs into this one, overwriting on
    /// alias collision.
    pub fn extend(&mut self, other: SessionDocument) {
        self.0.extend(other.0);
    }

    pub fn to_yaml(&self) -> LabResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml_str(yaml: &str) -> LabResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_path(path: &Path) -> LabResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn write_to_path(&self, path: &Path) -> LabResult<()> {
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }
}
