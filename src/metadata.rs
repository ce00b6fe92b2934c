//! Experiment metadata carried by a bench descriptor (spec §3, §6).
//!
//! A bench's optional `experiment:` block is a small, free-form header
//! describing who ran the bench and where results should land; it is not
//! interpreted by the runtime beyond being attached to the `Experiment`
//! a session produces.

use serde::{Deserialize, Serialize};

/// Optional `experiment:` block of a bench descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExperimentMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub database_path: Option<String>,
}

/// Builder for [`ExperimentMetadata`], mirroring the fluent construction
/// style used across the rest of this crate's descriptor types.
#[derive(Default)]
pub struct ExperimentMetadataBuilder {
    inner: ExperimentMetadata,
}

impl ExperimentMetadataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.inner.title = title.into();
        self
    }

    pub fn operator(mut self, operator: impl Into<String>) -> Self {
        self.inner.operator = Some(operator.into());
        self
    }

    pub fn database_path(mut self, path: impl Into<String>) -> Self {
        self.inner.database_path = Some(path.into());
        self
    }

    pub fn build(self) -> ExperimentMetadata {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_the_expected_metadata() {
        let metadata = ExperimentMetadataBuilder::new()
            .title("PSU soak test")
            .operator("j.doe")
            .database_path("./runs.db")
            .build();

        assert_eq!(metadata.title, "PSU soak test");
        assert_eq!(metadata.operator.as_deref(), Some("j.doe"));
        assert_eq!(metadata.database_path.as_deref(), Some("./runs.db"));
    }

    #[test]
    fn default_metadata_has_no_operator_or_database() {
        let metadata = ExperimentMetadata::default();
        assert!(metadata.operator.is_none());
        assert!(metadata.database_path.is_none());
    }
}
