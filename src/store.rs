//! Persistent measurement store contract (spec §4.5, §7): consumed, not
//! implemented, by the core. A `MeasurementSession` or a compliance
//! envelope writer calls this trait to hand a finished artifact off to
//! whatever database a caller wires in; no concrete backend ships here.

use async_trait::async_trait;

use crate::error::LabResult;

/// One hit from [`MeasurementStore::search`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub id: String,
    pub title: String,
    pub description: String,
}

/// External persistence contract for experiments and compliance envelopes
/// (spec §4.5 "the external store"). Envelopes are stored side-by-side with
/// their result under an adjacent key, never inline.
#[async_trait]
pub trait MeasurementStore: Send + Sync {
    /// Persist `blob` under `id`, or a store-assigned id when `id` is
    /// `None`. Returns the id the blob was stored under.
    async fn put(&self, id: Option<&str>, blob: &[u8]) -> LabResult<String>;

    /// Fetch the blob stored under `id`.
    async fn get(&self, id: &str) -> LabResult<Vec<u8>>;

    /// Full-text search over stored titles/descriptions.
    async fn search(&self, query: &str) -> LabResult<Vec<SearchHit>>;
}
