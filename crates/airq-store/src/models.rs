//! Data models for stored data.

use serde::Serialize;

use airq_types::Record;

/// A record read back from the transactional store, with its row identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    /// Database row ID.
    pub id: i64,
    #[serde(flatten)]
    pub record: Record,
}
