//! The record store capability contract.

use airq_types::Record;

use crate::error::Result;

/// Which kind of backend a [`RecordStore`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Append-only line file. Writes are staged in memory and flushed in batches.
    AppendSink,
    /// Transactional store with per-record identity. Every write is durable on return.
    Transactional,
}

impl BackendKind {
    /// Short backend name used in logs and errors.
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::AppendSink => "csv",
            BackendKind::Transactional => "sqlite",
        }
    }

    /// Whether writes should go through the ingestion buffer.
    pub fn stages_writes(self) -> bool {
        matches!(self, BackendKind::AppendSink)
    }

    /// Whether the backend can evict old records.
    pub fn supports_eviction(self) -> bool {
        matches!(self, BackendKind::Transactional)
    }
}

/// Durable storage for [`Record`]s.
///
/// Implementations are synchronous; async callers hold them behind a mutex
/// and call in while holding the lock.
pub trait RecordStore: Send {
    /// The kind of backend.
    fn kind(&self) -> BackendKind;

    /// Append a batch of records, preserving their order.
    ///
    /// A batch is committed entirely or not at all.
    fn append(&mut self, records: &[Record]) -> Result<()>;

    /// The most recent record, optionally restricted to one device.
    ///
    /// Returns `Ok(None)` when nothing matches.
    fn latest(&self, device_id: Option<&str>) -> Result<Option<Record>>;

    /// Every stored record, oldest first.
    fn all(&self) -> Result<Vec<Record>>;

    /// Up to `limit` of the newest records, newest first, optionally
    /// restricted to one device.
    ///
    /// The default scans [`all`](RecordStore::all); indexed backends override it.
    fn recent(&self, device_id: Option<&str>, limit: usize) -> Result<Vec<Record>> {
        let mut records = self.all()?;
        records.retain(|r| device_id.is_none_or(|id| r.device_id == id));
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }

    /// Number of stored records, optionally restricted to one device.
    fn count(&self, device_id: Option<&str>) -> Result<u64>;

    /// Remove the `n` oldest records of `device_id` as one atomic unit.
    ///
    /// Returns the number of records removed. Backends without eviction
    /// return [`Error::Unsupported`](crate::Error::Unsupported).
    fn delete_oldest(&mut self, device_id: &str, n: u64) -> Result<u64>;
}
