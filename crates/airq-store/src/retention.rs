//! Per-device retention cap.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::RecordStore;
use crate::error::{Error, Result};

/// Maximum number of records kept per device.
///
/// ```
/// use airq_store::{RecordStore, RetentionPolicy, SqliteStore};
///
/// let mut store = SqliteStore::open_in_memory()?;
/// let policy = RetentionPolicy { max_per_device: 1000 };
/// assert_eq!(policy.enforce(&mut store, "esp32-01")?, 0);
/// # Ok::<(), airq_store::Error>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    pub max_per_device: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_per_device: 1000,
        }
    }
}

impl RetentionPolicy {
    /// Evict the oldest records of `device_id` beyond the cap.
    ///
    /// Counting and deleting happen under the same exclusive borrow of the
    /// store, so no append can slip in between. Returns how many records were
    /// evicted; calling again with no new appends evicts nothing.
    pub fn enforce(&self, store: &mut dyn RecordStore, device_id: &str) -> Result<u64> {
        let kind = store.kind();
        if !kind.supports_eviction() {
            return Err(Error::Unsupported {
                backend: kind.name(),
                operation: "retention",
            });
        }

        let count = store.count(Some(device_id))?;
        if count <= self.max_per_device {
            debug!(
                "{} has {} records, within cap of {}",
                device_id, count, self.max_per_device
            );
            return Ok(0);
        }

        let excess = count - self.max_per_device;
        let evicted = store.delete_oldest(device_id, excess)?;
        info!(
            "Evicted {} oldest records for {} (cap {})",
            evicted, device_id, self.max_per_device
        );
        Ok(evicted)
    }
}
