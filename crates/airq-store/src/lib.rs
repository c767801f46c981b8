//! Durable storage for air quality records.
//!
//! Two interchangeable backends implement the [`RecordStore`] capability
//! contract:
//!
//! - [`CsvSink`]: an append-only CSV file. Writes are meant to be staged in
//!   memory and appended in batches; it cannot evict records.
//! - [`SqliteStore`]: a transactional SQLite database. Every append is durable
//!   on return and old records can be evicted per device.
//!
//! [`RetentionPolicy`] caps the number of records kept per device on
//! backends that support eviction.
//!
//! # Example
//!
//! ```
//! use airq_store::{RecordStore, SqliteStore};
//! use airq_types::{Reading, Record, ThresholdConfig};
//!
//! let mut store = SqliteStore::open_in_memory()?;
//! let reading = Reading::builder("esp32-01").temperature(21.0).humidity(40.0).build();
//! store.append(&[Record::capture(reading, &ThresholdConfig::default())])?;
//!
//! let latest = store.latest(Some("esp32-01"))?;
//! assert!(latest.is_some());
//! # Ok::<(), airq_store::Error>(())
//! ```

mod backend;
pub mod codec;
mod csv_sink;
mod error;
mod models;
mod queries;
mod retention;
mod schema;
mod store;

pub use backend::{BackendKind, RecordStore};
pub use csv_sink::CsvSink;
pub use error::{Error, Result};
pub use models::StoredRecord;
pub use queries::RecordQuery;
pub use retention::RetentionPolicy;
pub use store::SqliteStore;

/// Default CSV sink path following platform conventions.
///
/// - Linux: `~/.local/share/airq/air_quality_data.csv`
/// - macOS: `~/Library/Application Support/airq/air_quality_data.csv`
/// - Windows: `C:\Users\<user>\AppData\Local\airq\air_quality_data.csv`
pub fn default_csv_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("airq")
        .join("air_quality_data.csv")
}
