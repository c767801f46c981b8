//! Application state shared across handlers.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::config::Config;
use crate::ingest::Ingestor;

/// Shared application state.
pub struct AppState {
    /// The ingestion pipeline, also shared with the flush scheduler.
    pub ingestor: Arc<Ingestor>,
    /// Effective configuration, fixed for the lifetime of the process.
    pub config: Config,
    /// When the service started.
    pub started_at: OffsetDateTime,
}

impl AppState {
    /// Create new application state.
    pub fn new(ingestor: Arc<Ingestor>, config: Config) -> Arc<Self> {
        Arc::new(Self {
            ingestor,
            config,
            started_at: OffsetDateTime::now_utc(),
        })
    }

    /// Seconds since the service started.
    pub fn uptime_seconds(&self) -> u64 {
        (OffsetDateTime::now_utc() - self.started_at)
            .whole_seconds()
            .max(0) as u64
    }
}
