//! Ingestion service and HTTP REST API for air quality sensors.
//!
//! This crate provides a service that:
//! - Accepts readings pushed by devices over HTTP
//! - Evaluates each reading against the alert thresholds
//! - Stages records in memory and flushes them in batches to a CSV file, or
//!   writes them straight to SQLite with a per-device retention cap
//! - Serves the latest record, recent records and a full CSV export
//!
//! # REST API Endpoints
//!
//! - `POST /api/data` - Submit a reading
//! - `GET /latest` - Latest record, optionally for one device
//! - `GET /download/csv` - All records as CSV
//! - `GET /api/records` - Newest records first
//! - `GET /api/status` - Pipeline status
//! - `GET /health` - Service health check
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/airq/server.toml`. Every
//! value can be overridden with a command line flag or `AIRQ_*` environment
//! variable; see [`config`].

pub mod api;
pub mod config;
pub mod ingest;
pub mod scheduler;
pub mod state;

pub use config::{BufferConfig, Config, ConfigError, Overrides, ServerConfig, StorageConfig};
pub use ingest::{Accepted, IngestError, IngestStats, IngestStatus, Ingestor, Latest, Source};
pub use scheduler::FlushScheduler;
pub use state::AppState;
