//! Platform-agnostic types for air quality telemetry.
//!
//! This crate provides the data model shared by the store and the
//! ingestion service.
//!
//! # Features
//!
//! - [`Reading`]: one sample from a device (temperature, humidity, CO, H2, butane)
//! - [`ThresholdConfig`]: alert thresholds and the pure alert evaluator
//! - [`Record`]: a reading plus its [`AlertVector`], stamped at ingestion
//! - [`ValidationError`]: why a reading or configuration was rejected
//!
//! # Example
//!
//! ```
//! use airq_types::{Reading, Record, ThresholdConfig};
//!
//! let reading = Reading::builder("esp32-01")
//!     .temperature(22.5)
//!     .humidity(45.0)
//!     .co_ppm(12.0)
//!     .build();
//! reading.validate()?;
//!
//! let record = Record::capture(reading, &ThresholdConfig::default());
//! assert!(!record.alert);
//! # Ok::<(), airq_types::ValidationError>(())
//! ```

pub mod error;
pub mod thresholds;
pub mod timestamp;
pub mod types;

pub use error::{ValidationError, ValidationResult};
pub use thresholds::ThresholdConfig;
pub use types::{AlertVector, Reading, ReadingBuilder, Record};
