//! Alert thresholds and evaluation.
//!
//! Gas concentrations alert when strictly above their high-water mark.
//! Temperature and humidity alert when outside their closed acceptable
//! interval, so values exactly at a bound never alert.
//!
//! # Example
//!
//! ```
//! use airq_types::{Reading, ThresholdConfig};
//!
//! let thresholds = ThresholdConfig::default();
//! let reading = Reading::builder("esp32-01")
//!     .temperature(31.0)
//!     .humidity(50.0)
//!     .co_ppm(50.0)
//!     .build();
//!
//! let alerts = thresholds.evaluate(&reading);
//! assert!(alerts.temperature_alert);
//! assert!(!alerts.co_alert);
//! assert!(alerts.alert);
//! ```

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::{AlertVector, Reading};

/// Threshold configuration, read-only once the process has started.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ThresholdConfig {
    /// CO high-water mark in ppm.
    pub co_high: f64,
    /// Butane high-water mark in ppm.
    pub butane_high: f64,
    /// Lowest acceptable temperature (°C).
    pub temperature_min: f64,
    /// Highest acceptable temperature (°C).
    pub temperature_max: f64,
    /// Lowest acceptable relative humidity (%).
    pub humidity_min: f64,
    /// Highest acceptable relative humidity (%).
    pub humidity_max: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            co_high: 50.0,
            butane_high: 10.0,
            temperature_min: 15.0,
            temperature_max: 30.0,
            humidity_min: 20.0,
            humidity_max: 70.0,
        }
    }
}

impl ThresholdConfig {
    /// Compute the alert vector for a reading.
    pub fn evaluate(&self, reading: &Reading) -> AlertVector {
        let co_alert = reading.co_ppm > self.co_high;
        let butane_alert = reading.butane_ppm > self.butane_high;
        let temperature_alert =
            !(self.temperature_min <= reading.temperature && reading.temperature <= self.temperature_max);
        let humidity_alert =
            !(self.humidity_min <= reading.humidity && reading.humidity <= self.humidity_max);

        AlertVector {
            alert: co_alert || butane_alert || temperature_alert || humidity_alert,
            co_alert,
            butane_alert,
            temperature_alert,
            humidity_alert,
        }
    }

    /// Check the configuration for non-finite values and inverted ranges.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        let values = [
            ("co_high", self.co_high),
            ("butane_high", self.butane_high),
            ("temperature_min", self.temperature_min),
            ("temperature_max", self.temperature_max),
            ("humidity_min", self.humidity_min),
            ("humidity_max", self.humidity_max),
        ];
        for (field, value) in values {
            if !value.is_finite() {
                errors.push(ValidationError::NonFinite { field, value });
            }
        }

        if self.temperature_min > self.temperature_max {
            errors.push(ValidationError::InvertedRange {
                field: "temperature",
                min: self.temperature_min,
                max: self.temperature_max,
            });
        }
        if self.humidity_min > self.humidity_max {
            errors.push(ValidationError::InvertedRange {
                field: "humidity",
                min: self.humidity_min,
                max: self.humidity_max,
            });
        }

        errors
    }
}
