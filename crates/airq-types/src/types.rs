//! Core types for air quality telemetry.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{ValidationError, ValidationResult};
use crate::thresholds::ThresholdConfig;

/// One telemetry sample from a device, before alert evaluation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// Opaque device identifier.
    pub device_id: String,
    /// Temperature in degrees Celsius.
    pub temperature: f64,
    /// Relative humidity percentage.
    pub humidity: f64,
    /// Carbon monoxide concentration in ppm.
    pub co_ppm: f64,
    /// Hydrogen concentration in ppm.
    pub h2_ppm: f64,
    /// Butane concentration in ppm.
    pub butane_ppm: f64,
}

impl Reading {
    /// Create a builder for constructing a `Reading`.
    pub fn builder(device_id: impl Into<String>) -> ReadingBuilder {
        ReadingBuilder {
            reading: Reading {
                device_id: device_id.into(),
                temperature: 0.0,
                humidity: 0.0,
                co_ppm: 0.0,
                h2_ppm: 0.0,
                butane_ppm: 0.0,
            },
        }
    }

    /// Check that the reading is well formed.
    ///
    /// The device identifier must contain a non-whitespace character, every
    /// measurement must be finite, and gas concentrations cannot be negative.
    /// Temperature and humidity may be out of their comfortable range; that is
    /// what the alert evaluator is for.
    pub fn validate(&self) -> ValidationResult<()> {
        if self.device_id.trim().is_empty() {
            return Err(ValidationError::EmptyDeviceId);
        }

        let fields = [
            ("temperature", self.temperature),
            ("humidity", self.humidity),
            ("co_ppm", self.co_ppm),
            ("h2_ppm", self.h2_ppm),
            ("butane_ppm", self.butane_ppm),
        ];
        for (field, value) in fields {
            if !value.is_finite() {
                return Err(ValidationError::NonFinite { field, value });
            }
        }

        // co, h2 and butane
        for &(field, value) in &fields[2..] {
            if value < 0.0 {
                return Err(ValidationError::Negative { field, value });
            }
        }

        Ok(())
    }
}

/// Builder for [`Reading`].
#[derive(Debug)]
#[must_use]
pub struct ReadingBuilder {
    reading: Reading,
}

impl ReadingBuilder {
    /// Set temperature (°C).
    pub fn temperature(mut self, value: f64) -> Self {
        self.reading.temperature = value;
        self
    }

    /// Set relative humidity (%).
    pub fn humidity(mut self, value: f64) -> Self {
        self.reading.humidity = value;
        self
    }

    /// Set CO concentration (ppm).
    pub fn co_ppm(mut self, value: f64) -> Self {
        self.reading.co_ppm = value;
        self
    }

    /// Set H2 concentration (ppm).
    pub fn h2_ppm(mut self, value: f64) -> Self {
        self.reading.h2_ppm = value;
        self
    }

    /// Set butane concentration (ppm).
    pub fn butane_ppm(mut self, value: f64) -> Self {
        self.reading.butane_ppm = value;
        self
    }

    /// Build the `Reading`.
    #[must_use]
    pub fn build(self) -> Reading {
        self.reading
    }
}

/// Alerts derived from a reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AlertVector {
    /// Any of the individual alerts is raised.
    pub alert: bool,
    pub co_alert: bool,
    pub butane_alert: bool,
    pub temperature_alert: bool,
    pub humidity_alert: bool,
}

/// A reading plus its alerts, stamped at ingestion. The unit of storage.
///
/// Serializes flat, with field names matching the CSV header.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Record {
    /// Ingestion time (UTC, microsecond precision).
    #[cfg_attr(feature = "serde", serde(with = "crate::timestamp::naive_iso"))]
    pub timestamp: OffsetDateTime,
    pub device_id: String,
    pub temperature: f64,
    pub humidity: f64,
    pub co_ppm: f64,
    pub h2_ppm: f64,
    pub butane_ppm: f64,
    pub alert: bool,
    pub co_alert: bool,
    pub butane_alert: bool,
    pub temperature_alert: bool,
    pub humidity_alert: bool,
}

impl Record {
    /// Combine a reading and its alerts at the given time.
    pub fn new(timestamp: OffsetDateTime, reading: Reading, alerts: AlertVector) -> Self {
        Self {
            timestamp,
            device_id: reading.device_id,
            temperature: reading.temperature,
            humidity: reading.humidity,
            co_ppm: reading.co_ppm,
            h2_ppm: reading.h2_ppm,
            butane_ppm: reading.butane_ppm,
            alert: alerts.alert,
            co_alert: alerts.co_alert,
            butane_alert: alerts.butane_alert,
            temperature_alert: alerts.temperature_alert,
            humidity_alert: alerts.humidity_alert,
        }
    }

    /// Evaluate `reading` against `thresholds` and stamp it with the current time.
    pub fn capture(reading: Reading, thresholds: &ThresholdConfig) -> Self {
        let alerts = thresholds.evaluate(&reading);
        Self::new(crate::timestamp::now(), reading, alerts)
    }

    /// The reading portion of this record.
    pub fn reading(&self) -> Reading {
        Reading {
            device_id: self.device_id.clone(),
            temperature: self.temperature,
            humidity: self.humidity,
            co_ppm: self.co_ppm,
            h2_ppm: self.h2_ppm,
            butane_ppm: self.butane_ppm,
        }
    }

    /// The alert portion of this record.
    pub fn alerts(&self) -> AlertVector {
        AlertVector {
            alert: self.alert,
            co_alert: self.co_alert,
            butane_alert: self.butane_alert,
            temperature_alert: self.temperature_alert,
            humidity_alert: self.humidity_alert,
        }
    }
}
