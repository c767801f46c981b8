//! Validation errors for readings and threshold configuration.

use thiserror::Error;

/// Reasons a reading or threshold configuration is rejected.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ValidationError {
    /// The device identifier is empty or whitespace.
    #[error("device_id cannot be empty")]
    EmptyDeviceId,

    /// A numeric field is NaN or infinite.
    #[error("{field} must be a finite number, got {value}")]
    NonFinite { field: &'static str, value: f64 },

    /// A concentration is below zero.
    #[error("{field} cannot be negative, got {value}")]
    Negative { field: &'static str, value: f64 },

    /// The lower bound of an acceptable range is above its upper bound.
    #[error("{field}: minimum {min} is greater than maximum {max}")]
    InvertedRange {
        field: &'static str,
        min: f64,
        max: f64,
    },
}

impl ValidationError {
    /// Name of the offending field.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::EmptyDeviceId => "device_id",
            ValidationError::NonFinite { field, .. }
            | ValidationError::Negative { field, .. }
            | ValidationError::InvertedRange { field, .. } => field,
        }
    }
}

/// Result type alias using airq-types' ValidationError type.
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;
