//! Structured error type with machine-readable reason codes.
//!
//! Callers branch on [`ErrorReason`], not on message strings. Transient
//! "not found in this layer" conditions during multi-layer scans never
//! surface as errors; only write failures and genuinely unrecoverable
//! conditions do.

use serde::Serialize;
use thiserror::Error;

/// Reason codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorReason {
    // Caller-side problems
    ArgumentInvalid,
    KeyFormatInvalid,
    FeatureValueInvalid,

    // Write placement
    NotWriteable,
    NoWriteableLocation,
    InputInvalid,

    // Resolution
    NoMatchingEntry,
    NoConfigurationFound,
    ConversionFailure,

    // Internal
    CodeLogicError,
    UnknownMandatoryFeature,
    FactoryClosed,
}

/// Error carrying a reason code plus optional context.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ConfigError {
    pub reason: ErrorReason,
    pub message: String,
    /// The configuration key involved, if any.
    pub key: Option<String>,
    /// The location involved, rendered, if any.
    pub location: Option<String>,
}

impl ConfigError {
    pub fn new(reason: ErrorReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            key: None,
            location: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    // Convenience constructors

    pub fn argument_invalid(detail: impl Into<String>) -> Self {
        Self::new(ErrorReason::ArgumentInvalid, detail)
    }

    pub fn key_format(key: &str, detail: &str) -> Self {
        Self::new(
            ErrorReason::KeyFormatInvalid,
            format!("invalid key '{}': {}", key, detail),
        )
        .with_key(key)
    }

    pub fn feature_value(detail: impl Into<String>) -> Self {
        Self::new(ErrorReason::FeatureValueInvalid, detail)
    }

    pub fn not_writeable(detail: impl Into<String>) -> Self {
        Self::new(ErrorReason::NotWriteable, detail)
    }

    pub fn no_writeable_location(key: &str) -> Self {
        Self::new(
            ErrorReason::NoWriteableLocation,
            format!("no writeable location accepts '{}'", key),
        )
        .with_key(key)
    }

    pub fn input_invalid(key: &str) -> Self {
        Self::new(
            ErrorReason::InputInvalid,
            format!("value for '{}' rejected by specification", key),
        )
        .with_key(key)
    }

    pub fn no_matching_entry(key: &str) -> Self {
        Self::new(
            ErrorReason::NoMatchingEntry,
            format!("no entry found for '{}'", key),
        )
        .with_key(key)
    }

    pub fn no_configuration(name: &str) -> Self {
        Self::new(
            ErrorReason::NoConfigurationFound,
            format!("no configuration found for '{}'", name),
        )
    }

    pub fn conversion(key: &str, wanted: &str) -> Self {
        Self::new(
            ErrorReason::ConversionFailure,
            format!("cannot convert value of '{}' to {}", key, wanted),
        )
        .with_key(key)
    }

    pub fn logic(detail: impl Into<String>) -> Self {
        Self::new(ErrorReason::CodeLogicError, detail)
    }

    pub fn closed(what: &str) -> Self {
        Self::new(ErrorReason::FactoryClosed, format!("{} is closed", what))
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
