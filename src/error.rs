//! Error types for the classifier crate.

use thiserror::Error;

/// Errors raised while configuring, building or running the classifier.
#[derive(Debug, Error)]
pub enum Error {
    /// Neither exclusive nor overlapping classes were supplied.
    #[error("at least one of exclusive_classes or overlapping_classes must be provided")]
    NoClasses,

    /// A class set was supplied but contains no labels.
    #[error("{0} class set is empty")]
    EmptyClasses(&'static str),

    /// A hyperparameter is out of range.
    #[error("invalid classifier configuration: {0}")]
    InvalidConfig(String),

    /// The network type string is not recognized.
    #[error("unknown network type '{0}', expected 'lstm' or 'conv_net'")]
    UnknownNetworkType(String),

    /// Input tensors do not match what the network was built for.
    #[error("input mismatch: expected {expected}, got {actual}")]
    InputMismatch {
        /// Expected layout.
        expected: String,
        /// Actual layout.
        actual: String,
    },

    /// Error surfaced by candle.
    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML (de)serialization error.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Creates an invalid config error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    /// Creates an input mismatch error.
    #[must_use]
    pub fn input_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InputMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Result type for classifier operations.
pub type Result<T> = std::result::Result<T, Error>;
