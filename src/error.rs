//! Error types for Pacer
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in Pacer
#[derive(Debug, Error)]
pub enum PacerError {
    /// A work source could not produce parameters for a round
    #[error("Work source error: {0}")]
    WorkSource(String),

    /// Configuration values are out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for Pacer operations
pub type Result<T> = std::result::Result<T, PacerError>;
