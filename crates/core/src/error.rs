//! Core error types

use thiserror::Error;

/// Core error type for Beacon
#[derive(Debug, Error)]
pub enum CoreError {
    /// Coordinate outside the valid latitude/longitude range
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
