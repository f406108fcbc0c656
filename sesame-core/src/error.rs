//! Error types for sesame-core.

use thiserror::Error;

/// Result type alias for sesame operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for sesame operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Two arrays that must line up elementwise do not.
    #[error("length mismatch: expected {expected}, found {found}")]
    LengthMismatch { expected: usize, found: usize },

    /// A pixel mask does not match the detector image it is applied to.
    #[error("mask shape {mask_height}x{mask_width} does not match image {height}x{width}")]
    MaskShape {
        mask_height: usize,
        mask_width: usize,
        height: usize,
        width: usize,
    },

    /// Unknown configuration key field name.
    #[error("unknown configuration field: {0}")]
    UnknownField(String),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
