//! Indexing and merging errors.

use sesame_core::SpinState;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for indexing and merging.
pub type Result<T> = std::result::Result<T, Error>;

/// Indexing and merging errors.
#[derive(Error, Debug)]
pub enum Error {
    /// XML parsing error.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Timestamp parsing error.
    #[error("timestamp error: {0}")]
    Timestamp(#[from] chrono::ParseError),

    /// Structurally invalid manifest or run-info content.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// A requested merge accepted no subruns.
    #[error("no subrun of the {state} bucket passed ({candidates} candidates)")]
    EmptyMerge { state: SpinState, candidates: usize },

    /// An input event file cannot be decoded safely; the merge is aborted.
    #[error("{}: {source}", path.display())]
    UnsafeInput {
        path: PathBuf,
        #[source]
        source: sesame_event::Error,
    },

    /// I/O library error.
    #[error("{0}")]
    IoError(#[from] sesame_io::Error),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] sesame_core::Error),
}
