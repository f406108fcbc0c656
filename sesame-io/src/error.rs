//! I/O error types.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// A file could not be opened, read or written.
    #[error("{}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O error without a path.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// Event-stream decoding error.
    #[error("event error: {0}")]
    EventError(#[from] sesame_event::Error),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] sesame_core::Error),
}

impl Error {
    /// Whether this is an I/O failure rather than bad content.
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Error::File { .. } | Error::Io(_))
    }
}

/// Attaches a path to I/O results.
pub(crate) trait PathContext<T> {
    fn with_path(self, path: &Path) -> Result<T>;
}

impl<T> PathContext<T> for std::io::Result<T> {
    fn with_path(self, path: &Path) -> Result<T> {
        self.map_err(|source| Error::File {
            path: path.to_path_buf(),
            source,
        })
    }
}
