//! Event-stream decoding errors.

use thiserror::Error;

/// Result type for event decoding.
pub type Result<T> = std::result::Result<T, Error>;

/// Event-stream decoding errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Payload length is not a whole number of records, or the header is cut
    /// short. Decoding such a stream would misalign every following record.
    #[error(
        "truncated event stream: {len} bytes is not a {header}-byte header plus whole {record_size}-byte records"
    )]
    TruncatedStream {
        len: usize,
        record_size: usize,
        header: usize,
    },

    /// Cube construction was cancelled.
    #[error("cube construction cancelled")]
    Cancelled,

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] sesame_core::Error),
}
