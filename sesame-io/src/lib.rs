//! sesame-io: File I/O for sesame.
//!
//! This crate provides memory-mapped event file reading, beam-monitor
//! decoding, pixel mask files, and atomic (temp file plus rename) artifact
//! writing.
//!

mod error;
pub mod mask;
pub mod monitor;
mod reader;
mod writer;

pub use error::{Error, Result};
pub use mask::{parse_mask, read_mask};
pub use monitor::{decode_monitor, read_monitor, MonitorReading};
pub use reader::{EventFileReader, MappedFileReader};
pub use writer::{write_atomic, AtomicFile};
