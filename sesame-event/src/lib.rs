//! sesame-event: Event-stream record layouts and detector cube construction.
//!
//! Two incompatible record layouts share one decoding entry point,
//! [`decode`], which takes the layout as an explicit tag.
//!
//! # Key Components
//!
//! - [`legacy`] - 256-byte header plus packed 64-bit records on a 512 x 512 image
//! - [`current`] - headerless (tick, channel) word pairs remapped onto a 128 x 16 image
//! - [`WavelengthBinner`] - time-of-flight tick to wavelength bin
//! - [`CubeBuilder`] - batched, parallel cube construction with progress and cancellation
//!
//! # Processing Pipeline
//!
//! 1. Validate the byte length against the layout ([`decode`])
//! 2. Decode each batch of records in parallel into cube cells
//! 3. Tally the cells into a [`DetectorCube`](sesame_core::DetectorCube)
//! 4. Project to a wavelength spectrum ([`make_1d`])

pub mod cube;
pub mod current;
mod error;
pub mod legacy;
mod record;
pub mod stream;
mod wavelength;

pub use cube::{make_1d, wavelength_image, CubeBuilder, DEFAULT_BATCH_RECORDS};
pub use error::{Error, Result};
pub use record::RawEventRecord;
pub use stream::{decode, decode_word, validate_length, EventStream};
pub use wavelength::WavelengthBinner;

// Re-export core types for convenience
pub use sesame_core::EventLayout;
