//! sesame-core: Core types for spin-echo event reduction.
//!
//! This crate provides the types shared by the decoding, indexing and
//! merging crates: the reduction configuration, configuration keys and run
//! sets, histogram containers, the count-rate quality gate, and the
//! elementwise spectrum arithmetic used downstream of a merge.
//!

pub mod config;
pub mod error;
pub mod gate;
pub mod histogram;
pub mod key;
pub mod progress;
pub mod projection;
pub mod run_set;

pub use config::{EventLayout, MonitorEncoding, MonitorFormat, ReductionConfig, TimeConversion};
pub use error::{Error, Result};
pub use gate::{GateVerdict, QualityGate, RateBand, RejectReason};
pub use histogram::{DetectorCube, MonitorHistogram, PixelMask, Region};
pub use key::{ConfigurationKey, CurrentSettings, KeyField, KeyFilter, SpinState};
pub use progress::{CancellationToken, NoProgress, ProgressObserver};
pub use projection::Measurement;
pub use run_set::{RunSet, SubrunMetadata};
