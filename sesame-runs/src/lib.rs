//! sesame-runs: Subrun indexing and run merging.
//!
//! # Key Components
//!
//! - [`ConfigurationIndexer`] - reads subrun metadata from a
//!   [`ConfigurationSource`] and groups it into a [`RunSet`](sesame_core::RunSet)
//! - [`ManifestSource`] / [`RunInfoSource`] - the two metadata sources
//! - [`RunAggregator`] - partitions by spin state, applies the quality gate and
//!   streams accepted subruns into merged artifacts

pub mod aggregator;
mod error;
pub mod index;

pub use aggregator::{
    ArtifactPaths, BucketMerge, Candidate, ExclusionReason, MergeBucket, MergeOptions,
    MergeReport, RunAggregator, SubrunDecision, SubrunOutcome,
};
pub use error::{Error, Result};
pub use index::{
    ConfigurationIndexer, ConfigurationSource, IndexReport, ManifestSource, RunInfoPaths,
    RunInfoSource, SkippedEntry, SourceBatch, SubrunRecord, DEFAULT_PREFIX,
};
