//! Subrun discovery and grouping by instrument configuration.
//!
//! Metadata comes from one of two sources, picked by what the caller has on
//! disk: a structured manifest ([`ManifestSource`]) or per-run info files with
//! embedded notes ([`RunInfoSource`]). Either way, problems with a single
//! subrun or file are logged and recorded as skips; they never abort the
//! whole index.

mod manifest;
mod runinfo;

pub use manifest::{parse_manifest, ManifestSource};
pub use runinfo::{parse_notes, parse_run_info, RunInfo, RunInfoPaths, RunInfoSource, DEFAULT_PREFIX};

use crate::Result;
use serde::Serialize;
use sesame_core::{
    ConfigurationKey, CurrentSettings, KeyField, KeyFilter, ReductionConfig, RunSet,
    SubrunMetadata,
};

/// One subrun as read from a source, before canonicalization.
#[derive(Debug, Clone)]
pub struct SubrunRecord {
    pub settings: CurrentSettings,
    pub metadata: SubrunMetadata,
}

/// A subrun or file that was left out of the index, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    /// Run id, subrun id or file path.
    pub source: String,
    pub reason: String,
}

impl SkippedEntry {
    pub fn new(source: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            reason: reason.into(),
        }
    }
}

/// Output of one source read.
#[derive(Debug, Clone, Default)]
pub struct SourceBatch {
    pub records: Vec<SubrunRecord>,
    pub skipped: Vec<SkippedEntry>,
}

/// A place subrun metadata can be read from.
pub trait ConfigurationSource {
    /// Short description for logs and skip records.
    fn describe(&self) -> String;

    /// Reads every subrun this source knows about.
    ///
    /// # Errors
    /// Returns an error if the source as a whole is unreadable. Problems
    /// confined to one subrun belong in [`SourceBatch::skipped`].
    fn read(&self, config: &ReductionConfig) -> Result<SourceBatch>;
}

/// Result of indexing.
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    pub run_set: RunSet,
    pub skipped: Vec<SkippedEntry>,
    /// Subruns dropped by the key filter.
    pub filtered: usize,
}

/// Builds a [`RunSet`] from configuration sources.
#[derive(Debug, Clone)]
pub struct ConfigurationIndexer {
    config: ReductionConfig,
    filter: Option<KeyFilter>,
}

impl ConfigurationIndexer {
    #[must_use]
    pub fn new(config: ReductionConfig) -> Self {
        Self {
            config,
            filter: None,
        }
    }

    /// Restricts indexing to subruns whose floored field equals the filter
    /// value.
    #[must_use]
    pub fn with_filter(mut self, filter: KeyFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Indexes every source in order. Subruns keep their discovery order
    /// inside each configuration bucket.
    pub fn index(&self, sources: &[&dyn ConfigurationSource]) -> IndexReport {
        let mut report = IndexReport::default();
        for source in sources {
            match source.read(&self.config) {
                Ok(batch) => {
                    for skip in &batch.skipped {
                        log::warn!("skipping {}: {}", skip.source, skip.reason);
                    }
                    report.skipped.extend(batch.skipped);
                    for record in batch.records {
                        self.add(&mut report, record);
                    }
                }
                Err(e) => {
                    let name = source.describe();
                    log::warn!("skipping {name}: {e}");
                    report.skipped.push(SkippedEntry::new(name, e.to_string()));
                }
            }
        }
        log::info!(
            "indexed {} subruns in {} configurations ({} skipped, {} filtered)",
            report.run_set.subrun_count(),
            report.run_set.len(),
            report.skipped.len(),
            report.filtered
        );
        report
    }

    fn add(&self, report: &mut IndexReport, record: SubrunRecord) {
        if let Some(filter) = &self.filter {
            if !filter.matches(&record.settings) {
                report.filtered += 1;
                return;
            }
        }
        match ConfigurationKey::from_settings(&record.settings, self.config.key_decimals) {
            Ok(key) => report.run_set.insert(key, record.metadata),
            Err(e) => {
                log::warn!("skipping {}: {e}", record.metadata.run_id);
                report
                    .skipped
                    .push(SkippedEntry::new(record.metadata.run_id, e.to_string()));
            }
        }
    }
}

/// Parses a current value, accepting surrounding whitespace.
pub(crate) fn parse_current(field: KeyField, text: &str) -> std::result::Result<f64, String> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| format!("{field} current {text:?} is not a number"))
}
