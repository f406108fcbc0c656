//! Quality-gated merging of subruns into per-spin-state artifacts.
//!
//! Selected configuration keys are partitioned by the sign of the flipper
//! current. Each non-empty partition merges into its own set of artifacts:
//!
//! - `<base><state><suffix>_neutron_event.dat`: concatenated event payloads,
//!   preceded by the first accepted subrun's header for headered layouts
//! - `<base><state><suffix>_bmon_histo.dat`: elementwise monitor sum
//! - `<base><state><suffix>.txt`: optional text summary
//!
//! Payload bytes stream file to file, so memory use does not grow with the
//! number or size of subruns. Every artifact is written to a temporary file
//! and renamed only once the whole merge has succeeded; if any rename fails,
//! the artifacts already renamed are removed again.

use crate::{Error, Result};
use serde::Serialize;
use sesame_core::{
    ConfigurationKey, GateVerdict, KeyField, MonitorHistogram, ReductionConfig, RejectReason,
    RunSet, SpinState, SubrunMetadata,
};
use sesame_io::monitor::{encode_binary, write_legacy_text};
use sesame_io::AtomicFile;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Output paths of one merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactPaths {
    pub events: PathBuf,
    pub monitor: PathBuf,
    pub summary: PathBuf,
}

impl ArtifactPaths {
    #[must_use]
    pub fn new(dir: &Path, base: &str, state: SpinState, suffix: &str) -> Self {
        let stem = format!("{base}{}{suffix}", state.label());
        Self {
            events: dir.join(format!("{stem}_neutron_event.dat")),
            monitor: dir.join(format!("{stem}_bmon_histo.dat")),
            summary: dir.join(format!("{stem}.txt")),
        }
    }
}

/// Where and how merged artifacts are written.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub output_dir: PathBuf,
    pub base_name: String,
    pub suffix: String,
    /// Also write the `.txt` summary.
    pub write_summary: bool,
    /// Run label printed on the summary's first line.
    pub run_label: String,
}

impl MergeOptions {
    pub fn new<P: AsRef<Path>>(output_dir: P, base_name: impl Into<String>) -> Self {
        let base_name = base_name.into();
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            run_label: base_name.clone(),
            base_name,
            suffix: String::new(),
            write_summary: false,
        }
    }

    #[must_use]
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    #[must_use]
    pub fn with_summary(mut self, run_label: impl Into<String>) -> Self {
        self.write_summary = true;
        self.run_label = run_label.into();
        self
    }

    #[must_use]
    pub fn paths(&self, state: SpinState) -> ArtifactPaths {
        ArtifactPaths::new(&self.output_dir, &self.base_name, state, &self.suffix)
    }
}

/// Why a candidate subrun was left out of a merge.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    QualityGate(RejectReason),
    /// The event or monitor file could not be read.
    Io(String),
    /// The monitor file did not decode.
    MonitorFormat(String),
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionReason::QualityGate(reason) => write!(f, "quality gate: {reason}"),
            ExclusionReason::Io(msg) => write!(f, "I/O: {msg}"),
            ExclusionReason::MonitorFormat(msg) => write!(f, "monitor format: {msg}"),
        }
    }
}

/// Decision taken for one candidate subrun.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum SubrunDecision {
    Included {
        rate: f64,
        monitor_count: u64,
        payload_bytes: u64,
    },
    Excluded {
        reason: ExclusionReason,
    },
}

impl SubrunDecision {
    #[must_use]
    pub fn is_included(&self) -> bool {
        matches!(self, SubrunDecision::Included { .. })
    }
}

/// Audit record for one candidate subrun.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubrunOutcome {
    pub run_id: String,
    pub key: ConfigurationKey,
    #[serde(flatten)]
    pub decision: SubrunDecision,
}

/// Result of one successful merge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeReport {
    pub state: SpinState,
    pub paths: ArtifactPaths,
    /// Whether the summary was written.
    pub summary_written: bool,
    /// Every candidate, in merge order.
    pub outcomes: Vec<SubrunOutcome>,
    pub included: usize,
    pub elapsed_s: f64,
    /// Sum of the merged monitor histogram.
    pub monitor_count: u64,
    /// Events in the merged stream.
    pub detector_count: u64,
    /// Length of the merged event file.
    pub event_bytes: u64,
}

impl MergeReport {
    /// Candidates that were left out, with their reasons.
    pub fn excluded(&self) -> impl Iterator<Item = (&str, &ExclusionReason)> {
        self.outcomes.iter().filter_map(|o| match &o.decision {
            SubrunDecision::Excluded { reason } => Some((o.run_id.as_str(), reason)),
            SubrunDecision::Included { .. } => None,
        })
    }
}

/// A candidate subrun together with the key it was indexed under.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub key: ConfigurationKey,
    pub metadata: SubrunMetadata,
}

/// Candidates sharing one spin state.
#[derive(Debug, Clone)]
pub struct MergeBucket {
    pub state: SpinState,
    pub candidates: Vec<Candidate>,
}

/// Outcome of merging one bucket.
#[derive(Debug)]
pub struct BucketMerge {
    pub state: SpinState,
    /// Scan label the bucket was grouped under, if any.
    pub group: Option<String>,
    pub outcome: Result<MergeReport>,
}

/// Merges indexed subruns into per-spin-state artifacts.
#[derive(Debug, Clone)]
pub struct RunAggregator {
    config: ReductionConfig,
}

impl RunAggregator {
    #[must_use]
    pub fn new(config: ReductionConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ReductionConfig {
        &self.config
    }

    /// Splits the subruns of `keys` into up, down and combined buckets, in
    /// that order. Empty buckets are omitted. Candidates keep the order of
    /// `keys`, then discovery order within each key. A key listed more than
    /// once contributes its subruns only once.
    #[must_use]
    pub fn partition(&self, run_set: &RunSet, keys: &[ConfigurationKey]) -> Vec<MergeBucket> {
        let mut buckets: BTreeMap<SpinState, Vec<Candidate>> = BTreeMap::new();
        let mut seen = BTreeSet::new();
        for key in keys {
            if !seen.insert(*key) {
                log::debug!("{key} selected twice; merging its subruns once");
                continue;
            }
            let Some(subruns) = run_set.get(key) else {
                log::warn!("no subruns indexed under {key}");
                continue;
            };
            let state = key.spin_state(self.config.flipper_field);
            buckets
                .entry(state)
                .or_default()
                .extend(subruns.iter().map(|metadata| Candidate {
                    key: *key,
                    metadata: metadata.clone(),
                }));
        }
        buckets
            .into_iter()
            .filter(|(_, candidates)| !candidates.is_empty())
            .map(|(state, candidates)| MergeBucket { state, candidates })
            .collect()
    }

    /// Partitions `keys` and merges every bucket.
    ///
    /// A bucket whose merge fails does not stop the others.
    pub fn merge_all(
        &self,
        run_set: &RunSet,
        keys: &[ConfigurationKey],
        options: &MergeOptions,
    ) -> Vec<BucketMerge> {
        self.partition(run_set, keys)
            .iter()
            .map(|bucket| BucketMerge {
                state: bucket.state,
                group: None,
                outcome: self.merge(bucket, options),
            })
            .collect()
    }

    /// Groups `keys` by the canonical value of `field` and merges each group
    /// with that value as the artifact suffix.
    pub fn merge_scan(
        &self,
        run_set: &RunSet,
        keys: &[ConfigurationKey],
        field: KeyField,
        options: &MergeOptions,
    ) -> Vec<BucketMerge> {
        let mut groups: Vec<(String, Vec<ConfigurationKey>)> = Vec::new();
        for key in keys {
            let label = key.label(field);
            match groups.iter_mut().find(|(l, _)| *l == label) {
                Some((_, group)) => group.push(*key),
                None => groups.push((label, vec![*key])),
            }
        }

        let mut merges = Vec::new();
        for (label, group) in groups {
            let options = options
                .clone()
                .with_suffix(format!("{}{label}", options.suffix));
            for mut merge in self.merge_all(run_set, &group, &options) {
                merge.group = Some(label.clone());
                merges.push(merge);
            }
        }
        merges
    }

    /// Merges one bucket.
    ///
    /// Subruns failing the quality gate or whose files cannot be read are
    /// excluded and recorded in the report. Nothing is written unless at
    /// least one subrun is accepted.
    ///
    /// # Errors
    /// Returns [`Error::EmptyMerge`] if no subrun was accepted,
    /// [`Error::UnsafeInput`] if an event file's length does not fit the
    /// layout, or an I/O error if an artifact cannot be written.
    pub fn merge(&self, bucket: &MergeBucket, options: &MergeOptions) -> Result<MergeReport> {
        let paths = options.paths(bucket.state);
        let layout = self.config.layout;
        let header_len = layout.header_len() as u64;

        let mut events = AtomicFile::create(&paths.events)?;
        let mut monitor = MonitorHistogram::zeros(self.config.monitor.bins);
        let mut header_written = header_len == 0;
        let mut report = MergeReport {
            state: bucket.state,
            paths: paths.clone(),
            summary_written: false,
            outcomes: Vec::with_capacity(bucket.candidates.len()),
            included: 0,
            elapsed_s: 0.0,
            monitor_count: 0,
            detector_count: 0,
            event_bytes: 0,
        };

        for candidate in &bucket.candidates {
            let subrun = &candidate.metadata;
            let decision = self.merge_subrun(subrun, &mut events, &mut monitor, &mut header_written)?;
            match &decision {
                SubrunDecision::Included { payload_bytes, .. } => {
                    log::debug!("{}: included", subrun.run_id);
                    report.included += 1;
                    report.elapsed_s += subrun.elapsed_s;
                    report.detector_count += payload_bytes / layout.record_size() as u64;
                }
                SubrunDecision::Excluded { reason } => {
                    log::warn!("{}: excluded ({reason})", subrun.run_id);
                }
            }
            report.outcomes.push(SubrunOutcome {
                run_id: subrun.run_id.clone(),
                key: candidate.key,
                decision,
            });
        }

        if report.included == 0 {
            return Err(Error::EmptyMerge {
                state: bucket.state,
                candidates: bucket.candidates.len(),
            });
        }

        report.monitor_count = monitor.total();
        report.event_bytes = events.checkpoint();

        let mut monitor_file = AtomicFile::create(&paths.monitor)?;
        monitor_file
            .write_all(&encode_binary(&monitor)?)
            .map_err(|source| sesame_io::Error::File {
                path: paths.monitor.clone(),
                source,
            })?;

        let summary_file = if options.write_summary {
            let mut file = AtomicFile::create(&paths.summary)?;
            write_legacy_text(&mut file, &options.run_label, &monitor, elapsed_ms(report.elapsed_s))
                .map_err(|source| sesame_io::Error::File {
                    path: paths.summary.clone(),
                    source,
                })?;
            Some(file)
        } else {
            None
        };

        report.summary_written = summary_file.is_some();
        persist_all([Some(events), Some(monitor_file), summary_file].into_iter().flatten())?;

        log::info!(
            "merged {} of {} subruns into {} ({} events, {} monitor counts, {:.1}s)",
            report.included,
            bucket.candidates.len(),
            paths.events.display(),
            report.detector_count,
            report.monitor_count,
            report.elapsed_s
        );
        Ok(report)
    }

    /// Gates one subrun and, if accepted, appends it to the outputs.
    fn merge_subrun(
        &self,
        subrun: &SubrunMetadata,
        events: &mut AtomicFile,
        monitor: &mut MonitorHistogram,
        header_written: &mut bool,
    ) -> Result<SubrunDecision> {
        let excluded = |reason| Ok(SubrunDecision::Excluded { reason });

        let rate = match self.config.gate.evaluate(subrun) {
            GateVerdict::Accepted { rate } => rate,
            GateVerdict::Rejected(reason) => return excluded(ExclusionReason::QualityGate(reason)),
        };

        let reading = match sesame_io::read_monitor(&subrun.monitor_path, &self.config.monitor) {
            Ok(reading) => reading,
            Err(e) if e.is_io() => return excluded(ExclusionReason::Io(e.to_string())),
            Err(e) => return excluded(ExclusionReason::MonitorFormat(e.to_string())),
        };

        let io_excluded = |e: io::Error| {
            excluded(ExclusionReason::Io(format!(
                "{}: {e}",
                subrun.event_path.display()
            )))
        };
        let mut file = match File::open(&subrun.event_path) {
            Ok(file) => file,
            Err(e) => return io_excluded(e),
        };
        let len = match file.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => return io_excluded(e),
        };
        let checked_len = usize::try_from(len).unwrap_or(usize::MAX);
        sesame_event::validate_length(self.config.layout, checked_len).map_err(|source| {
            Error::UnsafeInput {
                path: subrun.event_path.clone(),
                source,
            }
        })?;

        let header_len = self.config.layout.header_len() as u64;
        let payload_bytes = match copy_subrun(events, &mut file, len, header_len, header_written)? {
            Ok(payload_bytes) => payload_bytes,
            Err(e) => return io_excluded(e),
        };

        monitor.accumulate(&reading.histogram)?;
        Ok(SubrunDecision::Included {
            rate,
            monitor_count: reading.histogram.total(),
            payload_bytes,
        })
    }
}

/// Appends one event file to `events`. The source header is kept only for
/// the first accepted subrun. Returns the payload bytes appended, or the read
/// error after rolling `events` back to its previous length.
///
/// # Errors
/// Fails only if the rollback itself fails.
fn copy_subrun<R: Read + Seek>(
    events: &mut AtomicFile,
    source: &mut R,
    len: u64,
    header_len: u64,
    header_written: &mut bool,
) -> Result<io::Result<u64>> {
    let checkpoint = events.checkpoint();
    let copy = if *header_written {
        source
            .seek(SeekFrom::Start(header_len))
            .and_then(|_| events.append_from(&mut *source, len.saturating_sub(header_len)))
    } else {
        events.append_from(&mut *source, len)
    };
    match copy {
        Ok(copied) if *header_written => Ok(Ok(copied)),
        Ok(copied) => {
            *header_written = true;
            Ok(Ok(copied.saturating_sub(header_len)))
        }
        Err(e) => {
            events.rollback(checkpoint)?;
            Ok(Err(e))
        }
    }
}

/// Renames every file onto its target, or none of them: when a rename fails,
/// targets renamed before it are removed.
fn persist_all(files: impl IntoIterator<Item = AtomicFile>) -> Result<()> {
    let mut persisted: Vec<PathBuf> = Vec::new();
    for file in files {
        match file.persist() {
            Ok(path) => persisted.push(path),
            Err(e) => {
                for path in &persisted {
                    if let Err(remove) = std::fs::remove_file(path) {
                        log::warn!("could not remove {}: {remove}", path.display());
                    }
                }
                return Err(e.into());
            }
        }
    }
    Ok(())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn elapsed_ms(elapsed_s: f64) -> u64 {
    (elapsed_s * 1000.0).round().max(0.0) as u64
}
