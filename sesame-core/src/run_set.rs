//! Subrun metadata and the configuration-keyed run set.

use crate::key::{ConfigurationKey, KeyField, SpinState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Bookkeeping for one recorded subrun.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubrunMetadata {
    /// Run/subrun identifier as recorded by the acquisition.
    pub run_id: String,
    /// Start time text as recorded.
    pub start_time: String,
    /// Elapsed live time in seconds.
    pub elapsed_s: f64,
    /// Total beam-monitor counts.
    pub monitor_count: u64,
    /// Total detector events.
    pub detector_count: u64,
    /// Raw event-stream file.
    pub event_path: PathBuf,
    /// Beam-monitor file.
    pub monitor_path: PathBuf,
}

impl SubrunMetadata {
    /// Monitor count rate in counts per second, if the elapsed time is positive.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn monitor_rate(&self) -> Option<f64> {
        (self.elapsed_s > 0.0).then(|| self.monitor_count as f64 / self.elapsed_s)
    }
}

/// Subruns grouped by configuration key.
///
/// Keys iterate in their canonical order; subruns inside a bucket keep the
/// order in which they were discovered.
#[derive(Debug, Clone, Default)]
pub struct RunSet {
    buckets: BTreeMap<ConfigurationKey, Vec<SubrunMetadata>>,
}

impl RunSet {
    /// Creates an empty run set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a subrun to the bucket for `key`.
    pub fn insert(&mut self, key: ConfigurationKey, subrun: SubrunMetadata) {
        self.buckets.entry(key).or_default().push(subrun);
    }

    /// Subruns recorded under `key`.
    #[must_use]
    pub fn get(&self, key: &ConfigurationKey) -> Option<&[SubrunMetadata]> {
        self.buckets.get(key).map(Vec::as_slice)
    }

    /// All configuration keys.
    pub fn keys(&self) -> impl Iterator<Item = &ConfigurationKey> {
        self.buckets.keys()
    }

    /// All buckets.
    pub fn iter(&self) -> impl Iterator<Item = (&ConfigurationKey, &[SubrunMetadata])> {
        self.buckets.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Number of distinct configurations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Returns true if no subrun has been indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Total number of subruns across all configurations.
    #[must_use]
    pub fn subrun_count(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    /// Keys whose flipper current selects the given spin state.
    #[must_use]
    pub fn keys_in_state(&self, flipper_field: KeyField, state: SpinState) -> Vec<ConfigurationKey> {
        self.buckets
            .keys()
            .filter(|k| k.spin_state(flipper_field) == state)
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::CurrentSettings;

    fn key(flipper: f64) -> ConfigurationKey {
        let settings = CurrentSettings::new(flipper, 0.0, 0.0, 0.0, [1.0; 8]);
        ConfigurationKey::from_settings(&settings, 3).unwrap()
    }

    fn subrun(id: &str) -> SubrunMetadata {
        SubrunMetadata {
            run_id: id.to_string(),
            start_time: String::new(),
            elapsed_s: 10.0,
            monitor_count: 100,
            detector_count: 5,
            event_path: PathBuf::from(format!("{id}.dat")),
            monitor_path: PathBuf::from(format!("{id}.mon")),
        }
    }

    #[test]
    fn test_bucket_keeps_discovery_order() {
        let mut set = RunSet::new();
        set.insert(key(-5.0), subrun("b"));
        set.insert(key(5.0), subrun("x"));
        set.insert(key(-5.0), subrun("a"));

        assert_eq!(set.len(), 2);
        assert_eq!(set.subrun_count(), 3);
        let ids: Vec<_> = set
            .get(&key(-5.0))
            .unwrap()
            .iter()
            .map(|s| s.run_id.as_str())
            .collect();
        assert_eq!(ids, ["b", "a"]);
    }

    #[test]
    fn test_keys_in_state() {
        let mut set = RunSet::new();
        set.insert(key(-5.0), subrun("u"));
        set.insert(key(5.0), subrun("d"));
        set.insert(key(0.0), subrun("c"));

        assert_eq!(set.keys_in_state(KeyField::Flipper, SpinState::Up), vec![key(-5.0)]);
        assert_eq!(set.keys_in_state(KeyField::Flipper, SpinState::Down), vec![key(5.0)]);
        assert_eq!(
            set.keys_in_state(KeyField::Flipper, SpinState::Combined),
            vec![key(0.0)]
        );
    }

    #[test]
    fn test_monitor_rate() {
        let mut s = subrun("a");
        assert_eq!(s.monitor_rate(), Some(10.0));
        s.elapsed_s = 0.0;
        assert_eq!(s.monitor_rate(), None);
    }
}
