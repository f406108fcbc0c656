//! Reduction configuration.
//!
//! One [`ReductionConfig`] is threaded through decoding, indexing and merging.
//! Two versioned default sets reproduce the historical deployments:
//! [`ReductionConfig::legacy`] and [`ReductionConfig::current`].

use crate::gate::{QualityGate, RateBand};
use crate::key::{KeyField, DEFAULT_KEY_DECIMALS};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Neutron wavelength constant h/m_n in Å·m/µs.
pub const WAVELENGTH_CONSTANT: f64 = 3.956_034e-3;

/// Default flight path in metres: chopper to sample plus sample to detector.
pub const DEFAULT_FLIGHT_PATH_M: f64 = 3.7338 + 2.5297 + 3.6;

/// Default time offset subtracted from every time of flight, in µs.
pub const DEFAULT_OFFSET_US: f64 = 860.0;

/// Event record layout, selected explicitly and never sniffed from the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLayout {
    /// 256-byte calibration header, then packed 64-bit records.
    Legacy,
    /// Headerless pairs of 32-bit words (tick, channel index).
    Current,
}

impl EventLayout {
    /// Bytes of opaque header before the first record.
    #[must_use]
    pub fn header_len(self) -> usize {
        match self {
            EventLayout::Legacy => 256,
            EventLayout::Current => 0,
        }
    }

    /// Bytes per event record.
    #[must_use]
    pub fn record_size(self) -> usize {
        8
    }

    /// Logical image size as `(height, width)`.
    #[must_use]
    pub fn image_dimensions(self) -> (usize, usize) {
        match self {
            EventLayout::Legacy => (512, 512),
            EventLayout::Current => (128, 16),
        }
    }
}

/// Time-of-flight to wavelength conversion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeConversion {
    /// Microseconds per clock tick.
    pub tick_us: f64,
    /// Offset subtracted after scaling, in µs.
    pub offset_us: f64,
    /// Flight path in metres.
    pub flight_path_m: f64,
    /// Number of wavelength bins.
    pub wavelength_bins: usize,
    /// Upper wavelength edge of the last bin, in Å.
    pub max_wavelength_angstrom: f64,
}

impl TimeConversion {
    /// Width of one wavelength bin in Å.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn bin_width(&self) -> f64 {
        self.max_wavelength_angstrom / self.wavelength_bins as f64
    }

    /// Wavelength in Å for a raw tick.
    #[must_use]
    pub fn wavelength(&self, tick: u32) -> f64 {
        (f64::from(tick) * self.tick_us - self.offset_us) * WAVELENGTH_CONSTANT
            / self.flight_path_m
    }

    /// Lower edge of each wavelength bin, in Å.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn bin_edges(&self) -> Vec<f64> {
        let width = self.bin_width();
        (0..self.wavelength_bins).map(|i| i as f64 * width).collect()
    }
}

/// On-disk encoding of beam-monitor files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorEncoding {
    /// Little-endian `i32` array, no elapsed time.
    Binary,
    /// Text with an elapsed-time line and `index\tcount` rows.
    LegacyText,
}

/// Monitor file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorFormat {
    pub encoding: MonitorEncoding,
    /// Expected histogram length.
    pub bins: usize,
}

impl MonitorFormat {
    /// Format of merged monitor artifacts. They are always binary, whatever
    /// the input encoding, and keep the input bin count.
    #[must_use]
    pub fn artifact(self) -> Self {
        Self {
            encoding: MonitorEncoding::Binary,
            bins: self.bins,
        }
    }
}

/// Complete reduction configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReductionConfig {
    pub layout: EventLayout,
    pub time: TimeConversion,
    pub monitor: MonitorFormat,
    pub gate: QualityGate,
    /// Decimals kept when canonicalizing currents into keys.
    pub key_decimals: u32,
    /// Key field that carries the spin-flipper current.
    pub flipper_field: KeyField,
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self::current()
    }
}

/// Named default set a JSON file builds on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Profile {
    Legacy,
    #[default]
    Current,
}

// Every field is optional and overrides the selected profile.
#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct JsonConfig {
    profile: Profile,
    layout: Option<EventLayout>,
    time: JsonTime,
    monitor: JsonMonitor,
    gate: JsonGate,
    key_decimals: Option<u32>,
    flipper_field: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct JsonTime {
    tick_us: Option<f64>,
    offset_us: Option<f64>,
    flight_path_m: Option<f64>,
    wavelength_bins: Option<usize>,
    max_wavelength_angstrom: Option<f64>,
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct JsonMonitor {
    encoding: Option<MonitorEncoding>,
    bins: Option<usize>,
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct JsonGate {
    min_rate: Option<f64>,
    band: Option<RateBand>,
    disable_when_nonpositive: Option<bool>,
}

impl ReductionConfig {
    /// Original deployment: Layout A events, 75 MHz ticks, 200 wavelength
    /// bins, text monitor files with 1001 rows.
    #[must_use]
    pub fn legacy() -> Self {
        Self {
            layout: EventLayout::Legacy,
            time: TimeConversion {
                tick_us: 1.0 / 75.0,
                offset_us: DEFAULT_OFFSET_US,
                flight_path_m: DEFAULT_FLIGHT_PATH_M,
                wavelength_bins: 200,
                max_wavelength_angstrom: 20.0,
            },
            monitor: MonitorFormat {
                encoding: MonitorEncoding::LegacyText,
                bins: 1001,
            },
            gate: QualityGate::default(),
            key_decimals: DEFAULT_KEY_DECIMALS,
            flipper_field: KeyField::Flipper,
        }
    }

    /// Current deployment: Layout B events, 100 ns ticks, 400 wavelength
    /// bins, binary monitor files with 50001 bins.
    #[must_use]
    pub fn current() -> Self {
        Self {
            layout: EventLayout::Current,
            time: TimeConversion {
                tick_us: 0.1,
                offset_us: DEFAULT_OFFSET_US,
                flight_path_m: DEFAULT_FLIGHT_PATH_M,
                wavelength_bins: 400,
                max_wavelength_angstrom: 20.0,
            },
            monitor: MonitorFormat {
                encoding: MonitorEncoding::Binary,
                bins: 50001,
            },
            gate: QualityGate::default(),
            key_decimals: DEFAULT_KEY_DECIMALS,
            flipper_field: KeyField::Flipper,
        }
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// describes an invalid configuration.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let json: JsonConfig = serde_json::from_reader(reader)?;
        Self::from_json_config(json)
    }

    /// Load configuration from a JSON string.
    ///
    /// # Errors
    /// Returns an error if the text is not valid JSON or describes an
    /// invalid configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let json: JsonConfig = serde_json::from_str(json)?;
        Self::from_json_config(json)
    }

    fn from_json_config(json: JsonConfig) -> Result<Self> {
        let mut config = match json.profile {
            Profile::Legacy => Self::legacy(),
            Profile::Current => Self::current(),
        };

        if let Some(layout) = json.layout {
            config.layout = layout;
        }

        let t = &mut config.time;
        t.tick_us = json.time.tick_us.unwrap_or(t.tick_us);
        t.offset_us = json.time.offset_us.unwrap_or(t.offset_us);
        t.flight_path_m = json.time.flight_path_m.unwrap_or(t.flight_path_m);
        t.wavelength_bins = json.time.wavelength_bins.unwrap_or(t.wavelength_bins);
        t.max_wavelength_angstrom = json
            .time
            .max_wavelength_angstrom
            .unwrap_or(t.max_wavelength_angstrom);

        let m = &mut config.monitor;
        m.encoding = json.monitor.encoding.unwrap_or(m.encoding);
        m.bins = json.monitor.bins.unwrap_or(m.bins);

        let g = &mut config.gate;
        g.min_rate = json.gate.min_rate.unwrap_or(g.min_rate);
        g.band = json.gate.band.unwrap_or(g.band);
        g.disable_when_nonpositive = json
            .gate
            .disable_when_nonpositive
            .unwrap_or(g.disable_when_nonpositive);

        if let Some(decimals) = json.key_decimals {
            config.key_decimals = decimals;
        }
        if let Some(field) = json.flipper_field {
            config.flipper_field = field.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks that every parameter is usable.
    ///
    /// Called automatically when loading from JSON. For programmatically
    /// built configs, call this before decoding.
    ///
    /// # Errors
    /// Returns a configuration error naming the first invalid parameter.
    pub fn validate(&self) -> Result<()> {
        let t = &self.time;
        if !(t.tick_us.is_finite() && t.tick_us > 0.0) {
            return Err(invalid(format!("tick_us must be positive, got {}", t.tick_us)));
        }
        if !t.offset_us.is_finite() {
            return Err(invalid("offset_us must be finite".into()));
        }
        if !(t.flight_path_m.is_finite() && t.flight_path_m > 0.0) {
            return Err(invalid(format!(
                "flight_path_m must be positive, got {}",
                t.flight_path_m
            )));
        }
        if t.wavelength_bins == 0 {
            return Err(invalid("wavelength_bins must be positive".into()));
        }
        if !(t.max_wavelength_angstrom.is_finite() && t.max_wavelength_angstrom > 0.0) {
            return Err(invalid(format!(
                "max_wavelength_angstrom must be positive, got {}",
                t.max_wavelength_angstrom
            )));
        }
        if self.monitor.bins == 0 {
            return Err(invalid("monitor bins must be positive".into()));
        }
        if !self.gate.min_rate.is_finite() {
            return Err(invalid("gate min_rate must be finite".into()));
        }
        match self.gate.band {
            RateBand::Multiple { factor } if !(factor.is_finite() && factor >= 1.0) => {
                return Err(invalid(format!("band factor must be >= 1, got {factor}")));
            }
            RateBand::Window { half_width } if !(half_width.is_finite() && half_width >= 0.0) => {
                return Err(invalid(format!(
                    "band half_width must be non-negative, got {half_width}"
                )));
            }
            _ => {}
        }
        if self.key_decimals > 9 {
            return Err(invalid(format!(
                "key_decimals must be at most 9, got {}",
                self.key_decimals
            )));
        }
        Ok(())
    }
}

fn invalid(message: String) -> Error {
    Error::ConfigError(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_artifact_monitor_format_is_binary() {
        let legacy = ReductionConfig::legacy().monitor.artifact();
        assert_eq!(legacy.encoding, MonitorEncoding::Binary);
        assert_eq!(legacy.bins, 1001);
        assert_eq!(ReductionConfig::current().monitor.artifact(), ReductionConfig::current().monitor);
    }

    #[test]
    fn test_profiles() {
        let legacy = ReductionConfig::legacy();
        assert_eq!(legacy.layout, EventLayout::Legacy);
        assert_eq!(legacy.time.wavelength_bins, 200);
        assert_eq!(legacy.monitor.bins, 1001);
        assert_eq!(legacy.monitor.encoding, MonitorEncoding::LegacyText);

        let current = ReductionConfig::default();
        assert_eq!(current.layout, EventLayout::Current);
        assert_eq!(current.time.wavelength_bins, 400);
        assert_eq!(current.monitor.bins, 50001);
        assert_eq!(current.gate.band, RateBand::Multiple { factor: 10.0 });

        assert!(legacy.validate().is_ok());
        assert!(current.validate().is_ok());
    }

    #[test]
    fn test_layout_geometry() {
        assert_eq!(EventLayout::Legacy.header_len(), 256);
        assert_eq!(EventLayout::Current.header_len(), 0);
        assert_eq!(EventLayout::Legacy.image_dimensions(), (512, 512));
        assert_eq!(EventLayout::Current.image_dimensions(), (128, 16));
    }

    #[test]
    fn test_wavelength_conversion() {
        let time = ReductionConfig::current().time;
        // 8600 ticks * 0.1 us = 860 us, exactly the offset
        assert_relative_eq!(time.wavelength(8600), 0.0);
        // 1 ms past the offset
        let expected = 1000.0 * WAVELENGTH_CONSTANT / DEFAULT_FLIGHT_PATH_M;
        assert_relative_eq!(time.wavelength(18_600), expected, epsilon = 1e-12);
        assert_relative_eq!(time.bin_width(), 0.05);
        assert_eq!(time.bin_edges().len(), 400);
    }

    #[test]
    fn test_json_overrides_profile() {
        let json = r#"{
            "profile": "legacy",
            "time": { "wavelength_bins": 100 },
            "gate": { "min_rate": 0.0, "band": { "window": { "half_width": 2.5 } } },
            "flipper_field": "Guide"
        }"#;
        let config = ReductionConfig::from_json(json).unwrap();
        assert_eq!(config.layout, EventLayout::Legacy);
        assert_eq!(config.time.wavelength_bins, 100);
        assert_relative_eq!(config.time.tick_us, 1.0 / 75.0);
        assert_eq!(config.gate.band, RateBand::Window { half_width: 2.5 });
        assert!(config.gate.disable_when_nonpositive);
        assert_eq!(config.flipper_field, KeyField::Guide);
    }

    #[test]
    fn test_empty_json_is_current_profile() {
        let config = ReductionConfig::from_json("{}").unwrap();
        assert_eq!(config, ReductionConfig::current());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(ReductionConfig::from_json(r#"{"time": {"tick_us": 0.0}}"#).is_err());
        assert!(ReductionConfig::from_json(r#"{"time": {"wavelength_bins": 0}}"#).is_err());
        assert!(ReductionConfig::from_json(r#"{"monitor": {"bins": 0}}"#).is_err());
        assert!(
            ReductionConfig::from_json(r#"{"gate": {"band": {"multiple": {"factor": 0.5}}}}"#)
                .is_err()
        );
        assert!(ReductionConfig::from_json(r#"{"flipper_field": "nope"}"#).is_err());
        assert!(ReductionConfig::from_json(r#"{"bogus": 1}"#).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"gate": {"min_rate": 12.5}}"#).unwrap();
        let config = ReductionConfig::from_file(&path).unwrap();
        assert_relative_eq!(config.gate.min_rate, 12.5);
    }
}
