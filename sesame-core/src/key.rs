//! Instrument configuration fingerprints.
//!
//! A [`ConfigurationKey`] identifies one instrument state by the twelve coil
//! and magnet currents recorded with every subrun. Currents are compared by
//! value after canonical formatting, so `"3"` and `"3.000"` land in the same
//! bucket.

use crate::{Error, Result};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Number of current fields in a configuration key.
pub const KEY_FIELDS: usize = 12;

/// Default number of decimals kept when canonicalizing currents.
pub const DEFAULT_KEY_DECIMALS: u32 = 3;

/// One of the twelve current fields of a configuration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyField {
    /// Spin-flipper coil.
    Flipper,
    /// Guide field coils.
    Guide,
    /// Phase coil.
    Phase,
    /// Sample coil.
    Sample,
    Triangle1,
    Triangle2,
    Triangle3,
    Triangle4,
    Triangle5,
    Triangle6,
    Triangle7,
    Triangle8,
}

impl KeyField {
    /// All fields in key order.
    pub const ALL: [KeyField; KEY_FIELDS] = [
        KeyField::Flipper,
        KeyField::Guide,
        KeyField::Phase,
        KeyField::Sample,
        KeyField::Triangle1,
        KeyField::Triangle2,
        KeyField::Triangle3,
        KeyField::Triangle4,
        KeyField::Triangle5,
        KeyField::Triangle6,
        KeyField::Triangle7,
        KeyField::Triangle8,
    ];

    /// Position of this field inside a key.
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Field name as written in manifests and run notes.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            KeyField::Flipper => "Flipper",
            KeyField::Guide => "Guide",
            KeyField::Phase => "Phase",
            KeyField::Sample => "Sample",
            KeyField::Triangle1 => "Triangle1",
            KeyField::Triangle2 => "Triangle2",
            KeyField::Triangle3 => "Triangle3",
            KeyField::Triangle4 => "Triangle4",
            KeyField::Triangle5 => "Triangle5",
            KeyField::Triangle6 => "Triangle6",
            KeyField::Triangle7 => "Triangle7",
            KeyField::Triangle8 => "Triangle8",
        }
    }

    /// Triangle coil by its 1-based number.
    #[must_use]
    pub fn triangle(number: usize) -> Option<KeyField> {
        if (1..=8).contains(&number) {
            Some(Self::ALL[3 + number])
        } else {
            None
        }
    }
}

impl fmt::Display for KeyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KeyField {
    type Err = Error;

    /// Accepts the canonical names plus the aliases used by older manifests
    /// (`GuideFields`, `PhaseCoil`, `SampleCoil`) and bare triangle numbers.
    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        let field = match lower.as_str() {
            "flipper" => KeyField::Flipper,
            "guide" | "guides" | "guidefields" => KeyField::Guide,
            "phase" | "phasecoil" => KeyField::Phase,
            "sample" | "samplecoil" => KeyField::Sample,
            other => {
                let digits = other.strip_prefix("triangle").unwrap_or(other);
                digits
                    .parse::<usize>()
                    .ok()
                    .and_then(KeyField::triangle)
                    .ok_or_else(|| Error::UnknownField(s.to_string()))?
            }
        };
        Ok(field)
    }
}

/// Parsed numeric currents for one subrun, in [`KeyField`] order.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CurrentSettings {
    pub values: [f64; KEY_FIELDS],
}

impl CurrentSettings {
    /// Creates settings from the four named coils and the eight triangles.
    #[must_use]
    pub fn new(flipper: f64, guide: f64, phase: f64, sample: f64, triangles: [f64; 8]) -> Self {
        let mut values = [0.0; KEY_FIELDS];
        values[0] = flipper;
        values[1] = guide;
        values[2] = phase;
        values[3] = sample;
        values[4..].copy_from_slice(&triangles);
        Self { values }
    }

    /// Current for one field.
    #[must_use]
    pub fn get(&self, field: KeyField) -> f64 {
        self.values[field.index()]
    }

    /// Sets the current for one field.
    pub fn set(&mut self, field: KeyField, value: f64) {
        self.values[field.index()] = value;
    }
}

/// Canonical fingerprint of an instrument configuration.
///
/// Each current is stored as an integer count of `10^-decimals` units, which
/// gives value equality, a total order, and hashing without floating point
/// comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigurationKey {
    scaled: [i64; KEY_FIELDS],
    decimals: u32,
}

impl ConfigurationKey {
    /// Builds a key from parsed currents.
    ///
    /// # Errors
    /// Returns an error if a current is not finite or too large to represent.
    pub fn from_settings(settings: &CurrentSettings, decimals: u32) -> Result<Self> {
        let scale = scale_for(decimals)?;
        let mut scaled = [0i64; KEY_FIELDS];
        for (slot, (field, value)) in scaled
            .iter_mut()
            .zip(KeyField::ALL.iter().zip(settings.values.iter()))
        {
            let units = (value * scale).round();
            #[allow(clippy::cast_precision_loss)]
            let limit = i64::MAX as f64;
            if !units.is_finite() || units.abs() >= limit {
                return Err(Error::ConfigError(format!(
                    "current {value} for {field} cannot be canonicalized"
                )));
            }
            #[allow(clippy::cast_possible_truncation)]
            {
                *slot = units as i64;
            }
        }
        Ok(Self { scaled, decimals })
    }

    /// Number of decimals this key was canonicalized with.
    #[must_use]
    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    /// Canonical value of one field.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn value(&self, field: KeyField) -> f64 {
        let scale = 10f64.powi(i32::try_from(self.decimals).unwrap_or(i32::MAX));
        self.scaled[field.index()] as f64 / scale
    }

    /// Canonical text of one field, e.g. `"3.000"`.
    #[must_use]
    pub fn label(&self, field: KeyField) -> String {
        format!("{:.*}", self.decimals as usize, self.value(field))
    }

    /// Sign of one field: -1, 0 or 1.
    #[must_use]
    pub fn sign(&self, field: KeyField) -> i64 {
        self.scaled[field.index()].signum()
    }

    /// Spin state selected by the flipper current held in `flipper_field`.
    #[must_use]
    pub fn spin_state(&self, flipper_field: KeyField) -> SpinState {
        SpinState::from_sign(self.sign(flipper_field))
    }
}

impl fmt::Display for ConfigurationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in KeyField::ALL.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={}", field.name(), self.label(*field))?;
        }
        Ok(())
    }
}

impl Serialize for ConfigurationKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(KEY_FIELDS))?;
        for field in KeyField::ALL {
            map.serialize_entry(field.name(), &self.value(field))?;
        }
        map.end()
    }
}

fn scale_for(decimals: u32) -> Result<f64> {
    if decimals > 9 {
        return Err(Error::ConfigError(format!(
            "key precision of {decimals} decimals is not supported (max 9)"
        )));
    }
    Ok(10f64.powi(i32::try_from(decimals).unwrap_or(9)))
}

/// Neutron spin state selected by the sign of the flipper current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpinState {
    /// Negative flipper current.
    #[serde(rename = "up")]
    Up,
    /// Positive flipper current.
    #[serde(rename = "down")]
    Down,
    /// Zero flipper current: both states combined.
    #[serde(rename = "Combined")]
    Combined,
}

impl SpinState {
    /// Maps the sign of a flipper current to a spin state.
    #[must_use]
    pub fn from_sign(sign: i64) -> Self {
        match sign.signum() {
            -1 => SpinState::Up,
            1 => SpinState::Down,
            _ => SpinState::Combined,
        }
    }

    /// Text used in merged artifact names.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            SpinState::Up => "up",
            SpinState::Down => "down",
            SpinState::Combined => "Combined",
        }
    }
}

impl fmt::Display for SpinState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Legacy single-field filter: keep a subrun only when the floor of one
/// current equals a given integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFilter {
    pub field: KeyField,
    pub value: i64,
}

impl KeyFilter {
    /// Filter on the first triangle coil, as the historical reduction did.
    #[must_use]
    pub fn triangle1(value: i64) -> Self {
        Self {
            field: KeyField::Triangle1,
            value,
        }
    }

    /// Whether the settings pass this filter.
    #[must_use]
    pub fn matches(&self, settings: &CurrentSettings) -> bool {
        let floored = settings.get(self.field).floor();
        #[allow(clippy::cast_precision_loss)]
        let wanted = self.value as f64;
        floored.is_finite() && (floored - wanted).abs() < f64::EPSILON
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(flipper: f64, triangle1: f64) -> CurrentSettings {
        CurrentSettings::new(flipper, 1.0, 0.5, 0.0, [triangle1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
    }

    #[test]
    fn test_equal_values_share_a_key() {
        // "3" and "3.000" parse to the same value
        let a = ConfigurationKey::from_settings(&settings(-5.0, "3".parse().unwrap()), 3).unwrap();
        let b =
            ConfigurationKey::from_settings(&settings(-5.0, "3.000".parse().unwrap()), 3).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.label(KeyField::Triangle1), "3.000");
    }

    #[test]
    fn test_rounding_to_precision() {
        let a = ConfigurationKey::from_settings(&settings(-5.0, 2.99996), 3).unwrap();
        let b = ConfigurationKey::from_settings(&settings(-5.0, 3.0), 3).unwrap();
        assert_eq!(a, b);

        let c = ConfigurationKey::from_settings(&settings(-5.0, 3.001), 3).unwrap();
        assert_ne!(b, c);
    }

    #[test]
    fn test_negative_zero_collides_with_zero() {
        let a = ConfigurationKey::from_settings(&settings(-0.0, 1.0), 3).unwrap();
        let b = ConfigurationKey::from_settings(&settings(0.0, 1.0), 3).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.spin_state(KeyField::Flipper), SpinState::Combined);
    }

    #[test]
    fn test_spin_state_from_flipper_sign() {
        let up = ConfigurationKey::from_settings(&settings(-5.0, 1.0), 3).unwrap();
        let down = ConfigurationKey::from_settings(&settings(5.0, 1.0), 3).unwrap();
        assert_eq!(up.spin_state(KeyField::Flipper), SpinState::Up);
        assert_eq!(down.spin_state(KeyField::Flipper), SpinState::Down);
        // guide current is positive in both
        assert_eq!(up.spin_state(KeyField::Guide), SpinState::Down);
    }

    #[test]
    fn test_non_finite_current_is_rejected() {
        assert!(ConfigurationKey::from_settings(&settings(f64::NAN, 1.0), 3).is_err());
        assert!(ConfigurationKey::from_settings(&settings(f64::INFINITY, 1.0), 3).is_err());
    }

    #[test]
    fn test_field_aliases() {
        assert_eq!("GuideFields".parse::<KeyField>().unwrap(), KeyField::Guide);
        assert_eq!("phasecoil".parse::<KeyField>().unwrap(), KeyField::Phase);
        assert_eq!("Triangle8".parse::<KeyField>().unwrap(), KeyField::Triangle8);
        assert_eq!("3".parse::<KeyField>().unwrap(), KeyField::Triangle3);
        assert!("Triangle9".parse::<KeyField>().is_err());
        assert!("bogus".parse::<KeyField>().is_err());
    }

    #[test]
    fn test_triangle_numbering() {
        assert_eq!(KeyField::triangle(1), Some(KeyField::Triangle1));
        assert_eq!(KeyField::triangle(8), Some(KeyField::Triangle8));
        assert_eq!(KeyField::triangle(0), None);
        assert_eq!(KeyField::Triangle1.index(), 4);
    }

    #[test]
    fn test_filter_floors_the_value() {
        let filter = KeyFilter::triangle1(3);
        assert!(filter.matches(&settings(-5.0, 3.0)));
        assert!(filter.matches(&settings(-5.0, 3.9)));
        assert!(!filter.matches(&settings(-5.0, 2.99)));
        assert!(!filter.matches(&settings(-5.0, 4.0)));
    }

    #[test]
    fn test_key_serializes_as_named_values() {
        let key = ConfigurationKey::from_settings(&settings(-5.0, 3.0), 3).unwrap();
        let json = serde_json::to_value(key).unwrap();
        assert_eq!(json["Flipper"], serde_json::json!(-5.0));
        assert_eq!(json["Triangle1"], serde_json::json!(3.0));
    }
}
