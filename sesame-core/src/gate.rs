//! Count-rate quality gate for subruns.
//!
//! A subrun is merged only if its beam-monitor rate (counts per second of
//! elapsed time) falls inside a band around a minimum rate. Historical
//! reductions disagreed on the band, so its shape is configuration.

use crate::run_set::SubrunMetadata;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper edge of the accepted count-rate band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateBand {
    /// Accept `min_rate <= rate <= factor * min_rate`.
    Multiple { factor: f64 },
    /// Accept `min_rate - half_width <= rate <= min_rate + half_width`.
    Window { half_width: f64 },
    /// Accept any `rate >= min_rate`.
    AtLeast,
}

/// Quality gate configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityGate {
    /// Minimum monitor count rate (counts per second).
    pub min_rate: f64,
    /// Band around `min_rate` that is accepted.
    pub band: RateBand,
    /// When set, a `min_rate <= 0` disables the rate check entirely.
    pub disable_when_nonpositive: bool,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            min_rate: 8.0,
            band: RateBand::Multiple { factor: 10.0 },
            disable_when_nonpositive: true,
        }
    }
}

/// Why a subrun failed the gate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    /// Elapsed time was zero, negative or not a number.
    NoElapsedTime { elapsed_s: f64 },
    /// Rate below the lower edge of the band.
    RateTooLow { rate: f64, lower: f64 },
    /// Rate above the upper edge of the band.
    RateTooHigh { rate: f64, upper: f64 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NoElapsedTime { elapsed_s } => {
                write!(f, "elapsed time {elapsed_s}s is not positive")
            }
            RejectReason::RateTooLow { rate, lower } => {
                write!(f, "monitor rate {rate:.3}/s below {lower:.3}/s")
            }
            RejectReason::RateTooHigh { rate, upper } => {
                write!(f, "monitor rate {rate:.3}/s above {upper:.3}/s")
            }
        }
    }
}

/// Outcome of evaluating the gate on one subrun.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateVerdict {
    Accepted { rate: f64 },
    Rejected(RejectReason),
}

impl GateVerdict {
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, GateVerdict::Accepted { .. })
    }
}

impl QualityGate {
    /// A gate that accepts any subrun with positive elapsed time.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            min_rate: 0.0,
            band: RateBand::AtLeast,
            disable_when_nonpositive: true,
        }
    }

    /// Accepted `(lower, upper)` rate bounds, or `None` if the rate check is off.
    #[must_use]
    pub fn bounds(&self) -> Option<(f64, f64)> {
        if self.disable_when_nonpositive && self.min_rate <= 0.0 {
            return None;
        }
        let min = self.min_rate;
        Some(match self.band {
            RateBand::Multiple { factor } => (min, factor * min),
            RateBand::Window { half_width } => (min - half_width, min + half_width),
            RateBand::AtLeast => (min, f64::INFINITY),
        })
    }

    /// Evaluate a subrun from its monitor count and elapsed time.
    ///
    /// Zero elapsed time always rejects, whatever the counts. Rates exactly on
    /// a band edge are accepted.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn evaluate_counts(&self, monitor_count: u64, elapsed_s: f64) -> GateVerdict {
        if elapsed_s.is_nan() || elapsed_s <= 0.0 {
            return GateVerdict::Rejected(RejectReason::NoElapsedTime { elapsed_s });
        }
        let rate = monitor_count as f64 / elapsed_s;
        match self.bounds() {
            None => GateVerdict::Accepted { rate },
            Some((lower, _)) if rate < lower => {
                GateVerdict::Rejected(RejectReason::RateTooLow { rate, lower })
            }
            Some((_, upper)) if rate > upper => {
                GateVerdict::Rejected(RejectReason::RateTooHigh { rate, upper })
            }
            Some(_) => GateVerdict::Accepted { rate },
        }
    }

    /// Evaluate a subrun from its metadata.
    #[must_use]
    pub fn evaluate(&self, subrun: &SubrunMetadata) -> GateVerdict {
        self.evaluate_counts(subrun.monitor_count, subrun.elapsed_s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(min_rate: f64) -> QualityGate {
        QualityGate {
            min_rate,
            band: RateBand::Multiple { factor: 10.0 },
            disable_when_nonpositive: true,
        }
    }

    #[test]
    fn test_rate_below_minimum_is_rejected() {
        // 50 counts over 10 s = 5/s < 8/s
        assert!(matches!(
            gate(8.0).evaluate_counts(50, 10.0),
            GateVerdict::Rejected(RejectReason::RateTooLow { .. })
        ));
        // 100 counts over 10 s = 10/s
        assert_eq!(
            gate(8.0).evaluate_counts(100, 10.0),
            GateVerdict::Accepted { rate: 10.0 }
        );
    }

    #[test]
    fn test_band_edges_are_inclusive() {
        assert!(gate(8.0).evaluate_counts(80, 10.0).is_accepted());
        assert!(gate(8.0).evaluate_counts(800, 10.0).is_accepted());
        assert!(matches!(
            gate(8.0).evaluate_counts(801, 10.0),
            GateVerdict::Rejected(RejectReason::RateTooHigh { .. })
        ));
    }

    #[test]
    fn test_zero_elapsed_always_rejects() {
        for g in [gate(8.0), gate(0.0), QualityGate::disabled()] {
            assert!(matches!(
                g.evaluate_counts(1_000_000, 0.0),
                GateVerdict::Rejected(RejectReason::NoElapsedTime { .. })
            ));
            assert!(!g.evaluate_counts(10, -1.0).is_accepted());
            assert!(!g.evaluate_counts(10, f64::NAN).is_accepted());
        }
    }

    #[test]
    fn test_nonpositive_threshold_escape_hatch() {
        assert!(gate(0.0).evaluate_counts(1_000_000, 1.0).is_accepted());
        assert!(gate(-1.0).evaluate_counts(0, 1.0).is_accepted());

        // Without the escape hatch a zero threshold collapses the band to 0
        let strict = QualityGate {
            disable_when_nonpositive: false,
            ..gate(0.0)
        };
        assert!(strict.evaluate_counts(0, 1.0).is_accepted());
        assert!(!strict.evaluate_counts(1, 1.0).is_accepted());
    }

    #[test]
    fn test_window_band() {
        let g = QualityGate {
            min_rate: 10.0,
            band: RateBand::Window { half_width: 2.0 },
            disable_when_nonpositive: true,
        };
        assert!(g.evaluate_counts(80, 10.0).is_accepted());
        assert!(g.evaluate_counts(120, 10.0).is_accepted());
        assert!(!g.evaluate_counts(79, 10.0).is_accepted());
        assert!(!g.evaluate_counts(121, 10.0).is_accepted());
    }

    #[test]
    fn test_at_least_band() {
        let g = QualityGate {
            min_rate: 8.0,
            band: RateBand::AtLeast,
            disable_when_nonpositive: true,
        };
        assert!(g.evaluate_counts(1_000_000, 1.0).is_accepted());
        assert!(!g.evaluate_counts(7, 1.0).is_accepted());
    }

    #[test]
    fn test_band_round_trips_through_json() {
        let g = gate(8.0);
        let json = serde_json::to_string(&g).unwrap();
        assert!(json.contains("\"multiple\""));
        let back: QualityGate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, g);
    }
}
