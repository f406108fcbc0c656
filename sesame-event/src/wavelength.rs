//! Time-of-flight tick to wavelength bin.

use sesame_core::TimeConversion;

/// Assigns ticks to wavelength bins. Ticks that land below zero or past the
/// last bin are dropped rather than clamped.
#[derive(Debug, Clone, Copy)]
pub struct WavelengthBinner {
    time: TimeConversion,
    inv_bin_width: f64,
}

impl WavelengthBinner {
    #[must_use]
    pub fn new(time: TimeConversion) -> Self {
        Self {
            inv_bin_width: 1.0 / time.bin_width(),
            time,
        }
    }

    /// Number of bins.
    #[must_use]
    pub fn bins(&self) -> usize {
        self.time.wavelength_bins
    }

    /// Bin index for a tick, or `None` if it falls outside `[0, bins)`.
    #[inline]
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn bin(&self, tick: u32) -> Option<usize> {
        let pos = (self.time.wavelength(tick) * self.inv_bin_width).floor();
        if !pos.is_finite() || pos < 0.0 || pos >= self.bins() as f64 {
            return None;
        }
        Some(pos as usize)
    }

    /// Wavelength in Å for a tick.
    #[must_use]
    pub fn wavelength(&self, tick: u32) -> f64 {
        self.time.wavelength(tick)
    }
}
