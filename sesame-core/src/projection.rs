//! Elementwise arithmetic over decoded spectra.
//!
//! Counting errors are Poisson (`sqrt(N)`). Division by a zero monitor sum or
//! a zero denominator follows IEEE semantics (NaN or infinity); masking such
//! bins is left to the caller.

use crate::{Error, Result};
use serde::Serialize;
use std::ops::Range;

/// A value with its one-sigma uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Measurement {
    pub value: f64,
    pub error: f64,
}

impl Measurement {
    #[must_use]
    pub fn new(value: f64, error: f64) -> Self {
        Self { value, error }
    }

    /// Poisson measurement of a raw count.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_count(count: u64) -> Self {
        let value = count as f64;
        Self {
            value,
            error: value.sqrt(),
        }
    }
}

fn check_len(expected: usize, found: usize) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(Error::LengthMismatch { expected, found })
    }
}

/// Divides every bin by the monitor sum.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn normalize(spectrum: &[u64], monitor_sum: u64) -> Vec<f64> {
    let m = monitor_sum as f64;
    spectrum.iter().map(|&c| c as f64 / m).collect()
}

/// Monitor-normalised spectrum with Poisson errors, `sqrt(c) / m` per bin.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn normalized_with_errors(spectrum: &[u64], monitor_sum: u64) -> Vec<Measurement> {
    let m = monitor_sum as f64;
    spectrum
        .iter()
        .map(|&c| {
            let c = Measurement::from_count(c);
            Measurement::new(c.value / m, c.error / m)
        })
        .collect()
}

/// Per-bin polarization `(up - down) / (up + down)`.
///
/// # Errors
/// Returns an error if the spectra differ in length.
pub fn polarization(up: &[f64], down: &[f64]) -> Result<Vec<f64>> {
    check_len(up.len(), down.len())?;
    Ok(up
        .iter()
        .zip(down)
        .map(|(u, d)| (u - d) / (u + d))
        .collect())
}

/// Per-bin polarization with propagated error.
///
/// `sigma_P = 2 / (u + d)^2 * sqrt(d^2 su^2 + u^2 sd^2)`.
///
/// # Errors
/// Returns an error if the spectra differ in length.
pub fn polarization_with_errors(
    up: &[Measurement],
    down: &[Measurement],
) -> Result<Vec<Measurement>> {
    check_len(up.len(), down.len())?;
    Ok(up
        .iter()
        .zip(down)
        .map(|(u, d)| {
            let sum = u.value + d.value;
            let value = (u.value - d.value) / sum;
            let error = 2.0 / (sum * sum)
                * (d.value * d.value * u.error * u.error + u.value * u.value * d.error * d.error)
                    .sqrt();
            Measurement::new(value, error)
        })
        .collect())
}

/// Per-bin flipping ratio `up / down`.
///
/// # Errors
/// Returns an error if the spectra differ in length.
pub fn flipping_ratio(up: &[f64], down: &[f64]) -> Result<Vec<f64>> {
    check_len(up.len(), down.len())?;
    Ok(up.iter().zip(down).map(|(u, d)| u / d).collect())
}

/// Flipping ratio of two integrated measurements, with relative errors added
/// in quadrature.
#[must_use]
pub fn flipping_ratio_measurement(up: Measurement, down: Measurement) -> Measurement {
    let ratio = up.value / down.value;
    let rel = ((up.error / up.value).powi(2) + (down.error / down.value).powi(2)).sqrt();
    Measurement::new(ratio, ratio.abs() * rel)
}

/// Sums a bin range of a normalised spectrum, errors added in quadrature.
///
/// The range is clamped to the spectrum.
#[must_use]
pub fn integrate(spectrum: &[Measurement], bins: Range<usize>) -> Measurement {
    let end = bins.end.min(spectrum.len());
    let start = bins.start.min(end);
    let (value, var) = spectrum[start..end]
        .iter()
        .fold((0.0, 0.0), |(v, e2), m| (v + m.value, e2 + m.error * m.error));
    Measurement::new(value, var.sqrt())
}

/// Integrated intensity of raw counts over a bin range, normalised by the
/// monitor sum.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn integrated_intensity(spectrum: &[u64], bins: Range<usize>, monitor_sum: u64) -> Measurement {
    let end = bins.end.min(spectrum.len());
    let start = bins.start.min(end);
    let total: u64 = spectrum[start..end].iter().sum();
    let raw = Measurement::from_count(total);
    let m = monitor_sum as f64;
    Measurement::new(raw.value / m, raw.error / m)
}

/// Sum of the two spin states, `sqrt(eu^2 + ed^2)` error.
#[must_use]
pub fn total_intensity(up: Measurement, down: Measurement) -> Measurement {
    Measurement::new(up.value + down.value, up.error.hypot(down.error))
}

/// Merges adjacent groups of `factor` bins. A trailing partial group is kept.
///
/// # Errors
/// Returns an error if `factor` is zero.
pub fn rebin(spectrum: &[u64], factor: usize) -> Result<Vec<u64>> {
    if factor == 0 {
        return Err(Error::ConfigError("rebin factor must be positive".into()));
    }
    Ok(spectrum.chunks(factor).map(|c| c.iter().sum()).collect())
}
