//! Detector and monitor histograms.
//!
//! [`DetectorCube`] stores event counts indexed by `[y][x][wavelength bin]`,
//! flattened in row-major order:
//! `data[(y * width + x) * bins + bin]`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// A 3D histogram of detector counts (pixel Y × pixel X × wavelength bin).
///
/// # Memory Layout
///
/// For a 512 × 512 × 200 cube, memory usage is approximately 210 MB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorCube {
    data: Vec<u32>,
    height: usize,
    width: usize,
    bins: usize,
}

impl DetectorCube {
    /// Create an empty cube.
    #[must_use]
    pub fn new(height: usize, width: usize, bins: usize) -> Self {
        Self {
            data: vec![0; height * width * bins],
            height,
            width,
            bins,
        }
    }

    /// Height in pixels (Y).
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Width in pixels (X).
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of wavelength bins.
    #[must_use]
    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Flat index of a cell, or `None` if out of bounds.
    #[inline]
    #[must_use]
    pub fn index_of(&self, y: usize, x: usize, bin: usize) -> Option<usize> {
        (y < self.height && x < self.width && bin < self.bins)
            .then(|| (y * self.width + x) * self.bins + bin)
    }

    /// Get the count at a specific cell.
    #[must_use]
    pub fn get(&self, y: usize, x: usize, bin: usize) -> Option<u32> {
        self.index_of(y, x, bin).map(|i| self.data[i])
    }

    /// Increment the count at a specific cell. Out-of-bounds cells are ignored.
    #[inline]
    pub fn increment(&mut self, y: usize, x: usize, bin: usize) {
        if let Some(i) = self.index_of(y, x, bin) {
            self.data[i] = self.data[i].saturating_add(1);
        }
    }

    /// Increment the count at a flat index obtained from [`Self::index_of`].
    #[inline]
    pub fn increment_index(&mut self, index: usize) {
        if let Some(cell) = self.data.get_mut(index) {
            *cell = cell.saturating_add(1);
        }
    }

    /// Raw counts in storage order.
    #[must_use]
    pub fn as_slice(&self) -> &[u32] {
        &self.data
    }

    /// Sum of all counts.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.data.iter().map(|&c| u64::from(c)).sum()
    }

    /// Wavelength spectrum of a single pixel.
    #[must_use]
    pub fn pixel_spectrum(&self, y: usize, x: usize) -> Option<&[u32]> {
        let start = self.index_of(y, x, 0)?;
        Some(&self.data[start..start + self.bins])
    }

    /// Sum the cube over a rectangular region and optional mask.
    ///
    /// Pixels outside the image are ignored, so a region larger than the
    /// detector is clamped. A pixel contributes only if it lies inside the
    /// region and the mask (when given) is set for it.
    ///
    /// # Errors
    /// Returns an error if the mask shape differs from the image shape.
    pub fn spectrum(&self, region: &Region, mask: Option<&PixelMask>) -> Result<Vec<u64>> {
        if let Some(mask) = mask {
            mask.check_shape(self.height, self.width)?;
        }

        let mut spectrum = vec![0u64; self.bins];
        let (ys, xs) = region.clamped(self.height, self.width);
        for y in ys {
            for x in xs.clone() {
                if mask.is_some_and(|m| !m.get(y, x)) {
                    continue;
                }
                let start = (y * self.width + x) * self.bins;
                for (acc, &c) in spectrum.iter_mut().zip(&self.data[start..start + self.bins]) {
                    *acc += u64::from(c);
                }
            }
        }
        Ok(spectrum)
    }

    /// Sum projection over a range of wavelength bins.
    ///
    /// Returns a flattened `[height, width]` image.
    #[must_use]
    pub fn project_xy(&self, bins: Range<usize>) -> Vec<u64> {
        let lo = bins.start.min(self.bins);
        let hi = bins.end.min(self.bins).max(lo);
        self.data
            .chunks_exact(self.bins.max(1))
            .map(|pixel| pixel[lo..hi].iter().map(|&c| u64::from(c)).sum())
            .collect()
    }
}

/// A half-open rectangular pixel region `[x_min, x_max) × [y_min, y_max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x_min: usize,
    pub y_min: usize,
    pub x_max: usize,
    pub y_max: usize,
}

impl Region {
    /// Region from `(x, y)` minimum and maximum corners.
    #[must_use]
    pub fn new(mins: (usize, usize), maxs: (usize, usize)) -> Self {
        Self {
            x_min: mins.0,
            y_min: mins.1,
            x_max: maxs.0,
            y_max: maxs.1,
        }
    }

    /// Region covering a whole image.
    #[must_use]
    pub fn full(height: usize, width: usize) -> Self {
        Self::new((0, 0), (width, height))
    }

    /// Row and column ranges clipped to an image.
    fn clamped(&self, height: usize, width: usize) -> (Range<usize>, Range<usize>) {
        let y_hi = self.y_max.min(height);
        let x_hi = self.x_max.min(width);
        (self.y_min.min(y_hi)..y_hi, self.x_min.min(x_hi)..x_hi)
    }
}

/// Boolean pixel mask; `true` keeps a pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelMask {
    data: Vec<bool>,
    height: usize,
    width: usize,
}

impl PixelMask {
    /// A mask that keeps every pixel.
    #[must_use]
    pub fn all(height: usize, width: usize) -> Self {
        Self {
            data: vec![true; height * width],
            height,
            width,
        }
    }

    /// Build a mask from rows of flags.
    ///
    /// # Errors
    /// Returns an error if the rows are ragged.
    pub fn from_rows(rows: &[Vec<bool>]) -> Result<Self> {
        let width = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * width);
        for row in rows {
            if row.len() != width {
                return Err(Error::LengthMismatch {
                    expected: width,
                    found: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            data,
            height: rows.len(),
            width,
        })
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Whether the pixel is kept. Out-of-bounds pixels are not.
    #[must_use]
    pub fn get(&self, y: usize, x: usize) -> bool {
        y < self.height && x < self.width && self.data[y * self.width + x]
    }

    /// Set a pixel flag. Out-of-bounds pixels are ignored.
    pub fn set(&mut self, y: usize, x: usize, keep: bool) {
        if y < self.height && x < self.width {
            self.data[y * self.width + x] = keep;
        }
    }

    fn check_shape(&self, height: usize, width: usize) -> Result<()> {
        if self.height == height && self.width == width {
            Ok(())
        } else {
            Err(Error::MaskShape {
                mask_height: self.height,
                mask_width: self.width,
                height,
                width,
            })
        }
    }
}

/// Fixed-length beam-monitor count histogram.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MonitorHistogram {
    counts: Vec<u32>,
}

impl MonitorHistogram {
    /// An all-zero histogram with `len` bins.
    #[must_use]
    pub fn zeros(len: usize) -> Self {
        Self {
            counts: vec![0; len],
        }
    }

    /// Wraps existing counts.
    #[must_use]
    pub fn from_counts(counts: Vec<u32>) -> Self {
        Self { counts }
    }

    /// Number of bins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Returns true if the histogram has no bins.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Counts per bin.
    #[must_use]
    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    /// Sum of all bins.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| u64::from(c)).sum()
    }

    /// Elementwise add another histogram of the same length.
    ///
    /// # Errors
    /// Returns an error if the lengths differ.
    pub fn accumulate(&mut self, other: &MonitorHistogram) -> Result<()> {
        if other.len() != self.len() {
            return Err(Error::LengthMismatch {
                expected: self.len(),
                found: other.len(),
            });
        }
        for (acc, &c) in self.counts.iter_mut().zip(&other.counts) {
            *acc = acc.saturating_add(c);
        }
        Ok(())
    }

    /// Truncate or zero-pad to `len` bins.
    pub fn resize(&mut self, len: usize) {
        self.counts.resize(len, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_layout() {
        let mut cube = DetectorCube::new(4, 3, 5);
        cube.increment(2, 1, 4);
        cube.increment(2, 1, 4);
        cube.increment(9, 0, 0); // ignored

        assert_eq!(cube.get(2, 1, 4), Some(2));
        assert_eq!(cube.index_of(2, 1, 4), Some((2 * 3 + 1) * 5 + 4));
        assert_eq!(cube.total(), 2);
        assert_eq!(cube.pixel_spectrum(2, 1).unwrap(), &[0, 0, 0, 0, 2]);
    }

    #[test]
    fn test_spectrum_region_and_mask() {
        let mut cube = DetectorCube::new(4, 4, 2);
        cube.increment(0, 0, 0);
        cube.increment(1, 1, 1);
        cube.increment(3, 3, 1);

        let full = cube.spectrum(&Region::full(4, 4), None).unwrap();
        assert_eq!(full, vec![1, 2]);

        let corner = cube.spectrum(&Region::new((0, 0), (2, 2)), None).unwrap();
        assert_eq!(corner, vec![1, 1]);

        let mut mask = PixelMask::all(4, 4);
        mask.set(1, 1, false);
        let masked = cube.spectrum(&Region::full(4, 4), Some(&mask)).unwrap();
        assert_eq!(masked, vec![1, 1]);
    }

    #[test]
    fn test_oversized_region_is_clamped() {
        let mut cube = DetectorCube::new(2, 2, 1);
        cube.increment(1, 1, 0);
        let s = cube.spectrum(&Region::new((0, 0), (512, 512)), None).unwrap();
        assert_eq!(s, vec![1]);

        let empty = cube.spectrum(&Region::new((5, 5), (9, 9)), None).unwrap();
        assert_eq!(empty, vec![0]);
    }

    #[test]
    fn test_mask_shape_mismatch() {
        let cube = DetectorCube::new(4, 4, 2);
        let mask = PixelMask::all(3, 4);
        assert!(matches!(
            cube.spectrum(&Region::full(4, 4), Some(&mask)),
            Err(Error::MaskShape { .. })
        ));
    }

    #[test]
    fn test_project_xy() {
        let mut cube = DetectorCube::new(1, 2, 4);
        cube.increment(0, 0, 0);
        cube.increment(0, 0, 3);
        cube.increment(0, 1, 2);
        assert_eq!(cube.project_xy(0..4), vec![2, 1]);
        assert_eq!(cube.project_xy(1..3), vec![0, 1]);
        assert_eq!(cube.project_xy(3..99), vec![1, 0]);
    }

    #[test]
    fn test_mask_from_rows() {
        let mask = PixelMask::from_rows(&[vec![true, false], vec![false, true]]).unwrap();
        assert!(mask.get(0, 0));
        assert!(!mask.get(0, 1));
        assert!(mask.get(1, 1));
        assert!(PixelMask::from_rows(&[vec![true], vec![true, false]]).is_err());
    }

    #[test]
    fn test_monitor_accumulate() {
        let mut total = MonitorHistogram::zeros(3);
        total
            .accumulate(&MonitorHistogram::from_counts(vec![1, 2, 3]))
            .unwrap();
        total
            .accumulate(&MonitorHistogram::from_counts(vec![4, 5, 6]))
            .unwrap();
        assert_eq!(total.counts(), &[5, 7, 9]);
        assert_eq!(total.total(), 21);
        assert!(total
            .accumulate(&MonitorHistogram::from_counts(vec![1]))
            .is_err());
    }

    #[test]
    fn test_monitor_resize() {
        let mut h = MonitorHistogram::from_counts(vec![1, 2, 3]);
        h.resize(5);
        assert_eq!(h.counts(), &[1, 2, 3, 0, 0]);
        h.resize(2);
        assert_eq!(h.counts(), &[1, 2]);
    }
}
