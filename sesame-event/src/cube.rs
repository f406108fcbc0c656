//! Detector cube construction.
//!
//! Records are decoded in parallel one batch at a time, then tallied
//! sequentially into the cube. Between batches the builder reports progress
//! and polls the cancellation token, so a cancelled build stops within one
//! batch and its partial cube is dropped.

use crate::stream::{read_word, EventStream};
use crate::{Error, Result, WavelengthBinner};
use rayon::prelude::*;
use sesame_core::progress::{permille, PROGRESS_SCALE};
use sesame_core::{
    CancellationToken, DetectorCube, NoProgress, PixelMask, ProgressObserver, Region,
    TimeConversion,
};
use std::ops::Range;

/// Records decoded per batch.
pub const DEFAULT_BATCH_RECORDS: usize = 1 << 16;

/// Builds detector cubes from event streams.
#[derive(Debug, Clone)]
pub struct CubeBuilder {
    binner: WavelengthBinner,
    batch_records: usize,
    cancel: Option<CancellationToken>,
}

impl CubeBuilder {
    #[must_use]
    pub fn new(time: TimeConversion) -> Self {
        Self {
            binner: WavelengthBinner::new(time),
            batch_records: DEFAULT_BATCH_RECORDS,
            cancel: None,
        }
    }

    /// Sets the number of records decoded per batch (minimum 1).
    #[must_use]
    pub fn with_batch_records(mut self, records: usize) -> Self {
        self.batch_records = records.max(1);
        self
    }

    /// Polls `token` between batches.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    #[must_use]
    pub fn binner(&self) -> &WavelengthBinner {
        &self.binner
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Builds the full cube without progress reporting.
    ///
    /// # Errors
    /// Returns [`Error::Cancelled`] if the token fires.
    pub fn make_cube(&self, stream: &EventStream<'_>) -> Result<DetectorCube> {
        self.make_cube_with_progress(stream, &mut NoProgress)
    }

    /// Builds the full cube, reporting progress on a 0 to 1000 scale after
    /// every batch.
    ///
    /// The result equals incrementing one cube cell per decoded record in
    /// file order; batching does not change it.
    ///
    /// # Errors
    /// Returns [`Error::Cancelled`] if the token fires.
    pub fn make_cube_with_progress(
        &self,
        stream: &EventStream<'_>,
        observer: &mut dyn ProgressObserver,
    ) -> Result<DetectorCube> {
        let (height, width) = stream.layout().image_dimensions();
        let mut cube = DetectorCube::new(height, width, self.binner.bins());
        let layout = stream.layout();
        let record_size = layout.record_size();
        let total = stream.record_count();
        let binner = self.binner;

        observer.report(0);
        let mut done = 0;
        for batch in stream.payload().chunks(self.batch_records * record_size) {
            if self.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let cells: Vec<usize> = batch
                .par_chunks_exact(record_size)
                .filter_map(|chunk| {
                    let rec = crate::stream::decode_word(layout, read_word(chunk))?;
                    let bin = binner.bin(rec.tick)?;
                    cube.index_of(usize::from(rec.y), usize::from(rec.x), bin)
                })
                .collect();

            for cell in cells {
                cube.increment_index(cell);
            }

            done += batch.len() / record_size;
            observer.report(permille(done, total).min(PROGRESS_SCALE - 1));
        }

        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        observer.report(PROGRESS_SCALE);
        Ok(cube)
    }

    /// Wavelength spectrum of the stream summed over a pixel region and
    /// optional mask.
    ///
    /// # Errors
    /// Returns an error if the mask shape does not match the image, or if
    /// the build is cancelled.
    pub fn make_1d(
        &self,
        stream: &EventStream<'_>,
        region: &Region,
        mask: Option<&PixelMask>,
    ) -> Result<Vec<u64>> {
        let cube = self.make_cube(stream)?;
        Ok(cube.spectrum(region, mask)?)
    }
}

/// Sums a cube over a pixel region and optional mask.
///
/// # Errors
/// Returns an error if the mask shape does not match the cube.
pub fn make_1d(cube: &DetectorCube, region: &Region, mask: Option<&PixelMask>) -> Result<Vec<u64>> {
    Ok(cube.spectrum(region, mask)?)
}

/// Image of counts summed over a range of wavelength bins.
#[must_use]
pub fn wavelength_image(cube: &DetectorCube, bins: Range<usize>) -> Vec<u64> {
    cube.project_xy(bins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{current, decode};
    use sesame_core::{EventLayout, ReductionConfig};

    fn current_stream(events: &[(u32, u16)]) -> Vec<u8> {
        events
            .iter()
            .flat_map(|&(tick, ch)| current::encode_word(tick, ch).to_le_bytes())
            .collect()
    }

    #[test]
    fn test_cube_counts_in_range_events() {
        let time = ReductionConfig::current().time;
        // 8600 ticks is the offset, bin 0; 0 is before the offset
        let bytes = current_stream(&[(8600, 0), (8600, 0), (0, 0), (8600, 9999)]);
        let stream = decode(EventLayout::Current, &bytes).unwrap();
        let cube = CubeBuilder::new(time).make_cube(&stream).unwrap();

        assert_eq!(cube.total(), 2);
        assert_eq!(cube.get(127, 0, 0), Some(2));
    }

    #[test]
    fn test_batching_does_not_change_result() {
        let time = ReductionConfig::current().time;
        let events: Vec<(u32, u16)> = (0..5000u32)
            .map(|i| (8600 + i * 97 % 390_000, (i * 31 % 2100) as u16))
            .collect();
        let bytes = current_stream(&events);
        let stream = decode(EventLayout::Current, &bytes).unwrap();

        let whole = CubeBuilder::new(time).make_cube(&stream).unwrap();
        let batched = CubeBuilder::new(time)
            .with_batch_records(7)
            .make_cube(&stream)
            .unwrap();
        assert_eq!(whole, batched);
    }

    #[test]
    fn test_progress_is_monotone_and_completes() {
        let time = ReductionConfig::current().time;
        let bytes = current_stream(&vec![(9000, 5); 100]);
        let stream = decode(EventLayout::Current, &bytes).unwrap();

        let mut seen = Vec::new();
        let mut observer = |p: u16| seen.push(p);
        CubeBuilder::new(time)
            .with_batch_records(10)
            .make_cube_with_progress(&stream, &mut observer)
            .unwrap();

        assert_eq!(seen.first(), Some(&0));
        assert_eq!(seen.last(), Some(&1000));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.len(), 12);
    }

    #[test]
    fn test_cancelled_build_returns_error() {
        let time = ReductionConfig::current().time;
        let bytes = current_stream(&[(9000, 5); 10]);
        let stream = decode(EventLayout::Current, &bytes).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let result = CubeBuilder::new(time)
            .with_cancellation(token)
            .make_cube(&stream);
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_make_1d_with_mask() {
        let time = ReductionConfig::current().time;
        // channel 0 -> (0, 127), channel 128 -> (8, 127)
        let bytes = current_stream(&[(8600, 0), (8600, 128), (8600, 128)]);
        let stream = decode(EventLayout::Current, &bytes).unwrap();
        let builder = CubeBuilder::new(time);

        let full = builder
            .make_1d(&stream, &Region::full(128, 16), None)
            .unwrap();
        assert_eq!(full[0], 3);

        let mut mask = PixelMask::all(128, 16);
        mask.set(127, 8, false);
        let masked = builder
            .make_1d(&stream, &Region::full(128, 16), Some(&mask))
            .unwrap();
        assert_eq!(masked[0], 1);

        let bad_mask = PixelMask::all(4, 4);
        assert!(builder
            .make_1d(&stream, &Region::full(128, 16), Some(&bad_mask))
            .is_err());
    }
}
