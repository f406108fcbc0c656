//! Memory-mapped file readers.
//!

use crate::error::PathContext;
use crate::Result;
use memmap2::Mmap;
use sesame_core::{
    CancellationToken, DetectorCube, NoProgress, PixelMask, ProgressObserver, ReductionConfig,
    Region,
};
use sesame_event::{decode, validate_length, CubeBuilder, EventStream};
use std::fs::File;
use std::path::{Path, PathBuf};

/// A memory-mapped file reader.
///
/// Uses memmap2 to efficiently access file contents without
/// loading the entire file into memory.
pub struct MappedFileReader {
    mmap: Mmap,
    path: PathBuf,
}

impl MappedFileReader {
    /// Opens a file for memory-mapped reading.
    ///
    /// # Errors
    /// Returns an error naming the path if the file cannot be opened or
    /// memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_path(path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file) }.with_path(path)?;
        Ok(Self {
            mmap,
            path: path.to_path_buf(),
        })
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap[..]
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Path the file was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// An event-stream file reader with memory-mapped I/O.
pub struct EventFileReader {
    reader: MappedFileReader,
    config: ReductionConfig,
}

impl EventFileReader {
    /// Opens an event file for reading with the default configuration.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = MappedFileReader::open(path)?;
        Ok(Self {
            reader,
            config: ReductionConfig::default(),
        })
    }

    /// Sets the reduction configuration (layout and time conversion).
    #[must_use]
    pub fn with_config(mut self, config: ReductionConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ReductionConfig {
        &self.config
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.reader.path()
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn file_size(&self) -> usize {
        self.reader.len()
    }

    /// Number of records after the header.
    ///
    /// # Errors
    /// Returns an error if the file is truncated.
    pub fn record_count(&self) -> Result<usize> {
        Ok(validate_length(self.config.layout, self.reader.len())?)
    }

    /// Validated view over the file.
    ///
    /// # Errors
    /// Returns an error if the file is truncated.
    pub fn stream(&self) -> Result<EventStream<'_>> {
        Ok(decode(self.config.layout, self.reader.as_bytes())?)
    }

    /// Builds the detector cube.
    ///
    /// # Errors
    /// Returns an error if the file is truncated or the build is cancelled.
    pub fn make_cube(&self) -> Result<DetectorCube> {
        self.make_cube_with_progress(&mut NoProgress, None)
    }

    /// Builds the detector cube with progress reporting and cancellation.
    ///
    /// # Errors
    /// Returns an error if the file is truncated or the build is cancelled.
    pub fn make_cube_with_progress(
        &self,
        observer: &mut dyn ProgressObserver,
        cancel: Option<CancellationToken>,
    ) -> Result<DetectorCube> {
        let stream = self.stream()?;
        let mut builder = CubeBuilder::new(self.config.time);
        if let Some(token) = cancel {
            builder = builder.with_cancellation(token);
        }
        log::debug!(
            "building cube from {} ({} records)",
            self.path().display(),
            stream.record_count()
        );
        Ok(builder.make_cube_with_progress(&stream, observer)?)
    }

    /// Wavelength spectrum over a pixel region and optional mask.
    ///
    /// # Errors
    /// Returns an error if the file is truncated or the mask shape differs
    /// from the image.
    pub fn make_1d(&self, region: &Region, mask: Option<&PixelMask>) -> Result<Vec<u64>> {
        let stream = self.stream()?;
        Ok(CubeBuilder::new(self.config.time).make_1d(&stream, region, mask)?)
    }
}
