//! Atomic artifact writers.
//!
//! Output is written to a temporary file in the destination directory and
//! renamed over the target only on [`AtomicFile::persist`]. Dropping an
//! unpersisted writer deletes the temporary file, so a failed merge never
//! leaves a partial artifact behind.

use crate::error::PathContext;
use crate::Result;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Write-once output file.
pub struct AtomicFile {
    temp: NamedTempFile,
    target: PathBuf,
    written: u64,
}

impl AtomicFile {
    /// Starts writing `target`. Nothing appears at `target` until
    /// [`persist`](Self::persist) succeeds.
    ///
    /// # Errors
    /// Returns an error if the temporary file cannot be created.
    pub fn create<P: AsRef<Path>>(target: P) -> Result<Self> {
        let target = target.as_ref().to_path_buf();
        let dir = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let temp = NamedTempFile::new_in(&dir).with_path(&dir)?;
        Ok(Self {
            temp,
            target,
            written: 0,
        })
    }

    /// Final path of this artifact.
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Bytes written so far; usable as a rollback checkpoint.
    #[must_use]
    pub fn checkpoint(&self) -> u64 {
        self.written
    }

    /// Discards everything written after `checkpoint`.
    ///
    /// # Errors
    /// Returns an error if the temporary file cannot be truncated.
    pub fn rollback(&mut self, checkpoint: u64) -> Result<()> {
        let file = self.temp.as_file_mut();
        file.set_len(checkpoint).with_path(&self.target)?;
        file.seek(SeekFrom::Start(checkpoint)).with_path(&self.target)?;
        self.written = checkpoint;
        Ok(())
    }

    /// Streams exactly `len` bytes from `reader` into the file.
    ///
    /// On a short read or an I/O failure the bytes copied so far stay in the
    /// file; callers that need all-or-nothing should take a
    /// [`checkpoint`](Self::checkpoint) first and [`rollback`](Self::rollback)
    /// on error.
    ///
    /// # Errors
    /// Returns an error if reading or writing fails, or if `reader` ends
    /// before `len` bytes.
    pub fn append_from<R: Read>(&mut self, reader: R, len: u64) -> io::Result<u64> {
        let copied = io::copy(&mut reader.take(len), self)?;
        if copied < len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("source ended after {copied} of {len} bytes"),
            ));
        }
        Ok(copied)
    }

    /// Flushes and renames the file onto its target.
    ///
    /// # Errors
    /// Returns an error if the flush or the rename fails; the temporary file
    /// is removed in that case.
    pub fn persist(mut self) -> Result<PathBuf> {
        self.temp.as_file_mut().sync_all().with_path(&self.target)?;
        let target = self.target;
        self.temp
            .persist(&target)
            .map_err(|e| e.error)
            .with_path(&target)?;
        log::debug!("wrote {}", target.display());
        Ok(target)
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.temp.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.temp.flush()
    }
}

/// Writes `bytes` to `target` atomically.
///
/// # Errors
/// Returns an error if the file cannot be written or renamed.
pub fn write_atomic<P: AsRef<Path>>(target: P, bytes: &[u8]) -> Result<PathBuf> {
    let mut file = AtomicFile::create(target)?;
    let target = file.target().to_path_buf();
    file.write_all(bytes).with_path(&target)?;
    file.persist()
}
