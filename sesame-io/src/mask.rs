//! Pixel mask files.
//!
//! A mask file holds one image row per line. Each pixel is `1` (keep) or
//! `0` (drop), either separated by whitespace or written as a run of digits.
//! Blank lines and lines starting with `#` are skipped.

use crate::error::PathContext;
use crate::{Error, Result};
use sesame_core::PixelMask;
use std::fmt::Write as _;
use std::path::Path;

/// Reads a mask file.
///
/// # Errors
/// Returns an I/O error naming the path, or a format error for ragged rows
/// or characters other than `0` and `1`.
pub fn read_mask<P: AsRef<Path>>(path: P) -> Result<PixelMask> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).with_path(path)?;
    parse_mask(&text).map_err(|e| match e {
        Error::InvalidFormat(msg) => Error::InvalidFormat(format!("mask {}: {msg}", path.display())),
        other => other,
    })
}

/// Parses mask text.
///
/// # Errors
/// Returns a format error for ragged rows or invalid characters.
pub fn parse_mask(text: &str) -> Result<PixelMask> {
    let mut rows = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let cells: Vec<&str> = if line.contains(char::is_whitespace) {
            line.split_whitespace().collect()
        } else {
            line.matches(|_: char| true).collect()
        };
        let row = cells
            .iter()
            .map(|cell| match *cell {
                "1" => Ok(true),
                "0" => Ok(false),
                other => Err(Error::InvalidFormat(format!(
                    "line {}: expected 0 or 1, found {other:?}",
                    n + 1
                ))),
            })
            .collect::<Result<Vec<bool>>>()?;
        rows.push(row);
    }
    PixelMask::from_rows(&rows).map_err(|e| Error::InvalidFormat(e.to_string()))
}

/// Renders a mask in the run-of-digits form.
#[must_use]
pub fn format_mask(mask: &PixelMask) -> String {
    let mut out = String::with_capacity(mask.height() * (mask.width() + 1));
    for y in 0..mask.height() {
        for x in 0..mask.width() {
            out.push(if mask.get(y, x) { '1' } else { '0' });
        }
        let _ = writeln!(out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_digit_runs() {
        let mask = parse_mask("110\n011\n").unwrap();
        assert_eq!((mask.height(), mask.width()), (2, 3));
        assert!(mask.get(0, 0));
        assert!(!mask.get(0, 2));
        assert!(!mask.get(1, 0));
    }

    #[test]
    fn test_parse_whitespace_separated_with_comments() {
        let mask = parse_mask("# roi\n1 0\n\n0 1\n").unwrap();
        assert_eq!((mask.height(), mask.width()), (2, 2));
        assert!(mask.get(1, 1));
    }

    #[test]
    fn test_ragged_rows_are_rejected() {
        assert!(matches!(parse_mask("11\n1\n"), Err(Error::InvalidFormat(_))));
        assert!(parse_mask("12\n").is_err());
    }

    #[test]
    fn test_format_reads_back() {
        let mut mask = PixelMask::all(2, 3);
        mask.set(1, 2, false);
        assert_eq!(parse_mask(&format_mask(&mask)).unwrap(), mask);
    }

    #[test]
    fn test_read_mask_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.txt");
        std::fs::write(&path, "10\n01\n").unwrap();
        let mask = read_mask(&path).unwrap();
        assert!(mask.get(0, 0) && mask.get(1, 1));
        assert!(read_mask(dir.path().join("missing.txt")).unwrap_err().is_io());
    }
}
