//! Beam-monitor file decoding and encoding.
//!
//! Two encodings exist. Binary files are a bare little-endian `i32` array
//! and carry no elapsed time. Legacy text files look like:
//!
//! ```text
//! File Saved for Run Number 1234.
//! This run had 5512 counts and lasted 600000 milliseconds
//! User Name=..., Proposal Number=...
//! 1	0
//! 2	4
//! ...
//! ```

use crate::error::PathContext;
use crate::{Error, Result};
use sesame_core::{MonitorEncoding, MonitorFormat, MonitorHistogram};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Decoded monitor file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorReading {
    pub histogram: MonitorHistogram,
    /// Elapsed time recorded in the file, when the encoding has one.
    pub elapsed_ms: Option<u64>,
}

/// Reads and decodes a monitor file.
///
/// # Errors
/// Returns an I/O error naming the path, or a format error.
pub fn read_monitor<P: AsRef<Path>>(path: P, format: &MonitorFormat) -> Result<MonitorReading> {
    let path = path.as_ref();
    let bytes = fs::read(path).with_path(path)?;
    decode_monitor(&bytes, format).map_err(|e| match e {
        Error::InvalidFormat(msg) => Error::InvalidFormat(format!("{}: {msg}", path.display())),
        other => other,
    })
}

/// Decodes monitor file contents.
///
/// # Errors
/// Returns a format error if the contents do not match the encoding.
pub fn decode_monitor(bytes: &[u8], format: &MonitorFormat) -> Result<MonitorReading> {
    match format.encoding {
        MonitorEncoding::Binary => Ok(MonitorReading {
            histogram: decode_binary(bytes, format.bins)?,
            elapsed_ms: None,
        }),
        MonitorEncoding::LegacyText => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| Error::InvalidFormat(format!("monitor text is not UTF-8: {e}")))?;
            decode_legacy_text(text, format.bins)
        }
    }
}

/// Decodes a binary monitor histogram of exactly `bins` values.
///
/// # Errors
/// Returns a format error on a length mismatch or a negative count.
pub fn decode_binary(bytes: &[u8], bins: usize) -> Result<MonitorHistogram> {
    if bytes.len() != bins * 4 {
        return Err(Error::InvalidFormat(format!(
            "binary monitor has {} bytes, expected {} ({bins} bins)",
            bytes.len(),
            bins * 4
        )));
    }
    let counts = bytes
        .chunks_exact(4)
        .enumerate()
        .map(|(i, chunk)| {
            let value = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            u32::try_from(value).map_err(|_| {
                Error::InvalidFormat(format!("negative monitor count {value} in bin {i}"))
            })
        })
        .collect::<Result<Vec<u32>>>()?;
    Ok(MonitorHistogram::from_counts(counts))
}

/// Decodes a legacy text monitor file.
///
/// Rows past `bins` are ignored and missing rows count as zero.
///
/// # Errors
/// Returns a format error if the elapsed-time line is missing or a data row
/// cannot be parsed.
pub fn decode_legacy_text(text: &str, bins: usize) -> Result<MonitorReading> {
    let mut lines = text.lines();
    lines.next();
    let elapsed_line = lines
        .next()
        .ok_or_else(|| Error::InvalidFormat("monitor text has no elapsed-time line".into()))?;
    let elapsed_ms = parse_elapsed_ms(elapsed_line).ok_or_else(|| {
        Error::InvalidFormat(format!("no elapsed time in monitor line {elapsed_line:?}"))
    })?;
    lines.next();

    let mut counts = Vec::with_capacity(bins);
    for (row, line) in lines.enumerate() {
        if counts.len() == bins {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let count = line
            .split_whitespace()
            .nth(1)
            .and_then(|field| field.parse::<u32>().ok())
            .ok_or_else(|| {
                Error::InvalidFormat(format!("bad monitor row {}: {line:?}", row + 4))
            })?;
        counts.push(count);
    }

    let mut histogram = MonitorHistogram::from_counts(counts);
    histogram.resize(bins);
    Ok(MonitorReading {
        histogram,
        elapsed_ms: Some(elapsed_ms),
    })
}

/// Finds `lasted <int> milliseconds` in a line.
fn parse_elapsed_ms(line: &str) -> Option<u64> {
    let mut words = line.split_whitespace();
    while let Some(word) = words.next() {
        if word == "lasted" {
            let value = words.next()?.parse().ok()?;
            return (words.next()? == "milliseconds").then_some(value);
        }
    }
    None
}

/// Encodes a histogram as a binary monitor file.
///
/// # Errors
/// Returns a format error if a count does not fit in an `i32`.
pub fn encode_binary(histogram: &MonitorHistogram) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(histogram.len() * 4);
    for (i, &count) in histogram.counts().iter().enumerate() {
        let value = i32::try_from(count).map_err(|_| {
            Error::InvalidFormat(format!("monitor count {count} in bin {i} overflows i32"))
        })?;
        out.extend_from_slice(&value.to_le_bytes());
    }
    Ok(out)
}

/// Writes a legacy text monitor file.
///
/// # Errors
/// Returns an error if writing fails.
pub fn write_legacy_text<W: Write>(
    writer: &mut W,
    run_label: &str,
    histogram: &MonitorHistogram,
    elapsed_ms: u64,
) -> std::io::Result<()> {
    writeln!(writer, "File Saved for Run Number {run_label}.")?;
    writeln!(
        writer,
        "This run had {} counts and lasted {elapsed_ms} milliseconds",
        histogram.total()
    )?;
    writeln!(writer, "User Name=Unknown, Proposal Number=Unknown")?;
    for (i, count) in histogram.counts().iter().enumerate() {
        writeln!(writer, "{}\t{count}", i + 1)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary(values: &[i32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_binary_decode() {
        let h = decode_binary(&binary(&[1, 0, 7]), 3).unwrap();
        assert_eq!(h.counts(), &[1, 0, 7]);
        assert_eq!(h.total(), 8);
    }

    #[test]
    fn test_binary_wrong_length() {
        assert!(matches!(
            decode_binary(&binary(&[1, 2]), 3),
            Err(Error::InvalidFormat(_))
        ));
        assert!(decode_binary(&[0u8; 5], 1).is_err());
    }

    #[test]
    fn test_binary_negative_count() {
        assert!(matches!(
            decode_binary(&binary(&[1, -2]), 2),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_binary_encode_matches_decode() {
        let h = MonitorHistogram::from_counts(vec![3, 0, 9]);
        assert_eq!(decode_binary(&encode_binary(&h).unwrap(), 3).unwrap(), h);
    }

    #[test]
    fn test_legacy_text() {
        let text = "File Saved for Run Number 12.\n\
                    This run had 11 counts and lasted 600000 milliseconds\n\
                    User Name=x, Proposal Number=y\n\
                    1\t4\n\
                    2\t7\n";
        let reading = decode_legacy_text(text, 4).unwrap();
        assert_eq!(reading.elapsed_ms, Some(600_000));
        assert_eq!(reading.histogram.counts(), &[4, 7, 0, 0]);

        let reading = decode_legacy_text(text, 1).unwrap();
        assert_eq!(reading.histogram.counts(), &[4]);
    }

    #[test]
    fn test_legacy_text_without_elapsed_time() {
        let text = "header\nno time here\nuser\n1\t4\n";
        assert!(matches!(
            decode_legacy_text(text, 1),
            Err(Error::InvalidFormat(_))
        ));
        assert!(decode_legacy_text("only one line", 1).is_err());
    }

    #[test]
    fn test_legacy_text_bad_row() {
        let text = "a\nlasted 5 milliseconds\nc\n1\tx\n";
        assert!(decode_legacy_text(text, 2).is_err());
    }

    #[test]
    fn test_written_summary_reads_back() {
        let h = MonitorHistogram::from_counts(vec![5, 0, 2]);
        let mut out = Vec::new();
        write_legacy_text(&mut out, "0", &h, 1500).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("File Saved for Run Number 0.\nThis run had 7 counts"));

        let reading = decode_legacy_text(&text, 3).unwrap();
        assert_eq!(reading.elapsed_ms, Some(1500));
        assert_eq!(reading.histogram, h);
    }

    #[test]
    fn test_read_monitor_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let format = MonitorFormat {
            encoding: MonitorEncoding::Binary,
            bins: 3,
        };
        let err = read_monitor(dir.path().join("nope.dat"), &format).unwrap_err();
        assert!(err.is_io());
    }
}
