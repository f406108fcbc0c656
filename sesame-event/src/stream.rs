//! Layout-tagged view over an event-stream buffer.

use crate::{current, legacy, Error, RawEventRecord, Result};
use sesame_core::EventLayout;

/// Validated event stream borrowing the file bytes.
#[derive(Debug, Clone, Copy)]
pub struct EventStream<'a> {
    layout: EventLayout,
    header: &'a [u8],
    payload: &'a [u8],
}

/// Checks that `len` bytes form a valid stream for `layout`.
///
/// # Errors
/// Returns [`Error::TruncatedStream`] if the header is incomplete or the
/// payload is not a whole number of records.
pub fn validate_length(layout: EventLayout, len: usize) -> Result<usize> {
    let header = layout.header_len();
    let record_size = layout.record_size();
    let truncated = Error::TruncatedStream {
        len,
        record_size,
        header,
    };
    let payload = len.checked_sub(header).ok_or(truncated)?;
    if payload % record_size != 0 {
        return Err(Error::TruncatedStream {
            len,
            record_size,
            header,
        });
    }
    Ok(payload / record_size)
}

/// Decodes a whole event file.
///
/// The layout is always supplied by the caller; it is never inferred from the
/// bytes.
///
/// # Errors
/// Returns [`Error::TruncatedStream`] if the length does not fit the layout.
pub fn decode(layout: EventLayout, bytes: &[u8]) -> Result<EventStream<'_>> {
    validate_length(layout, bytes.len())?;
    let (header, payload) = bytes.split_at(layout.header_len());
    Ok(EventStream {
        layout,
        header,
        payload,
    })
}

impl<'a> EventStream<'a> {
    #[must_use]
    pub fn layout(&self) -> EventLayout {
        self.layout
    }

    /// Opaque calibration header (empty for headerless layouts).
    #[must_use]
    pub fn header(&self) -> &'a [u8] {
        self.header
    }

    /// Record bytes after the header.
    #[must_use]
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Number of stored records, including any that decode to no pixel.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.payload.len() / self.layout.record_size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Raw little-endian record words.
    pub fn words(&self) -> impl Iterator<Item = u64> + 'a {
        self.payload.chunks_exact(8).map(read_word)
    }

    /// Decoded records. Records that map to no pixel are skipped.
    pub fn records(&self) -> impl Iterator<Item = RawEventRecord> + 'a {
        let layout = self.layout;
        self.words()
            .filter_map(move |raw| decode_word(layout, raw))
    }
}

/// Decodes one record word for the given layout.
#[inline]
#[must_use]
pub fn decode_word(layout: EventLayout, raw: u64) -> Option<RawEventRecord> {
    match layout {
        EventLayout::Legacy => Some(legacy::decode_word(raw)),
        EventLayout::Current => current::decode_word(raw),
    }
}

#[inline]
pub(crate) fn read_word(chunk: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(chunk);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_streams_are_rejected() {
        assert!(matches!(
            decode(EventLayout::Current, &[0u8; 12]),
            Err(Error::TruncatedStream { len: 12, record_size: 8, header: 0 })
        ));
        assert!(decode(EventLayout::Legacy, &[0u8; 100]).is_err());
        assert!(decode(EventLayout::Legacy, &[0u8; 256 + 9]).is_err());
    }

    #[test]
    fn test_empty_streams() {
        let s = decode(EventLayout::Current, &[]).unwrap();
        assert!(s.is_empty());
        let s = decode(EventLayout::Legacy, &[7u8; 256]).unwrap();
        assert_eq!(s.record_count(), 0);
        assert_eq!(s.header(), &[7u8; 256][..]);
    }

    #[test]
    fn test_current_records_skip_off_grid_channels() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&current::encode_word(10, 0).to_le_bytes());
        bytes.extend_from_slice(&current::encode_word(11, 5000).to_le_bytes());
        bytes.extend_from_slice(&current::encode_word(12, 2047).to_le_bytes());

        let s = decode(EventLayout::Current, &bytes).unwrap();
        assert_eq!(s.record_count(), 3);
        let ticks: Vec<u32> = s.records().map(|r| r.tick).collect();
        assert_eq!(ticks, vec![10, 12]);
    }

    #[test]
    fn test_legacy_header_is_split_off() {
        let mut bytes = vec![0xAAu8; 256];
        bytes.extend_from_slice(&legacy::encode_word(3, 4, 5, 6).to_le_bytes());
        let s = decode(EventLayout::Legacy, &bytes).unwrap();
        assert_eq!(s.record_count(), 1);
        let rec = s.records().next().unwrap();
        assert_eq!((rec.x, rec.y, rec.tick, rec.energy), (3, 508, 6, Some(5)));
    }
}
