//! Current record layout.
//!
//! Each record is two little-endian `u32` words: the time tick, then a word
//! whose low 16 bits index the 2048 physical channels (8 readout boards of
//! 256 channels). Each board reads two detector strips of 128 pixels, and the
//! boards are cabled so that consecutive strips land in interleaved columns.
//! The remap below undoes the cabling and flips each strip so row 0 is at the
//! top of a 128 x 16 logical image.

use crate::RawEventRecord;

/// Logical image height (pixels per strip).
pub const IMAGE_HEIGHT: u16 = 128;
/// Logical image width (number of strips).
pub const IMAGE_WIDTH: u16 = 16;
/// Number of physical channels.
pub const CHANNELS: u16 = IMAGE_HEIGHT * IMAGE_WIDTH;

/// Logical column of each physical strip.
pub const STRIP_TO_COLUMN: [u16; 16] = [0, 8, 1, 9, 2, 10, 3, 11, 4, 12, 5, 13, 6, 14, 7, 15];

/// Physical strip shown in each logical column.
pub const COLUMN_TO_STRIP: [u16; 16] = invert(STRIP_TO_COLUMN);

const fn invert(table: [u16; 16]) -> [u16; 16] {
    let mut out = [0u16; 16];
    let mut i = 0;
    while i < 16 {
        out[table[i] as usize] = i as u16;
        i += 1;
    }
    out
}

/// Maps a physical channel to logical `(x, y)`. Channels past the grid map
/// to `None`.
#[must_use]
pub fn channel_to_pixel(channel: u16) -> Option<(u16, u16)> {
    if channel >= CHANNELS {
        return None;
    }
    let strip = channel / IMAGE_HEIGHT;
    let x = STRIP_TO_COLUMN[usize::from(strip)];
    let y = IMAGE_HEIGHT - 1 - channel % IMAGE_HEIGHT;
    Some((x, y))
}

/// Maps a logical pixel back to its physical channel.
#[must_use]
pub fn pixel_to_channel(x: u16, y: u16) -> Option<u16> {
    if x >= IMAGE_WIDTH || y >= IMAGE_HEIGHT {
        return None;
    }
    let strip = COLUMN_TO_STRIP[usize::from(x)];
    Some(strip * IMAGE_HEIGHT + (IMAGE_HEIGHT - 1 - y))
}

/// Decodes one record. Records whose channel is off the grid are dropped.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn decode_word(raw: u64) -> Option<RawEventRecord> {
    let tick = (raw & 0xFFFF_FFFF) as u32;
    let channel = ((raw >> 32) & 0xFFFF) as u16;
    channel_to_pixel(channel).map(|(x, y)| RawEventRecord::new(x, y, tick))
}

/// Packs a tick and a physical channel into one record.
#[must_use]
pub fn encode_word(tick: u32, channel: u16) -> u64 {
    u64::from(tick) | (u64::from(channel) << 32)
}
