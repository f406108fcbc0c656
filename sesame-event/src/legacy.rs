//! Legacy record layout.
//!
//! Each record is one little-endian `u64`:
//!
//! | bits   | field          |
//! |--------|----------------|
//! | 0-10   | x              |
//! | 11-21  | y              |
//! | 22-31  | energy channel |
//! | 32-61  | time tick      |
//!
//! The detector reads out bottom-up, so rows are flipped (`y' = 512 - y`),
//! and both coordinates wrap modulo the 512-pixel image.

use crate::RawEventRecord;

/// Image side length in pixels.
pub const IMAGE_SIZE: u16 = 512;

const X_MASK: u64 = 0x7FF;
const Y_SHIFT: u32 = 11;
const Y_MASK: u64 = 0x7FF;
const ENERGY_SHIFT: u32 = 22;
const ENERGY_MASK: u64 = 0x3FF;
const TICK_SHIFT: u32 = 32;
const TICK_MASK: u64 = 0x3FFF_FFFF;

/// Decodes one packed record.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn decode_word(raw: u64) -> RawEventRecord {
    let x = (raw & X_MASK) as u16;
    let y = ((raw >> Y_SHIFT) & Y_MASK) as u16;
    let energy = ((raw >> ENERGY_SHIFT) & ENERGY_MASK) as u16;
    let tick = ((raw >> TICK_SHIFT) & TICK_MASK) as u32;

    RawEventRecord::new(x % IMAGE_SIZE, flip_row(y), tick).with_energy(energy)
}

/// Packs raw detector fields into one record. Fields are masked to width.
#[must_use]
pub fn encode_word(x: u16, y: u16, energy: u16, tick: u32) -> u64 {
    (u64::from(x) & X_MASK)
        | ((u64::from(y) & Y_MASK) << Y_SHIFT)
        | ((u64::from(energy) & ENERGY_MASK) << ENERGY_SHIFT)
        | ((u64::from(tick) & TICK_MASK) << TICK_SHIFT)
}

#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn flip_row(y: u16) -> u16 {
    (i32::from(IMAGE_SIZE) - i32::from(y)).rem_euclid(i32::from(IMAGE_SIZE)) as u16
}
