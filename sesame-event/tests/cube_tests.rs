#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::unreadable_literal
)]
use sesame_core::{DetectorCube, Region, ReductionConfig};
use sesame_event::{current, decode, legacy, CubeBuilder, EventLayout, WavelengthBinner};
use std::collections::HashSet;

// Deterministic pseudo-random words (xorshift64)
fn words(seed: u64, n: usize) -> Vec<u64> {
    let mut state = seed;
    (0..n)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        })
        .collect()
}

fn legacy_file(records: &[u64]) -> Vec<u8> {
    let mut bytes: Vec<u8> = (0..=255u8).collect();
    for raw in records {
        bytes.extend_from_slice(&raw.to_le_bytes());
    }
    bytes
}

#[test]
fn test_legacy_cube_matches_direct_tally() {
    let config = ReductionConfig::legacy();
    // Keep ticks inside a plausible window so most records land in range,
    // while a few fall outside on either side.
    let records: Vec<u64> = words(0x5EED, 20_000)
        .into_iter()
        .enumerate()
        .map(|(i, w)| {
            let tick = 60_000 + (w >> 40) as u32 % 3_800_000;
            let tick = if i % 97 == 0 { 0x3FFF_FFFF } else { tick };
            legacy::encode_word(
                (w & 0x7FF) as u16,
                ((w >> 11) & 0x7FF) as u16,
                ((w >> 22) & 0x3FF) as u16,
                tick,
            )
        })
        .collect();
    let bytes = legacy_file(&records);
    let stream = decode(EventLayout::Legacy, &bytes).unwrap();

    let cube = CubeBuilder::new(config.time)
        .with_batch_records(1_000)
        .make_cube(&stream)
        .unwrap();

    let binner = WavelengthBinner::new(config.time);
    let mut expected = vec![0u64; config.time.wavelength_bins];
    let mut tally = DetectorCube::new(512, 512, config.time.wavelength_bins);
    for rec in stream.records() {
        if let Some(bin) = binner.bin(rec.tick) {
            expected[bin] += 1;
            tally.increment(usize::from(rec.y), usize::from(rec.x), bin);
        }
    }

    let spectrum = cube.spectrum(&Region::full(512, 512), None).unwrap();
    assert_eq!(spectrum, expected);
    assert_eq!(cube, tally);
    // the saturated ticks were dropped, the rest mostly kept
    assert!(cube.total() < records.len() as u64);
    assert!(cube.total() > records.len() as u64 / 2);
}

#[test]
fn test_legacy_region_spectrum_matches_filtered_tally() {
    let config = ReductionConfig::legacy();
    let records: Vec<u64> = words(42, 5_000)
        .into_iter()
        .map(|w| {
            legacy::encode_word(
                (w & 0x1FF) as u16,
                ((w >> 11) & 0x1FF) as u16,
                0,
                70_000 + (w >> 40) as u32 % 3_000_000,
            )
        })
        .collect();
    let bytes = legacy_file(&records);
    let stream = decode(EventLayout::Legacy, &bytes).unwrap();
    let builder = CubeBuilder::new(config.time);

    let region = Region::new((100, 50), (300, 400));
    let spectrum = builder.make_1d(&stream, &region, None).unwrap();

    let binner = builder.binner();
    let mut expected = vec![0u64; config.time.wavelength_bins];
    for rec in stream.records() {
        let inside = (100..300).contains(&rec.x) && (50..400).contains(&rec.y);
        if let (true, Some(bin)) = (inside, binner.bin(rec.tick)) {
            expected[bin] += 1;
        }
    }
    assert_eq!(spectrum, expected);
}

#[test]
fn test_current_remap_is_a_bijection() {
    let pixels: HashSet<(u16, u16)> = (0..current::CHANNELS)
        .map(|ch| current::channel_to_pixel(ch).unwrap())
        .collect();
    assert_eq!(pixels.len(), 2048);
    assert!(pixels
        .iter()
        .all(|&(x, y)| x < current::IMAGE_WIDTH && y < current::IMAGE_HEIGHT));

    for ch in 0..current::CHANNELS {
        let (x, y) = current::channel_to_pixel(ch).unwrap();
        assert_eq!(current::pixel_to_channel(x, y), Some(ch));
    }
}

#[test]
fn test_current_cube_places_every_channel_once() {
    let config = ReductionConfig::current();
    let bytes: Vec<u8> = (0..current::CHANNELS)
        .flat_map(|ch| current::encode_word(20_000, ch).to_le_bytes())
        .collect();
    let stream = decode(EventLayout::Current, &bytes).unwrap();
    let cube = CubeBuilder::new(config.time).make_cube(&stream).unwrap();

    let bin = WavelengthBinner::new(config.time).bin(20_000).unwrap();
    let image = sesame_event::wavelength_image(&cube, bin..bin + 1);
    assert_eq!(image.len(), 2048);
    assert!(image.iter().all(|&c| c == 1));
}
