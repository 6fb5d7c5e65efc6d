//! APA102-style framing: a zero start frame, four bytes per pixel, then
//! extra clock pulses with data held low to push the last pixel through
//! the chain.

use crate::{PIXEL_COUNT, store::Snapshot};
use std::iter;

pub const START_FRAME_BITS: usize = 32;
pub const BYTES_PER_PIXEL: usize = 4;
/// Well above the `ceil(PIXEL_COUNT / 2)` pulses the chain needs.
pub const LATCH_PULSES: usize = 36;
pub const FRAME_BITS: usize = START_FRAME_BITS + PIXEL_COUNT * BYTES_PER_PIXEL * 8 + LATCH_PULSES;

/// Everything the strip needs to display one snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    payload: [u8; PIXEL_COUNT * BYTES_PER_PIXEL],
}

impl Frame {
    /// Per-pixel bytes: brightness, blue, green, red.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Data line level for each clock pulse, in transmission order.
    /// Bytes go out most significant bit first.
    pub fn bits(&self) -> impl Iterator<Item = bool> + '_ {
        let payload = self
            .payload
            .iter()
            .flat_map(|byte| (0..8).rev().map(move |shift| (byte >> shift) & 1 == 1));

        iter::repeat_n(false, START_FRAME_BITS)
            .chain(payload)
            .chain(iter::repeat_n(false, LATCH_PULSES))
    }

    pub const fn bit_len(&self) -> usize {
        FRAME_BITS
    }
}

pub fn encode(pixels: &Snapshot) -> Frame {
    let mut payload = [0; PIXEL_COUNT * BYTES_PER_PIXEL];
    for (chunk, pixel) in payload.chunks_exact_mut(BYTES_PER_PIXEL).zip(pixels) {
        chunk.copy_from_slice(&[pixel.brightness_byte(), pixel.b, pixel.g, pixel.r]);
    }

    Frame { payload }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Pixel;

    #[test]
    fn frame_length_is_fixed() {
        let frame = encode(&[Pixel::OFF; PIXEL_COUNT]);
        assert_eq!(FRAME_BITS, 324);
        assert_eq!(frame.bits().count(), frame.bit_len());
    }

    #[test]
    fn pixel_bytes_are_brightness_blue_green_red() {
        let mut pixels = [Pixel::OFF; PIXEL_COUNT];
        pixels[3] = Pixel::new(0xff, 0x00, 0xff, 0x80);
        pixels[7] = Pixel::new(0x12, 0x34, 0x56, 0xff);

        let frame = encode(&pixels);
        let payload = frame.payload();

        assert_eq!(&payload[0..4], &[0xe0, 0, 0, 0]);
        assert_eq!(&payload[12..16], &[0xf0, 0xff, 0x00, 0xff]);
        assert_eq!(&payload[28..32], &[0xff, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn bits_are_msb_first_between_zero_frames() {
        let mut pixels = [Pixel::OFF; PIXEL_COUNT];
        pixels[0] = Pixel::new(0x01, 0x00, 0x80, 0xff);

        let bits: Vec<bool> = encode(&pixels).bits().collect();
        let (start, rest) = bits.split_at(START_FRAME_BITS);
        let (first_pixel, _) = rest.split_at(32);

        assert!(start.iter().all(|bit| !bit));
        assert!(bits[FRAME_BITS - LATCH_PULSES..].iter().all(|bit| !bit));

        let as_byte = |bits: &[bool]| bits.iter().fold(0_u8, |acc, bit| (acc << 1) | u8::from(*bit));
        assert_eq!(as_byte(&first_pixel[0..8]), 0xff);
        assert_eq!(as_byte(&first_pixel[8..16]), 0x80);
        assert_eq!(as_byte(&first_pixel[16..24]), 0x00);
        assert_eq!(as_byte(&first_pixel[24..32]), 0x01);
        assert!(first_pixel[8]);
        assert!(!first_pixel[9]);
    }

    #[test]
    fn encoding_is_deterministic() {
        let pixels = [Pixel::new(0x10, 0x20, 0x30, 0x40); PIXEL_COUNT];
        let first: Vec<bool> = encode(&pixels).bits().collect();
        let second: Vec<bool> = encode(&pixels).bits().collect();
        assert_eq!(first, second);
    }
}
