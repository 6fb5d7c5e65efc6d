use crate::{PIXEL_COUNT, pixel::Pixel};
use parking_lot::RwLock;

pub type Snapshot = [Pixel; PIXEL_COUNT];

/// Canonical pixel state. Readers always see a whole snapshot, never a
/// half-written one. No validation happens here.
#[derive(Debug, Default)]
pub struct PixelStore {
    pixels: RwLock<Snapshot>,
}

impl PixelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> Snapshot {
        *self.pixels.read()
    }

    pub fn apply(&self, pixels: Snapshot) {
        *self.pixels.write() = pixels;
    }

    pub fn clear(&self) {
        self.apply([Pixel::OFF; PIXEL_COUNT]);
    }
}
