//! Pixel state, patch merging and the two-wire serial protocol for an
//! 8-pixel APA102-style strip.

#[macro_use]
extern crate tracing;

pub mod controller;
pub mod encoder;
pub mod error;
pub mod guard;
pub mod patch;
pub mod pixel;
pub mod store;
pub mod transport;

/// Number of pixels on the strip.
pub const PIXEL_COUNT: usize = 8;

pub use controller::LedController;
pub use error::{LedError, TransportFault};
pub use patch::Patch;
pub use pixel::Pixel;
pub use store::{PixelStore, Snapshot};
