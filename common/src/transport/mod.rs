//! Sinks for encoded pixel state. Which one runs is fixed at start-up.

use crate::{
    error::{LedError, TransportFault},
    patch::{self, Patch},
    store::{PixelStore, Snapshot},
};
use std::sync::Arc;

mod hardware;
mod simulated;
mod sysfs;

pub use hardware::{HardwareTransport, PinConfig, clock_out};
pub use simulated::{SimulatedTransport, render};
pub use sysfs::SysfsPin;

pub trait Transport: Send {
    /// Store this transport merges into and publishes.
    fn store(&self) -> &Arc<PixelStore>;

    fn setup(&mut self) -> Result<(), TransportFault>;

    fn teardown(&mut self) -> Result<(), TransportFault>;

    /// Pushes a full snapshot out of the sink.
    fn emit(&mut self, pixels: &Snapshot) -> Result<(), TransportFault>;

    /// Merges `patches` into the current state, emits the result and then
    /// publishes it to the store. Nothing is published if either step fails.
    fn patch_leds(&mut self, patches: &[Patch]) -> Result<Snapshot, LedError> {
        let next = patch::merge(&self.store().read(), patches)?;
        self.emit(&next)?;
        self.store().apply(next);
        Ok(next)
    }
}
