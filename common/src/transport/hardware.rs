use super::{Transport, sysfs::SysfsPin};
use crate::{
    encoder::{self, Frame},
    error::TransportFault,
    store::{PixelStore, Snapshot},
};
use embedded_hal::digital::{OutputPin, PinState};
use std::{path::PathBuf, sync::Arc};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PinConfig {
    pub gpio_root: PathBuf,
    pub data_pin: u32,
    pub clock_pin: u32,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            gpio_root: PathBuf::from("/sys/class/gpio"),
            data_pin: 23,
            clock_pin: 24,
        }
    }
}

/// Sets the data line, then pulses the clock high and low, once per bit.
pub fn clock_out<D, C, E>(frame: &Frame, data: &mut D, clock: &mut C) -> Result<(), E>
where
    D: OutputPin<Error = E>,
    C: OutputPin<Error = E>,
{
    for bit in frame.bits() {
        data.set_state(PinState::from(bit))?;
        clock.set_high()?;
        clock.set_low()?;
    }
    Ok(())
}

struct Lines {
    data: SysfsPin,
    clock: SysfsPin,
}

/// Bit-bangs frames onto two real gpio lines.
pub struct HardwareTransport {
    store: Arc<PixelStore>,
    config: PinConfig,
    lines: Option<Lines>,
}

impl HardwareTransport {
    pub fn new(store: Arc<PixelStore>, config: PinConfig) -> Self {
        Self {
            store,
            config,
            lines: None,
        }
    }
}

impl Transport for HardwareTransport {
    fn store(&self) -> &Arc<PixelStore> {
        &self.store
    }

    fn setup(&mut self) -> Result<(), TransportFault> {
        info!(
            data = self.config.data_pin,
            clock = self.config.clock_pin,
            "acquiring gpio lines"
        );

        let root = &self.config.gpio_root;
        let data = SysfsPin::export(root, self.config.data_pin)?;
        let clock = match SysfsPin::export(root, self.config.clock_pin) {
            Ok(clock) => clock,
            Err(err) => {
                if let Err(release) = data.unexport() {
                    warn!("failed to release data line: {release}");
                }
                return Err(err);
            }
        };

        self.store.clear();
        self.lines = Some(Lines { data, clock });
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), TransportFault> {
        info!("releasing gpio lines");
        self.store.clear();

        let Some(Lines { data, clock }) = self.lines.take() else {
            return Ok(());
        };

        // both lines are released even if the first one fails
        let data = data.unexport();
        let clock = clock.unexport();
        data.and(clock)
    }

    fn emit(&mut self, pixels: &Snapshot) -> Result<(), TransportFault> {
        let Lines { data, clock } = self.lines.as_mut().ok_or(TransportFault::NotSetUp)?;

        let frame = encoder::encode(pixels);
        debug!(bits = frame.bit_len(), "clocking out frame");
        clock_out(&frame, data, clock)
    }
}
