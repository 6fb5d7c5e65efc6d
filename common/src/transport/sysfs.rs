use crate::error::TransportFault;
use embedded_hal::digital::{ErrorType, OutputPin};
use std::{
    fs::{self, File, OpenOptions},
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
};

/// An output line exported through the sysfs gpio interface.
#[derive(Debug)]
pub struct SysfsPin {
    pin: u32,
    root: PathBuf,
    value: File,
}

impl SysfsPin {
    /// Exports `pin` under `root` (normally `/sys/class/gpio`) and sets it
    /// up as an output. A pin that is already exported is reused.
    pub fn export(root: &Path, pin: u32) -> Result<Self, TransportFault> {
        let fault = |source| TransportFault::Pin { pin, source };
        let dir = root.join(format!("gpio{pin}"));

        if !dir.exists() {
            fs::write(root.join("export"), pin.to_string()).map_err(fault)?;
        }
        fs::write(dir.join("direction"), "out").map_err(fault)?;

        let value = OpenOptions::new()
            .write(true)
            .open(dir.join("value"))
            .map_err(fault)?;

        debug!(pin, "exported gpio");

        Ok(Self {
            pin,
            root: root.to_path_buf(),
            value,
        })
    }

    pub fn unexport(self) -> Result<(), TransportFault> {
        let Self { pin, root, value } = self;
        drop(value);

        fs::write(root.join("unexport"), pin.to_string())
            .map_err(|source| TransportFault::Pin { pin, source })?;

        debug!(pin, "unexported gpio");
        Ok(())
    }

    fn write_level(&mut self, level: &[u8]) -> Result<(), TransportFault> {
        self.value
            .write_all_at(level, 0)
            .map_err(|source| TransportFault::Pin {
                pin: self.pin,
                source,
            })
    }
}

impl ErrorType for SysfsPin {
    type Error = TransportFault;
}

impl OutputPin for SysfsPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write_level(b"0")
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write_level(b"1")
    }
}
