use crate::error::LedError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Pixel {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    /// Full 8-bit alpha. Only the top five bits reach the strip.
    pub a: u8,
}

impl Pixel {
    pub const OFF: Pixel = Pixel::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Global brightness byte as clocked out before the colour bytes:
    /// three marker bits followed by the alpha compressed to five bits.
    pub const fn brightness_byte(self) -> u8 {
        0b1110_0000 | (self.a >> 3)
    }
}

/// Parses `#RRGGBBAA`, case-insensitive. Nothing else is accepted.
impl FromStr for Pixel {
    type Err = LedError;

    fn from_str(colour: &str) -> Result<Self, Self::Err> {
        let invalid = || LedError::Validation(format!("'{colour}' is not a #RRGGBBAA colour"));

        let digits = colour.strip_prefix('#').ok_or_else(invalid)?;
        if digits.len() != 8 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let [r, g, b, a] = u32::from_str_radix(digits, 16)
            .map_err(|_| invalid())?
            .to_be_bytes();

        Ok(Self { r, g, b, a })
    }
}

impl fmt::Display for Pixel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { r, g, b, a } = self;
        write!(f, "#{r:02x}{g:02x}{b:02x}{a:02x}")
    }
}
