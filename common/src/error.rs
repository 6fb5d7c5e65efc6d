use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedError {
    /// A colour in the patch set could not be parsed. Nothing was applied.
    #[error("{0}")]
    Validation(String),

    /// Another mutation currently owns the output lines.
    #[error("Already running")]
    Busy,

    #[error("Not authorized")]
    Unauthorized,

    /// The output lines are in an unknown state after this.
    #[error(transparent)]
    Transport(#[from] TransportFault),
}

impl LedError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Busy => "busy",
            Self::Unauthorized => "unauthorized",
            Self::Transport(_) => "transport",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[derive(Debug, Error)]
pub enum TransportFault {
    #[error("gpio{pin}: {source}")]
    Pin {
        pin: u32,
        #[source]
        source: io::Error,
    },

    #[error("output lines have not been set up")]
    NotSetUp,

    #[error("failed to render pixels: {0}")]
    Render(#[source] io::Error),

    #[error("transport worker stopped: {0}")]
    Worker(String),
}

impl embedded_hal::digital::Error for TransportFault {
    fn kind(&self) -> embedded_hal::digital::ErrorKind {
        embedded_hal::digital::ErrorKind::Other
    }
}
