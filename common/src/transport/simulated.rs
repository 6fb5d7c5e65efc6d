use super::Transport;
use crate::{
    error::TransportFault,
    store::{PixelStore, Snapshot},
};
use owo_colors::OwoColorize;
use std::{
    io::{self, Write},
    sync::Arc,
};

/// Draws each snapshot as a row of coloured swatches instead of driving
/// real lines.
pub struct SimulatedTransport {
    store: Arc<PixelStore>,
    out: Box<dyn Write + Send>,
}

impl SimulatedTransport {
    pub fn new(store: Arc<PixelStore>, out: impl Write + Send + 'static) -> Self {
        Self {
            store,
            out: Box::new(out),
        }
    }

    pub fn stdout(store: Arc<PixelStore>) -> Self {
        Self::new(store, io::stdout())
    }
}

/// One line per snapshot. Alpha is not shown.
pub fn render(pixels: &Snapshot) -> String {
    let swatches: String = pixels
        .iter()
        .map(|pixel| format!("{} ", "██".truecolor(pixel.r, pixel.g, pixel.b)))
        .collect();
    format!("[LED] {swatches}\n")
}

impl Transport for SimulatedTransport {
    fn store(&self) -> &Arc<PixelStore> {
        &self.store
    }

    fn setup(&mut self) -> Result<(), TransportFault> {
        debug!("simulated strip ready");
        self.store.clear();
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), TransportFault> {
        debug!("simulated strip released");
        self.store.clear();
        self.out.flush().map_err(TransportFault::Render)
    }

    fn emit(&mut self, pixels: &Snapshot) -> Result<(), TransportFault> {
        self.out
            .write_all(render(pixels).as_bytes())
            .and_then(|()| self.out.flush())
            .map_err(TransportFault::Render)
    }
}
