//! Ties the guard, the store and the active transport together. This is the
//! only way callers are meant to mutate the strip.

use crate::{
    error::{LedError, TransportFault},
    guard::{OperationGuard, Permit},
    patch::{self, Patch},
    pixel::Pixel,
    store::{PixelStore, Snapshot},
    transport::Transport,
};
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};

/// Colour shown across the whole strip right before it goes dark on shutdown.
pub const WARNING_COLOUR: Pixel = Pixel::new(0xff, 0x00, 0x00, 0x27);
pub const WARNING_FLASH: Duration = Duration::from_millis(250);
/// How long shutdown waits for an in-flight mutation before giving up on
/// the flash and releasing the lines anyway.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(2);

pub struct LedController {
    store: Arc<PixelStore>,
    guard: Arc<OperationGuard>,
    transport: Arc<Mutex<Box<dyn Transport>>>,
}

impl LedController {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            store: Arc::clone(transport.store()),
            guard: Arc::new(OperationGuard::new()),
            transport: Arc::new(Mutex::new(transport)),
        }
    }

    pub fn setup(&self) -> Result<(), TransportFault> {
        self.transport.lock().setup()
    }

    /// Current pixels. Never waits on a running mutation.
    pub fn snapshot(&self) -> Snapshot {
        self.store.read()
    }

    pub fn guard(&self) -> &Arc<OperationGuard> {
        &self.guard
    }

    /// Applies `patches` as one operation and returns the resulting pixels.
    pub async fn patch(&self, authorized: bool, patches: Vec<Patch>) -> Result<Snapshot, LedError> {
        if !authorized {
            return Err(LedError::Unauthorized);
        }

        let permit = self.guard.try_acquire()?;
        self.run(permit, patches).await
    }

    /// Flashes a warning, blanks the strip and releases the transport. The
    /// transport is torn down even when the flash fails.
    pub async fn shutdown(&self, flash: Duration) -> Result<(), LedError> {
        let blanked = self.flash_and_blank(flash).await;
        if let Err(err) = &blanked {
            warn!("failed to blank strip before shutdown: {err}");
        }

        let transport = Arc::clone(&self.transport);
        let released = tokio::task::spawn_blocking(move || transport.lock().teardown())
            .await
            .map_err(|err| TransportFault::Worker(err.to_string()))
            .and_then(|released| released);

        blanked?;
        Ok(released?)
    }

    async fn flash_and_blank(&self, flash: Duration) -> Result<(), LedError> {
        let permit = self.guard.acquire_within(SHUTDOWN_WAIT).await?;

        info!("flashing strip before shutdown");
        let transport = Arc::clone(&self.transport);
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let mut transport = transport.lock();
            transport.patch_leds(&patch::fill(WARNING_COLOUR))?;
            std::thread::sleep(flash);
            transport.patch_leds(&patch::fill(Pixel::OFF))
        })
        .await
        .map_err(|err| TransportFault::Worker(err.to_string()))??;
        Ok(())
    }

    /// The permit moves into the blocking task, so the guard stays taken
    /// until the lines are idle again even if this future is dropped.
    async fn run(&self, permit: Permit, patches: Vec<Patch>) -> Result<Snapshot, LedError> {
        let transport = Arc::clone(&self.transport);
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            transport.lock().patch_leds(&patches)
        })
        .await
        .map_err(|err| TransportFault::Worker(err.to_string()))?
    }
}
