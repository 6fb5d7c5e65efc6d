use crate::error::LedError;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::time::{Instant, sleep};

const ACQUIRE_POLL: Duration = Duration::from_millis(5);

/// Single-flight gate for anything that drives the output lines.
/// Overlapping attempts are rejected, never queued.
#[derive(Debug, Default)]
pub struct OperationGuard {
    busy: AtomicBool,
}

/// Held for the duration of one mutation. Dropping it releases the guard,
/// whichever way the mutation ended.
///
/// The permit owns a handle to its guard so it can travel into the blocking
/// task that drives the lines. The guard then stays taken until that task
/// finishes, even if the caller that started it has gone away.
#[must_use = "the guard is released as soon as the permit is dropped"]
#[derive(Debug)]
pub struct Permit {
    guard: Arc<OperationGuard>,
}

impl OperationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(self: &Arc<Self>) -> Result<Permit, LedError> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map(|_| Permit {
                guard: Arc::clone(self),
            })
            .map_err(|_| LedError::Busy)
    }

    /// Polls until the guard is free or `timeout` passes. Only used on
    /// shutdown, where the final mutation has to wait out a running one.
    pub async fn acquire_within(self: &Arc<Self>, timeout: Duration) -> Result<Permit, LedError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.try_acquire() {
                Ok(permit) => return Ok(permit),
                Err(err) if Instant::now() >= deadline => return Err(err),
                Err(_) => sleep(ACQUIRE_POLL).await,
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }
}

impl Permit {
    pub fn release(self) {}
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.guard.release();
    }
}
