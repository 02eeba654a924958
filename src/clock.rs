//! Time source and cooperative cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{CoreError, Result};

/// Monotonic time plus blocking sleep. Injected so tests can run on virtual time.
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock was created.
    fn now(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// External halt request, shared between the caller and the core.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// `Err(Cancelled)` if a stop has been requested.
    pub fn check(&self) -> Result<()> {
        if self.is_requested() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Sleep for `total`, waking at most every `slice` to honour `stop`.
pub fn wait(clock: &dyn Clock, stop: &StopSignal, total: Duration, slice: Duration) -> Result<()> {
    stop.check()?;
    let slice = if slice.is_zero() { total } else { slice };
    let mut remaining = total;
    while !remaining.is_zero() {
        let step = remaining.min(slice);
        clock.sleep(step);
        remaining -= step;
        stop.check()?;
    }
    Ok(())
}
