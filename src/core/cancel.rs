//! Cooperative stop signal shared by the scheduler, the engine and signal handlers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Longest single sleep between stop checks.
pub const STOP_POLL_SLICE: Duration = Duration::from_secs(1);

/// Process-wide stop flag.
///
/// Clones share the same flag. Readers poll it; nothing blocks on it.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder of this signal to wind down.
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early when a stop is requested.
    ///
    /// Returns `true` if the full duration elapsed without a stop request.
    pub fn sleep(&self, duration: Duration) -> bool {
        self.sleep_in_slices(duration, STOP_POLL_SLICE)
    }

    fn sleep_in_slices(&self, duration: Duration, slice: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(slice));
        }
    }

    /// Shared flag for registration with OS signal hooks.
    #[must_use]
    pub fn as_atomic(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}
