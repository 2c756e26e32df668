//! Signal handling: SIGTERM/SIGINT graceful shutdown, SIGHUP config reload,
//! SIGUSR1 immediate sync, and systemd readiness/watchdog notifications.
//!
//! Uses the `signal-hook` crate for safe signal registration. The scheduler
//! polls `SignalHandler` flags between sleep slices rather than blocking on
//! signals. Termination requests land directly on the shared [`StopSignal`],
//! so the sync engine's retry loop sees them too.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use signal_hook::consts::{SIGINT, SIGTERM};

use crate::core::cancel::StopSignal;

// ──────────────────── signal handler ────────────────────

/// Signal state shared between the OS hooks and the scheduler.
#[derive(Clone)]
pub struct SignalHandler {
    stop: StopSignal,
    reload_flag: Arc<AtomicBool>,
    sync_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a handler around `stop` and register OS signal hooks.
    ///
    /// Registration is best-effort; failures are logged to stderr but not fatal.
    pub fn new(stop: StopSignal) -> Self {
        let handler = Self::detached(stop);
        handler.register_signals();
        handler
    }

    /// Handler with no OS hooks; flags only change programmatically.
    #[must_use]
    pub fn detached(stop: StopSignal) -> Self {
        Self {
            stop,
            reload_flag: Arc::new(AtomicBool::new(false)),
            sync_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub fn should_shutdown(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Check (and clear) whether a config reload has been requested.
    pub fn should_reload(&self) -> bool {
        self.reload_flag.swap(false, Ordering::Relaxed)
    }

    /// Check (and clear) whether an immediate sync has been requested.
    pub fn should_sync(&self) -> bool {
        self.sync_flag.swap(false, Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.stop.request_stop();
    }

    pub fn request_reload(&self) {
        self.reload_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_sync(&self) {
        self.sync_flag.store(true, Ordering::Relaxed);
    }

    /// Whether anything besides the passage of time wants the scheduler's attention.
    pub fn has_pending(&self) -> bool {
        self.should_shutdown()
            || self.reload_flag.load(Ordering::Relaxed)
            || self.sync_flag.load(Ordering::Relaxed)
    }

    fn register_signals(&self) {
        for (signal, name) in [(SIGTERM, "SIGTERM"), (SIGINT, "SIGINT")] {
            if let Err(e) = signal_hook::flag::register(signal, self.stop.as_atomic()) {
                eprintln!("[FSY-SIGNAL] failed to register {name}: {e}");
            }
        }

        #[cfg(unix)]
        {
            use signal_hook::consts::{SIGHUP, SIGUSR1};
            if let Err(e) = signal_hook::flag::register(SIGHUP, Arc::clone(&self.reload_flag)) {
                eprintln!("[FSY-SIGNAL] failed to register SIGHUP: {e}");
            }
            if let Err(e) = signal_hook::flag::register(SIGUSR1, Arc::clone(&self.sync_flag)) {
                eprintln!("[FSY-SIGNAL] failed to register SIGUSR1: {e}");
            }
        }
    }
}

// ──────────────────── shutdown coordinator ────────────────────

/// Runs named shutdown steps in order within an overall time limit.
pub struct ShutdownCoordinator {
    pub timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }

    /// Execute the shutdown steps. Returns `true` if every step succeeded
    /// within the timeout.
    pub fn execute(&self, shutdown_tasks: &mut [(&str, &mut dyn FnMut() -> bool)]) -> bool {
        let start = Instant::now();
        let mut all_ok = true;

        for (name, task) in shutdown_tasks.iter_mut() {
            if start.elapsed() > self.timeout {
                eprintln!("[FSY-SHUTDOWN] timeout reached, abandoning remaining tasks");
                return false;
            }

            if task() {
                eprintln!("[FSY-SHUTDOWN] {name}: ok");
            } else {
                eprintln!("[FSY-SHUTDOWN] {name}: failed");
                all_ok = false;
            }
        }

        all_ok
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

// ──────────────────── systemd notifications ────────────────────

/// Systemd watchdog heartbeat tracker.
pub struct WatchdogHeartbeat {
    /// Interval between heartbeats (half of WatchdogSec).
    interval: Duration,
    last_beat: Instant,
    enabled: bool,
}

impl WatchdogHeartbeat {
    /// Heartbeat for a full watchdog timeout of `watchdog`.
    pub fn new(watchdog: Duration) -> Self {
        Self {
            interval: watchdog / 2,
            last_beat: Instant::now(),
            enabled: !watchdog.is_zero(),
        }
    }

    /// Heartbeat configured from `WATCHDOG_USEC`, disabled when unset.
    pub fn from_env() -> Self {
        std::env::var("WATCHDOG_USEC")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or_else(Self::disabled, |usec| Self::new(Duration::from_micros(usec)))
    }

    pub fn disabled() -> Self {
        Self {
            interval: Duration::from_secs(30),
            last_beat: Instant::now(),
            enabled: false,
        }
    }

    /// Send `WATCHDOG=1` if the interval has elapsed. Returns `true` if sent.
    pub fn maybe_notify(&mut self, status: &str) -> bool {
        if !self.enabled || self.last_beat.elapsed() < self.interval {
            return false;
        }
        self.last_beat = Instant::now();
        sd_notify(&format!("WATCHDOG=1\nSTATUS={status}\n"));
        true
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Longest the scheduler may sleep without missing a heartbeat.
    pub fn max_sleep(&self) -> Option<Duration> {
        self.enabled.then_some(self.interval)
    }
}

pub fn notify_ready(status: &str) {
    sd_notify(&format!("READY=1\nSTATUS={status}\n"));
}

pub fn notify_stopping() {
    sd_notify("STOPPING=1\n");
}

pub fn notify_status(status: &str) {
    sd_notify(&format!("STATUS={status}\n"));
}

/// Send a raw message to `$NOTIFY_SOCKET`. No-op when the variable is unset.
fn sd_notify(message: &str) {
    #[cfg(target_os = "linux")]
    {
        sd_notify_linux(message);
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = message;
    }
}

#[cfg(target_os = "linux")]
fn sd_notify_linux(message: &str) {
    use std::os::unix::net::UnixDatagram;

    let socket_path = match std::env::var("NOTIFY_SOCKET") {
        Ok(p) if !p.is_empty() => p,
        _ => return,
    };
    // Abstract sockets ("@name") are not reachable through a path.
    if socket_path.starts_with('@') {
        return;
    }
    let Ok(sock) = UnixDatagram::unbound() else {
        return;
    };
    let _ = sock.send_to(message.as_bytes(), &socket_path);
}

// ──────────────────── tests ────────────────────
