//! Activity logging coordinator.
//!
//! A dedicated logger thread owns the [`JsonlWriter`]. Every other thread sends
//! [`ActivityEvent`]s through a bounded crossbeam channel with `try_send`, so a
//! sync pass is never blocked by logging back-pressure.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{FontSyncError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

/// Default bounded channel capacity for log events.
const CHANNEL_CAPACITY: usize = 1024;

/// Events emitted by the daemon and the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityEvent {
    DaemonStarted {
        version: String,
        config_hash: String,
        registrar: String,
    },
    DaemonStopped {
        reason: String,
        uptime_secs: u64,
    },
    SyncStarted {
        remote_entries: usize,
    },
    SyncCompleted {
        summary: String,
        failed: usize,
        duration_ms: u64,
    },
    SyncFailed {
        code: String,
        message: String,
    },
    FontAdded {
        path: String,
        refs: u32,
    },
    FontUpdated {
        path: String,
        refs: u32,
    },
    FontEvicted {
        path: String,
        released: u32,
    },
    EvictionDeferred {
        path: String,
        error_code: String,
        error_message: String,
    },
    DownloadRetry {
        path: String,
        remote: String,
        attempt: u32,
        max_attempts: u32,
        error: String,
    },
    DownloadAbandoned {
        path: String,
        remote: String,
        attempts: u32,
        error: String,
    },
    RegistrationFailed {
        path: String,
        details: String,
    },
    ConfigReloaded {
        details: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel asking the logger thread to flush and exit.
    Shutdown,
}

impl ActivityEvent {
    /// Severity the event is recorded at.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::DownloadRetry { .. }
            | Self::EvictionDeferred { .. }
            | Self::RegistrationFailed { .. } => Severity::Warning,
            Self::DownloadAbandoned { .. } | Self::SyncFailed { .. } | Self::Error { .. } => {
                Severity::Error
            }
            _ => Severity::Info,
        }
    }
}

/// Cheaply cloneable, non-blocking handle for sending log events.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Send an event to the logger thread without blocking.
    ///
    /// A full channel drops the event and bumps the dropped-events counter.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
        // Disconnected is fine during shutdown.
    }

    /// Number of events dropped due to channel back-pressure.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }

    /// Handle whose events go to the returned receiver instead of a logger thread.
    #[must_use]
    pub fn capture(capacity: usize) -> (Self, Receiver<ActivityEvent>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx,
                dropped_events: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Handle that discards every event.
    #[must_use]
    pub fn disabled() -> Self {
        let (handle, _rx) = Self::capture(1);
        handle
    }
}

/// Options for the logger thread.
pub struct ActivityLoggerConfig {
    pub jsonl_config: JsonlConfig,
    /// Echo warnings and errors to stderr as well.
    pub mirror_to_stderr: bool,
    pub channel_capacity: usize,
}

impl Default for ActivityLoggerConfig {
    fn default() -> Self {
        Self {
            jsonl_config: JsonlConfig::default(),
            mirror_to_stderr: true,
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

/// Spawn the logger thread and return a handle.
///
/// The thread runs until `handle.shutdown()` is called or all senders are dropped.
pub fn spawn_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("fontsync-logger".to_string())
        .spawn(move || {
            logger_thread_main(
                &rx,
                config.jsonl_config,
                config.mirror_to_stderr,
                &dropped_clone,
            );
        })
        .map_err(|e| FontSyncError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(
    rx: &Receiver<ActivityEvent>,
    jsonl_config: JsonlConfig,
    mirror_to_stderr: bool,
    dropped: &AtomicU64,
) {
    let mut jsonl = JsonlWriter::open(jsonl_config);
    let mut writes_since_recover: u32 = 0;

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            jsonl.flush();
            jsonl.fsync();
            break;
        }

        let entry = event_to_log_entry(&event);
        if mirror_to_stderr && entry.severity != Severity::Info {
            eprintln!("{}", human_line(&entry));
        }
        jsonl.write_entry(&entry);
        jsonl.flush();

        writes_since_recover += 1;
        if writes_since_recover >= 100 {
            jsonl.try_recover();
            writes_since_recover = 0;
        }
    }
}

fn human_line(entry: &LogEntry) -> String {
    let level = match entry.severity {
        Severity::Info => "INFO",
        Severity::Warning => "WARN",
        Severity::Error => "ERROR",
    };
    let message = entry
        .details
        .as_deref()
        .or(entry.error_message.as_deref())
        .unwrap_or("");
    format!("[FSY-{level}] {message}")
}

/// Convert an event into its JSONL record.
#[allow(clippy::too_many_lines)]
pub fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    let severity = event.severity();
    match event {
        ActivityEvent::DaemonStarted {
            version,
            config_hash,
            registrar,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStart, severity);
            e.details = Some(format!(
                "version={version} config_hash={config_hash} registrar={registrar}"
            ));
            e.ok = Some(true);
            e
        }
        ActivityEvent::DaemonStopped {
            reason,
            uptime_secs,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStop, severity);
            e.details = Some(format!("reason={reason} uptime={uptime_secs}s"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::SyncStarted { remote_entries } => {
            let mut e = LogEntry::new(EventType::SyncStart, severity);
            e.details = Some(format!("remote_entries={remote_entries}"));
            e
        }
        ActivityEvent::SyncCompleted {
            summary,
            failed,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::SyncComplete, severity);
            e.details = Some(summary.clone());
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(*failed == 0);
            e
        }
        ActivityEvent::SyncFailed { code, message } => {
            let mut e = LogEntry::new(EventType::SyncFailed, severity);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.details = Some(format!("font synchronization failed: {message}"));
            e.ok = Some(false);
            e
        }
        ActivityEvent::FontAdded { path, refs } => {
            let mut e = LogEntry::new(EventType::FontAdded, severity);
            e.path = Some(path.clone());
            e.refs = Some(*refs);
            e.ok = Some(true);
            e
        }
        ActivityEvent::FontUpdated { path, refs } => {
            let mut e = LogEntry::new(EventType::FontUpdated, severity);
            e.path = Some(path.clone());
            e.refs = Some(*refs);
            e.ok = Some(true);
            e
        }
        ActivityEvent::FontEvicted { path, released } => {
            let mut e = LogEntry::new(EventType::FontEvicted, severity);
            e.path = Some(path.clone());
            e.refs = Some(*released);
            e.ok = Some(true);
            e
        }
        ActivityEvent::EvictionDeferred {
            path,
            error_code,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::EvictionDeferred, severity);
            e.path = Some(path.clone());
            e.error_code = Some(error_code.clone());
            e.error_message = Some(error_message.clone());
            e.details = Some(format!("cannot delete orphan {path}, retrying next pass"));
            e.ok = Some(false);
            e
        }
        ActivityEvent::DownloadRetry {
            path,
            remote,
            attempt,
            max_attempts,
            error,
        } => {
            let mut e = LogEntry::new(EventType::DownloadRetry, severity);
            e.path = Some(path.clone());
            e.remote = Some(remote.clone());
            e.attempt = Some(*attempt);
            e.max_attempts = Some(*max_attempts);
            e.error_message = Some(error.clone());
            e.details = Some(format!(
                "error updating {path} from {remote}: {error} attempt {attempt} of {max_attempts}"
            ));
            e.ok = Some(false);
            e
        }
        ActivityEvent::DownloadAbandoned {
            path,
            remote,
            attempts,
            error,
        } => {
            let mut e = LogEntry::new(EventType::DownloadAbandoned, severity);
            e.path = Some(path.clone());
            e.remote = Some(remote.clone());
            e.attempt = Some(*attempts);
            e.error_message = Some(error.clone());
            e.details = Some(format!(
                "error updating {path} from {remote}: {error} aborting"
            ));
            e.ok = Some(false);
            e
        }
        ActivityEvent::RegistrationFailed { path, details } => {
            let mut e = LogEntry::new(EventType::RegistrationFailed, severity);
            e.path = Some(path.clone());
            e.error_code = Some("FSY-2301".to_string());
            e.error_message = Some(details.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::ConfigReloaded { details } => {
            let mut e = LogEntry::new(EventType::ConfigReload, severity);
            e.details = Some(details.clone());
            e.ok = Some(true);
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, severity);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::DaemonStop, severity),
    }
}
