//! Daemon main loop: poll the remote index, run sync passes, react to signals.
//!
//! Single worker thread plus the logger thread. The first pass runs right
//! away; afterwards the next pass is due after `poll_interval`, or after the
//! shorter `sync_retry_delay` when the previous pass failed (fetch error or a
//! fatal engine error). Idle time is spent in short slices so that stop,
//! reload and sync-now requests are noticed promptly.

#![allow(missing_docs)]

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crate::core::cancel::{STOP_POLL_SLICE, StopSignal};
use crate::core::config::{Config, SyncConfig};
use crate::core::errors::{FontSyncError, Result};
use crate::daemon::signals::{
    ShutdownCoordinator, SignalHandler, WatchdogHeartbeat, notify_ready, notify_status,
    notify_stopping,
};
use crate::logger::activity::{
    ActivityEvent, ActivityLoggerConfig, ActivityLoggerHandle, spawn_logger,
};
use crate::logger::jsonl::JsonlConfig;
use crate::platform::pal::detect_registrar;
use crate::remote::client::RemoteIndexSource;
use crate::sync::engine::{LOCK_FILE_NAME, SyncEngine, SyncSettings};

// ──────────────────── arguments ────────────────────

#[derive(Debug, Clone, Default)]
pub struct DaemonArgs {
    /// Serve index and fonts from a local directory instead of the server.
    pub mirror: Option<PathBuf>,
    /// Exit after this many passes.
    pub max_passes: Option<u64>,
}

// ──────────────────── poll schedule ────────────────────

/// When the next sync pass is due.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    poll_interval: Duration,
    retry_delay: Duration,
    next_due: Instant,
    consecutive_failures: u32,
}

impl PollSchedule {
    /// Schedule whose first pass is due at `now`.
    #[must_use]
    pub fn new(poll_interval: Duration, retry_delay: Duration, now: Instant) -> Self {
        Self {
            poll_interval,
            retry_delay,
            next_due: now,
            consecutive_failures: 0,
        }
    }

    #[must_use]
    pub fn from_config(sync: &SyncConfig, now: Instant) -> Self {
        Self::new(sync.poll_interval(), sync.sync_retry_delay(), now)
    }

    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_due
    }

    #[must_use]
    pub fn time_until(&self, now: Instant) -> Duration {
        self.next_due.saturating_duration_since(now)
    }

    pub fn record_success(&mut self, now: Instant) {
        self.consecutive_failures = 0;
        self.next_due = now + self.poll_interval;
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.next_due = now + self.retry_delay;
    }

    pub fn force_now(&mut self, now: Instant) {
        self.next_due = now;
    }

    /// New intervals; a pending pass moves earlier if the new interval is shorter.
    pub fn reconfigure(&mut self, poll_interval: Duration, retry_delay: Duration, now: Instant) {
        let limit = if self.consecutive_failures > 0 {
            retry_delay
        } else {
            poll_interval
        };
        self.poll_interval = poll_interval;
        self.retry_delay = retry_delay;
        self.next_due = self.next_due.min(now + limit);
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

// ──────────────────── directory lock ────────────────────

/// Exclusive advisory lock on the managed directory, released on drop.
pub struct DirectoryLock {
    path: PathBuf,
    #[cfg(unix)]
    _lock: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

impl DirectoryLock {
    /// Lock `<font_dir>/.fontsync.lock`, failing if another agent holds it.
    pub fn acquire(font_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(font_dir).map_err(|e| FontSyncError::directory(font_dir, e))?;
        let path = font_dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| FontSyncError::io(&path, e))?;

        #[cfg(unix)]
        {
            use nix::fcntl::{Flock, FlockArg};
            use std::io::Write as _;

            let mut lock = Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(
                |(_, errno)| FontSyncError::Runtime {
                    details: format!(
                        "{} is held by another fontsync agent ({errno})",
                        path.display()
                    ),
                },
            )?;
            // Owner pid for operators; the lock itself is what matters.
            if lock.set_len(0).is_ok() {
                let _ = writeln!(lock, "{}", std::process::id());
            }
            Ok(Self { path, _lock: lock })
        }
        #[cfg(not(unix))]
        {
            Ok(Self { path, _file: file })
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ──────────────────── daemon ────────────────────

/// Everything the loop drives, built by [`SyncDaemon::init`] or by tests.
pub struct DaemonParts {
    pub engine: SyncEngine,
    pub source: Box<dyn RemoteIndexSource>,
    pub signal_handler: SignalHandler,
    pub logger_handle: ActivityLoggerHandle,
    pub logger_join: Option<thread::JoinHandle<()>>,
    pub lock: Option<DirectoryLock>,
}

/// Outcome of the last pass, for status lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Synced(String),
    Failed(String),
}

pub struct SyncDaemon {
    config: Config,
    args: DaemonArgs,
    engine: SyncEngine,
    source: Box<dyn RemoteIndexSource>,
    signal_handler: SignalHandler,
    logger_handle: ActivityLoggerHandle,
    logger_join: Option<thread::JoinHandle<()>>,
    lock: Option<DirectoryLock>,
    watchdog: WatchdogHeartbeat,
    schedule: PollSchedule,
    start_time: Instant,
    passes: u64,
    last_outcome: Option<PassOutcome>,
}

impl SyncDaemon {
    /// Lock the managed directory, start logging and signal handling, and
    /// open the engine (which restores registrations from the index).
    pub fn init(config: Config, args: DaemonArgs) -> Result<Self> {
        let lock = DirectoryLock::acquire(&config.paths.font_dir)?;

        let logger_config = ActivityLoggerConfig {
            jsonl_config: JsonlConfig {
                path: config.paths.jsonl_log.clone(),
                ..JsonlConfig::default()
            },
            ..ActivityLoggerConfig::default()
        };
        let (logger_handle, logger_join) = spawn_logger(logger_config)?;

        let stop = StopSignal::new();
        let signal_handler = SignalHandler::new(stop.clone());
        let registrar = detect_registrar(&config.paths.font_dir)?;
        let (source, downloader) = crate::remote::connect(&config, args.mirror.as_deref())?;
        let engine = SyncEngine::from_config(
            &config,
            registrar,
            downloader,
            stop,
            logger_handle.clone(),
        )?;

        Ok(Self::assemble(
            config,
            args,
            DaemonParts {
                engine,
                source,
                signal_handler,
                logger_handle,
                logger_join: Some(logger_join),
                lock: Some(lock),
            },
        ))
    }

    #[must_use]
    pub fn assemble(config: Config, args: DaemonArgs, parts: DaemonParts) -> Self {
        let schedule = PollSchedule::from_config(&config.sync, Instant::now());
        Self {
            config,
            args,
            engine: parts.engine,
            source: parts.source,
            signal_handler: parts.signal_handler,
            logger_handle: parts.logger_handle,
            logger_join: parts.logger_join,
            lock: parts.lock,
            watchdog: WatchdogHeartbeat::from_env(),
            schedule,
            start_time: Instant::now(),
            passes: 0,
            last_outcome: None,
        }
    }

    #[must_use]
    pub fn signal_handler(&self) -> &SignalHandler {
        &self.signal_handler
    }

    #[must_use]
    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    #[must_use]
    pub fn passes(&self) -> u64 {
        self.passes
    }

    #[must_use]
    pub fn last_outcome(&self) -> Option<&PassOutcome> {
        self.last_outcome.as_ref()
    }

    /// Run until a stop is requested (or `max_passes` is reached), then
    /// release every registration.
    pub fn run(&mut self) -> Result<()> {
        let config_hash = self.config.stable_hash().unwrap_or_default();
        self.logger_handle.send(ActivityEvent::DaemonStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash,
            registrar: self.engine.registrar_name().to_string(),
        });
        eprintln!(
            "[FSY-DAEMON] started: index={} font_dir={} registrar={}",
            self.source.describe(),
            self.engine.settings().font_dir.display(),
            self.engine.registrar_name()
        );
        notify_ready("fontsync: waiting for first sync");

        while !self.signal_handler.should_shutdown() {
            if self.signal_handler.should_reload() {
                self.handle_config_reload();
            }
            if self.signal_handler.should_sync() {
                eprintln!("[FSY-DAEMON] immediate sync requested (SIGUSR1)");
                self.schedule.force_now(Instant::now());
            }
            let status = self.status_line();
            self.watchdog.maybe_notify(&status);

            let now = Instant::now();
            if !self.schedule.is_due(now) {
                self.idle(self.schedule.time_until(now));
                continue;
            }

            let ok = self.run_pass();
            self.passes += 1;
            if ok {
                self.schedule.record_success(Instant::now());
            } else {
                self.schedule.record_failure(Instant::now());
            }
            notify_status(&self.status_line());
            if self.args.max_passes.is_some_and(|max| self.passes >= max) {
                break;
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Fetch the remote index and synchronize. Returns `false` when the next
    /// attempt should use the retry delay.
    pub fn run_pass(&mut self) -> bool {
        let remote = match self.source.fetch() {
            Ok(remote) => remote,
            Err(e) => {
                eprintln!(
                    "[FSY-DAEMON] cannot fetch remote index from {}: {e}",
                    self.source.describe()
                );
                self.record_failure(&e);
                return false;
            }
        };
        match self.engine.synchronize(&remote) {
            Ok(report) => {
                if report.changed_anything() || report.failed() > 0 {
                    eprintln!("[FSY-DAEMON] sync: {report}");
                }
                self.last_outcome = Some(PassOutcome::Synced(report.to_string()));
                true
            }
            Err(e) => {
                eprintln!("[FSY-DAEMON] sync pass failed: {e}");
                self.record_failure(&e);
                false
            }
        }
    }

    fn record_failure(&mut self, e: &FontSyncError) {
        self.logger_handle.send(ActivityEvent::SyncFailed {
            code: e.code().to_string(),
            message: e.to_string(),
        });
        self.last_outcome = Some(PassOutcome::Failed(e.to_string()));
    }

    fn status_line(&self) -> String {
        match &self.last_outcome {
            None => "fontsync: starting".to_string(),
            Some(PassOutcome::Synced(summary)) => format!("fontsync: {summary}"),
            Some(PassOutcome::Failed(error)) => format!(
                "fontsync: last pass failed ({} in a row): {error}",
                self.schedule.consecutive_failures()
            ),
        }
    }

    /// Sleep up to `duration`, returning early when a signal needs handling.
    fn idle(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        let slice = self
            .watchdog
            .max_sleep()
            .map_or(STOP_POLL_SLICE, |w| w.min(STOP_POLL_SLICE));
        while !self.signal_handler.has_pending() {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep((deadline - now).min(slice));
            self.watchdog.maybe_notify("fontsync: idle");
        }
    }

    fn handle_config_reload(&mut self) {
        eprintln!("[FSY-DAEMON] config reload requested (SIGHUP)");

        let new_config = match Config::load(Some(&self.config.paths.config_file)) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("[FSY-DAEMON] config reload failed: {e}");
                self.logger_handle.send(ActivityEvent::Error {
                    code: e.code().to_string(),
                    message: format!("config reload failed: {e}"),
                });
                return;
            }
        };

        let old_hash = self.config.stable_hash().unwrap_or_default();
        let new_hash = new_config.stable_hash().unwrap_or_default();
        if old_hash == new_hash {
            eprintln!("[FSY-DAEMON] config unchanged, skipping reload");
            return;
        }

        if let Some(details) = restart_required(&self.config, &new_config) {
            eprintln!("[FSY-DAEMON] config reload rejected: {details}");
            self.logger_handle.send(ActivityEvent::Error {
                code: "FSY-1001".to_string(),
                message: format!("config reload rejected: {details}"),
            });
            return;
        }

        let connected = crate::remote::connect(&new_config, self.args.mirror.as_deref());
        let applied = connected.and_then(|remote| {
            self.engine
                .update_settings(SyncSettings::from_config(&new_config))
                .map(|()| remote)
        });
        let (source, downloader) = match applied {
            Ok(remote) => remote,
            Err(e) => {
                eprintln!("[FSY-DAEMON] config reload rejected: {e}");
                self.logger_handle.send(ActivityEvent::Error {
                    code: e.code().to_string(),
                    message: format!("config reload rejected: {e}"),
                });
                return;
            }
        };
        self.source = source;
        self.engine.set_downloader(downloader);
        self.schedule.reconfigure(
            new_config.sync.poll_interval(),
            new_config.sync.sync_retry_delay(),
            Instant::now(),
        );

        self.logger_handle.send(ActivityEvent::ConfigReloaded {
            details: format!("config hash: {old_hash} -> {new_hash}"),
        });
        self.config = new_config;
        eprintln!("[FSY-DAEMON] config reloaded successfully");
    }

    fn shutdown(&mut self) {
        notify_stopping();
        let uptime_secs = self.start_time.elapsed().as_secs();
        let reason = if self.signal_handler.should_shutdown() {
            "stop requested"
        } else {
            "pass limit reached"
        };

        let engine = &mut self.engine;
        let logger = &self.logger_handle;
        let logger_join = &mut self.logger_join;
        let lock = &mut self.lock;

        let mut release_fonts = || {
            let released = engine.release_all();
            eprintln!("[FSY-DAEMON] released {released} font registration(s)");
            true
        };
        let mut release_lock = || {
            drop(lock.take());
            true
        };
        let mut stop_logger = || {
            logger.send(ActivityEvent::DaemonStopped {
                reason: reason.to_string(),
                uptime_secs,
            });
            logger.shutdown();
            logger_join.take().is_none_or(|join| join.join().is_ok())
        };
        let mut tasks: Vec<(&str, &mut dyn FnMut() -> bool)> = vec![
            ("release fonts", &mut release_fonts),
            ("release directory lock", &mut release_lock),
            ("stop logger", &mut stop_logger),
        ];
        ShutdownCoordinator::new().execute(&mut tasks);

        eprintln!("[FSY-DAEMON] shutdown complete (uptime={uptime_secs}s)");
    }
}

/// Paths the running daemon has already opened or locked. Changing any of
/// them needs a restart.
fn restart_required(old: &Config, new: &Config) -> Option<String> {
    let fixed = [
        ("paths.font_dir", &old.paths.font_dir, &new.paths.font_dir),
        ("paths.index_file", &old.paths.index_file, &new.paths.index_file),
        ("paths.jsonl_log", &old.paths.jsonl_log, &new.paths.jsonl_log),
    ];
    let changed: Vec<String> = fixed
        .iter()
        .filter(|(_, before, after)| before != after)
        .map(|(name, before, after)| {
            format!("{name} changed from {} to {}", before.display(), after.display())
        })
        .collect();
    if changed.is_empty() {
        None
    } else {
        Some(format!("{}; restart required", changed.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use super::*;
    use crate::fonts::hasher::ContentHasher;
    use crate::fonts::index::{IndexStore, PersistentIndex};
    use crate::platform::pal::CountingRegistrar;
    use crate::remote::client::MirrorIndexSource;
    use crate::remote::download::MirrorDownloader;

    #[test]
    fn first_pass_is_due_immediately() {
        let now = Instant::now();
        let schedule = PollSchedule::new(Duration::from_secs(60), Duration::from_secs(10), now);
        assert!(schedule.is_due(now));
        assert_eq!(schedule.time_until(now), Duration::ZERO);
    }

    #[test]
    fn failure_uses_retry_delay_and_success_resets() {
        let now = Instant::now();
        let mut schedule =
            PollSchedule::new(Duration::from_secs(60), Duration::from_secs(10), now);
        schedule.record_failure(now);
        assert_eq!(schedule.time_until(now), Duration::from_secs(10));
        assert_eq!(schedule.consecutive_failures(), 1);
        assert!(schedule.is_due(now + Duration::from_secs(10)));

        schedule.record_success(now);
        assert_eq!(schedule.time_until(now), Duration::from_secs(60));
        assert_eq!(schedule.consecutive_failures(), 0);

        schedule.force_now(now);
        assert!(schedule.is_due(now));
    }

    #[test]
    fn reconfigure_pulls_next_pass_earlier() {
        let now = Instant::now();
        let mut schedule =
            PollSchedule::new(Duration::from_secs(600), Duration::from_secs(10), now);
        schedule.record_success(now);
        schedule.reconfigure(Duration::from_secs(30), Duration::from_secs(5), now);
        assert_eq!(schedule.time_until(now), Duration::from_secs(30));
    }

    #[cfg(unix)]
    #[test]
    fn directory_lock_is_exclusive() {
        let tmp = tempfile::tempdir().unwrap();
        let first = DirectoryLock::acquire(tmp.path()).unwrap();
        assert!(first.path().ends_with(LOCK_FILE_NAME));
        let err = DirectoryLock::acquire(tmp.path()).err().unwrap();
        assert_eq!(err.code(), "FSY-3900");
        drop(first);
        assert!(DirectoryLock::acquire(tmp.path()).is_ok());
    }

    #[test]
    fn bounded_run_syncs_then_releases_registrations() {
        let tmp = tempfile::tempdir().unwrap();
        let mirror = tmp.path().join("mirror");
        fs::create_dir_all(&mirror).unwrap();
        fs::write(mirror.join("A.ttf"), b"aaa").unwrap();
        let index_doc = serde_json::json!([{
            "name": "A", "category": "sans", "type": "truetype",
            "remote_file": "A.ttf", "md5": ContentHasher::hash_bytes(b"aaa"),
        }]);
        fs::write(mirror.join("update.php"), index_doc.to_string()).unwrap();

        let mut config = Config::default();
        config.paths.font_dir = tmp.path().join("fonts");
        config.paths.index_file = tmp.path().join("index.json");

        let registrar = Arc::new(CountingRegistrar::new());
        let stop = StopSignal::new();
        let engine = SyncEngine::from_config(
            &config,
            registrar.clone(),
            Box::new(MirrorDownloader::new(&mirror)),
            stop.clone(),
            ActivityLoggerHandle::disabled(),
        )
        .unwrap();
        let parts = DaemonParts {
            engine,
            source: Box::new(MirrorIndexSource::new(&mirror, &config.server.resource)),
            signal_handler: SignalHandler::detached(stop),
            logger_handle: ActivityLoggerHandle::disabled(),
            logger_join: None,
            lock: None,
        };
        let font = config.paths.font_dir.join("A.ttf");
        let index = config.paths.index_file.clone();
        let mut daemon = SyncDaemon::assemble(
            config,
            DaemonArgs {
                mirror: None,
                max_passes: Some(1),
            },
            parts,
        );

        daemon.run().unwrap();
        assert_eq!(daemon.passes(), 1);
        assert!(matches!(daemon.last_outcome(), Some(PassOutcome::Synced(_))));
        assert_eq!(fs::read(&font).unwrap(), b"aaa");
        assert_eq!(PersistentIndex::new(&index).load().unwrap().len(), 1);
        // Shutdown drained the registration again.
        assert_eq!(registrar.count(&font), 0);
        assert_eq!(registrar.register_calls(&font), 1);
    }

    #[test]
    fn restart_required_names_every_moved_path() {
        let old = Config::default();
        assert_eq!(restart_required(&old, &old.clone()), None);

        let mut new = old.clone();
        new.sync.poll_interval_ms = 5_000;
        new.server.host = "fonts.example".to_string();
        assert_eq!(restart_required(&old, &new), None);

        new.paths.index_file = PathBuf::from("/elsewhere/index.json");
        new.paths.jsonl_log = PathBuf::from("/elsewhere/activity.jsonl");
        let details = restart_required(&old, &new).unwrap();
        assert!(details.contains("paths.index_file"));
        assert!(details.contains("paths.jsonl_log"));
        assert!(!details.contains("paths.font_dir"));
        assert!(details.ends_with("restart required"));
    }

    fn reload_fixture(tmp: &Path) -> (SyncDaemon, PathBuf, crossbeam_channel::Receiver<ActivityEvent>) {
        let config_file = tmp.join("config.toml");
        let mut config = Config::default();
        config.paths.font_dir = tmp.join("fonts");
        config.paths.index_file = tmp.join("state").join("index.json");
        config.paths.jsonl_log = tmp.join("state").join("activity.jsonl");
        fs::write(&config_file, toml::to_string(&config).unwrap()).unwrap();
        let config = Config::load(Some(&config_file)).unwrap();

        let stop = StopSignal::new();
        let engine = SyncEngine::from_config(
            &config,
            Arc::new(CountingRegistrar::new()),
            Box::new(MirrorDownloader::new(tmp)),
            stop.clone(),
            ActivityLoggerHandle::disabled(),
        )
        .unwrap();
        let (logger, rx) = ActivityLoggerHandle::capture(16);
        let parts = DaemonParts {
            engine,
            source: Box::new(MirrorIndexSource::new(tmp, "update.php")),
            signal_handler: SignalHandler::detached(stop),
            logger_handle: logger,
            logger_join: None,
            lock: None,
        };
        let daemon = SyncDaemon::assemble(config, DaemonArgs::default(), parts);
        (daemon, config_file, rx)
    }

    #[test]
    fn reload_rejects_moved_index_and_log() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut daemon, config_file, rx) = reload_fixture(tmp.path());
        let before = daemon.config.clone();

        let mut edited = before.clone();
        edited.paths.index_file = tmp.path().join("moved").join("index.json");
        edited.paths.jsonl_log = tmp.path().join("moved").join("activity.jsonl");
        fs::write(&config_file, toml::to_string(&edited).unwrap()).unwrap();
        daemon.handle_config_reload();

        assert_eq!(daemon.config, before);
        match rx.try_recv().unwrap() {
            ActivityEvent::Error { code, message } => {
                assert_eq!(code, "FSY-1001");
                assert!(message.contains("paths.index_file"));
                assert!(message.contains("paths.jsonl_log"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn reload_applies_timing_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut daemon, config_file, rx) = reload_fixture(tmp.path());

        let mut edited = daemon.config.clone();
        edited.sync.poll_interval_ms = 30_000;
        edited.sync.max_download_attempts = 5;
        fs::write(&config_file, toml::to_string(&edited).unwrap()).unwrap();
        daemon.handle_config_reload();

        assert_eq!(daemon.config.sync.poll_interval_ms, 30_000);
        assert_eq!(daemon.engine().settings().max_download_attempts, 5);
        assert!(matches!(
            rx.try_recv().unwrap(),
            ActivityEvent::ConfigReloaded { .. }
        ));
    }

    #[test]
    fn fetch_failure_is_recorded_and_retried_sooner() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.paths.font_dir = tmp.path().join("fonts");
        config.paths.index_file = tmp.path().join("index.json");
        let stop = StopSignal::new();
        let engine = SyncEngine::from_config(
            &config,
            Arc::new(CountingRegistrar::new()),
            Box::new(MirrorDownloader::new(tmp.path())),
            stop.clone(),
            ActivityLoggerHandle::disabled(),
        )
        .unwrap();
        let (logger, rx) = ActivityLoggerHandle::capture(16);
        let parts = DaemonParts {
            engine,
            source: Box::new(MirrorIndexSource::new(tmp.path(), "missing.json")),
            signal_handler: SignalHandler::detached(stop),
            logger_handle: logger,
            logger_join: None,
            lock: None,
        };
        let mut daemon = SyncDaemon::assemble(config, DaemonArgs::default(), parts);

        assert!(!daemon.run_pass());
        assert!(matches!(daemon.last_outcome(), Some(PassOutcome::Failed(_))));
        match rx.try_recv().unwrap() {
            ActivityEvent::SyncFailed { code, .. } => assert_eq!(code, "FSY-2202"),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
