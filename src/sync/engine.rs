//! The sync pass: evict orphans, reconcile against the remote index, commit.
//!
//! The engine owns the in-memory managed set and is driven by a single worker.
//! Per-font failures are folded into the [`SyncReport`]; only a managed
//! directory that cannot be created or an index that cannot be committed
//! abort a pass.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::cancel::StopSignal;
use crate::core::config::Config;
use crate::core::errors::{FontSyncError, Result};
use crate::fonts::entry::{FontKey, ManagedEntry, RemoteEntry};
use crate::fonts::hasher::{ContentHasher, digests_match, is_well_formed_digest, normalize_digest};
use crate::fonts::index::{IndexStore, PersistentIndex};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::platform::pal::{self, ResourceRegistrar};
use crate::remote::download::Downloader;
use crate::sync::report::{EntryAction, EntryOutcome, SyncReport};

/// Advisory lock file the daemon keeps inside the managed directory.
pub const LOCK_FILE_NAME: &str = ".fontsync.lock";

/// Knobs the engine needs; everything else about configuration stays outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub font_dir: PathBuf,
    pub max_download_attempts: u32,
    pub download_retry_delay: Duration,
    pub max_drain_iterations: u32,
}

impl SyncSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            font_dir: config.paths.font_dir.clone(),
            max_download_attempts: config.sync.max_download_attempts,
            download_retry_delay: config.sync.download_retry_delay(),
            max_drain_iterations: config.sync.max_drain_iterations,
        }
    }

    /// Settings rooted at `font_dir` with default retry behavior and no delay.
    #[must_use]
    pub fn for_dir(font_dir: impl Into<PathBuf>) -> Self {
        Self {
            font_dir: font_dir.into(),
            max_download_attempts: 3,
            download_retry_delay: Duration::ZERO,
            max_drain_iterations: 64,
        }
    }
}

/// A managed font plus whether its registration is confirmed in this process.
#[derive(Debug, Clone)]
struct TrackedFont {
    entry: ManagedEntry,
    registered: bool,
}

enum LocalState {
    InSync,
    Missing,
    Stale(String),
    Unreadable(FontSyncError),
}

/// A download the next pass would perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedDownload {
    pub key: String,
    pub path: PathBuf,
    pub remote_file: String,
    pub reason: String,
}

/// What [`SyncEngine::synchronize`] would do, computed without side effects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncPlan {
    pub evict: Vec<PathBuf>,
    pub download: Vec<PlannedDownload>,
    pub unchanged: Vec<PathBuf>,
    pub skipped: Vec<EntryOutcome>,
}

impl SyncPlan {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.evict.is_empty() && self.download.is_empty()
    }
}

pub struct SyncEngine {
    settings: SyncSettings,
    registrar: Arc<dyn ResourceRegistrar>,
    downloader: Box<dyn Downloader>,
    index: Box<dyn IndexStore>,
    hasher: ContentHasher,
    stop: StopSignal,
    logger: ActivityLoggerHandle,
    tracked: Vec<TrackedFont>,
}

impl SyncEngine {
    /// Create the managed directory, load the index and register every
    /// surviving entry once.
    ///
    /// An unreadable index is logged and treated as empty; files that are
    /// already correct get adopted again on the first pass.
    pub fn open(
        settings: SyncSettings,
        registrar: Arc<dyn ResourceRegistrar>,
        downloader: Box<dyn Downloader>,
        index: Box<dyn IndexStore>,
        stop: StopSignal,
        logger: ActivityLoggerHandle,
    ) -> Result<Self> {
        ensure_dir(&settings.font_dir)?;
        let loaded = match index.load() {
            Ok(entries) => entries,
            Err(e) => {
                logger.send(ActivityEvent::Error {
                    code: e.code().to_string(),
                    message: format!(
                        "ignoring unreadable index {}: {e}",
                        index.location().display()
                    ),
                });
                Vec::new()
            }
        };
        let mut engine = Self {
            settings,
            registrar,
            downloader,
            index,
            hasher: ContentHasher::default(),
            stop,
            logger,
            tracked: Vec::with_capacity(loaded.len()),
        };
        engine.restore(loaded);
        Ok(engine)
    }

    /// Engine over the configured managed directory and index file.
    pub fn from_config(
        config: &Config,
        registrar: Arc<dyn ResourceRegistrar>,
        downloader: Box<dyn Downloader>,
        stop: StopSignal,
        logger: ActivityLoggerHandle,
    ) -> Result<Self> {
        Self::open(
            SyncSettings::from_config(config),
            registrar,
            downloader,
            Box::new(PersistentIndex::new(&config.paths.index_file)),
            stop,
            logger,
        )
    }

    #[must_use]
    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Adopt new retry and drain knobs. The managed directory cannot move
    /// under a live engine; a different `font_dir` is rejected.
    pub fn update_settings(&mut self, settings: SyncSettings) -> Result<()> {
        if settings.font_dir != self.settings.font_dir {
            return Err(FontSyncError::InvalidConfig {
                details: format!(
                    "font_dir changed from {} to {}; restart required",
                    self.settings.font_dir.display(),
                    settings.font_dir.display()
                ),
            });
        }
        self.settings = settings;
        Ok(())
    }

    pub fn set_downloader(&mut self, downloader: Box<dyn Downloader>) {
        self.downloader = downloader;
    }

    #[must_use]
    pub fn registrar_name(&self) -> &'static str {
        self.registrar.name()
    }

    /// The managed set as it would be committed now.
    #[must_use]
    pub fn managed(&self) -> Vec<ManagedEntry> {
        self.tracked.iter().map(|f| f.entry.clone()).collect()
    }

    /// `Some(confirmed)` for a managed key, `None` if unmanaged.
    #[must_use]
    pub fn is_registered(&self, key: &str) -> Option<bool> {
        self.tracked
            .iter()
            .find(|f| f.entry.key().as_str() == key)
            .map(|f| f.registered)
    }

    fn restore(&mut self, entries: Vec<ManagedEntry>) {
        let mut registered_any = false;
        for entry in entries {
            let registered = self.register_once(&entry.local_file);
            registered_any |= registered;
            self.tracked.push(TrackedFont { entry, registered });
        }
        if registered_any {
            self.registrar.broadcast_change();
        }
    }

    /// Run one full pass against `remote`.
    pub fn synchronize(&mut self, remote: &[RemoteEntry]) -> Result<SyncReport> {
        let started = Instant::now();
        ensure_dir(&self.settings.font_dir)?;
        self.logger.send(ActivityEvent::SyncStarted {
            remote_entries: remote.len(),
        });

        let mut report = SyncReport::default();
        let (selected, skipped) = select(&self.settings.font_dir, remote);
        for outcome in &skipped {
            if let EntryAction::Skipped { reason } = &outcome.action {
                self.logger.send(ActivityEvent::Error {
                    code: "FSY-2202".to_string(),
                    message: format!("skipping remote entry {}: {reason}", outcome.key),
                });
            }
        }
        report.outcomes.extend(skipped);
        let wanted: HashSet<&FontKey> = selected.iter().map(|(key, _)| key).collect();

        // Phase 1: evictions.
        let previous = std::mem::take(&mut self.tracked);
        let mut kept = Vec::with_capacity(previous.len());
        let mut retained_orphans = Vec::new();
        let mut evicted_any = false;
        for font in previous {
            if is_current(&self.settings.font_dir, &font.entry, &wanted) {
                kept.push(font);
                continue;
            }
            evicted_any = true;
            if let Some(retained) = self.evict(font, &mut report) {
                retained_orphans.push(retained);
            }
        }
        if evicted_any {
            self.registrar.broadcast_change();
        }

        // Phase 2: reconciliation, in remote order.
        let mut current = Vec::with_capacity(selected.len() + retained_orphans.len());
        let mut adopted_any = false;
        for (key, entry) in &selected {
            let local_path = self.settings.font_dir.join(key.as_str());
            let previous = kept
                .iter()
                .position(|f: &TrackedFont| f.entry.key() == *key)
                .map(|i| kept.swap_remove(i));
            match assess(&self.hasher, entry, &local_path) {
                LocalState::InSync => {
                    let (font, newly_registered) =
                        self.carry_forward(entry, local_path, previous, &mut report);
                    adopted_any |= newly_registered;
                    current.push(font);
                }
                state => {
                    let fresh = matches!(state, LocalState::Missing);
                    if let LocalState::Unreadable(err) = &state {
                        self.logger.send(ActivityEvent::Error {
                            code: err.code().to_string(),
                            message: format!("treating unreadable font as stale: {err}"),
                        });
                    }
                    if let Some(font) = self.update(key, entry, &local_path, fresh, &mut report) {
                        current.push(font);
                    }
                }
            }
        }
        if adopted_any {
            self.registrar.broadcast_change();
        }

        // Phase 3: commit everything that is still on disk.
        current.extend(retained_orphans);
        self.tracked = current;
        let entries = self.managed();
        self.index.store(&entries)?;

        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.logger.send(ActivityEvent::SyncCompleted {
            summary: report.to_string(),
            failed: report.failed(),
            duration_ms: report.duration_ms,
        });
        Ok(report)
    }

    /// Evictions and downloads the next pass would perform. Touches nothing.
    #[must_use]
    pub fn plan(&self, remote: &[RemoteEntry]) -> SyncPlan {
        build_plan(
            &self.settings.font_dir,
            &self.hasher,
            self.tracked.iter().map(|f| &f.entry),
            remote,
        )
    }

    /// Plan against a committed index without opening an engine: no
    /// directory is created and nothing is registered.
    pub fn plan_from_index(
        settings: &SyncSettings,
        index: &dyn IndexStore,
        remote: &[RemoteEntry],
    ) -> Result<SyncPlan> {
        let managed = index.load()?;
        Ok(build_plan(
            &settings.font_dir,
            &ContentHasher::default(),
            managed.iter(),
            remote,
        ))
    }

    /// One pass followed by releasing every registration, for callers that
    /// exit right after. Registrations are released even when the pass fails.
    pub fn run_once(&mut self, remote: &[RemoteEntry]) -> Result<SyncReport> {
        let result = self.synchronize(remote);
        self.release_all();
        result
    }

    /// Drain every registration the engine holds. Returns the number of
    /// successful unregister calls.
    pub fn release_all(&mut self) -> u32 {
        let paths: Vec<PathBuf> = self
            .tracked
            .iter()
            .map(|f| f.entry.local_file.clone())
            .collect();
        let released: u32 = paths.iter().map(|p| self.drain(p)).sum();
        for font in &mut self.tracked {
            font.registered = false;
        }
        if released > 0 {
            self.registrar.broadcast_change();
        }
        released
    }

    /// Unregister and delete an orphan. Returns it back when the file stays on disk.
    fn evict(&self, font: TrackedFont, report: &mut SyncReport) -> Option<TrackedFont> {
        let path = font.entry.local_file.clone();
        let key = font.entry.key();
        let released = self.drain(&path);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                let err = FontSyncError::io(&path, e);
                self.logger.send(ActivityEvent::EvictionDeferred {
                    path: path.display().to_string(),
                    error_code: err.code().to_string(),
                    error_message: err.to_string(),
                });
                report.outcomes.push(EntryOutcome::new(
                    key.as_str(),
                    &path,
                    EntryAction::EvictionDeferred {
                        error: err.to_string(),
                    },
                ));
                return Some(TrackedFont {
                    entry: font.entry,
                    registered: false,
                });
            }
        }
        self.logger.send(ActivityEvent::FontEvicted {
            path: path.display().to_string(),
            released,
        });
        report.outcomes.push(EntryOutcome::new(
            key.as_str(),
            &path,
            EntryAction::Evicted { released },
        ));
        None
    }

    /// Keep an in-sync font. The flag reports a registration made here.
    fn carry_forward(
        &self,
        entry: &RemoteEntry,
        local_path: PathBuf,
        previous: Option<TrackedFont>,
        report: &mut SyncReport,
    ) -> (TrackedFont, bool) {
        let key = entry.key();
        match previous {
            Some(mut font) => {
                if font.entry.metadata_differs(entry) {
                    font.entry.name.clone_from(&entry.name);
                    font.entry.category.clone_from(&entry.category);
                    font.entry.kind.clone_from(&entry.kind);
                }
                // The bytes may have changed outside the engine to what the
                // remote now advertises.
                font.entry.md5 = normalize_digest(&entry.md5);
                let mut newly_registered = false;
                if !font.registered {
                    font.registered = self.register_once(&font.entry.local_file);
                    newly_registered = font.registered;
                }
                report.outcomes.push(EntryOutcome::new(
                    key.as_str(),
                    &local_path,
                    EntryAction::Unchanged,
                ));
                (font, newly_registered)
            }
            None => {
                let registered = self.register_once(&local_path);
                report.outcomes.push(EntryOutcome::new(
                    key.as_str(),
                    &local_path,
                    EntryAction::Adopted,
                ));
                let entry = entry.to_managed(local_path);
                (TrackedFont { entry, registered }, registered)
            }
        }
    }

    /// Drain, download with bounded retries, then restore the drained count.
    fn update(
        &self,
        key: &FontKey,
        entry: &RemoteEntry,
        local_path: &Path,
        fresh: bool,
        report: &mut SyncReport,
    ) -> Option<TrackedFont> {
        let display = local_path.display().to_string();
        let held = self.drain(local_path);
        self.registrar.broadcast_change();

        let max_attempts = self.settings.max_download_attempts.max(1);
        let mut attempts = 0;
        let mut last_error = None;
        let mut interrupted = false;
        let downloaded = loop {
            if self.stop.is_stopped() {
                interrupted = true;
                report.interrupted = true;
                break false;
            }
            attempts += 1;
            report.downloads_attempted += 1;
            match self.downloader.download(&entry.remote_file, local_path) {
                Ok(_) => break true,
                Err(e) => {
                    let message = e.to_string();
                    last_error = Some(message.clone());
                    if attempts >= max_attempts {
                        break false;
                    }
                    self.logger.send(ActivityEvent::DownloadRetry {
                        path: display.clone(),
                        remote: entry.remote_file.clone(),
                        attempt: attempts,
                        max_attempts,
                        error: message,
                    });
                    self.stop.sleep(self.settings.download_retry_delay);
                }
            }
        };

        if !downloaded {
            let error = match (last_error, interrupted) {
                (Some(e), true) => format!("{e}; stop requested"),
                (Some(e), false) => e,
                (None, _) => "stop requested before the first attempt".to_string(),
            };
            self.logger.send(ActivityEvent::DownloadAbandoned {
                path: display,
                remote: entry.remote_file.clone(),
                attempts,
                error: error.clone(),
            });
            report.outcomes.push(EntryOutcome::new(
                key.as_str(),
                local_path,
                EntryAction::Failed { attempts, error },
            ));
            return None;
        }

        let wanted = held.max(1);
        let refs = pal::register_times(self.registrar.as_ref(), local_path, wanted);
        if refs < wanted {
            self.logger.send(ActivityEvent::RegistrationFailed {
                path: display.clone(),
                details: format!("registered {refs} of {wanted} times"),
            });
        }
        self.registrar.broadcast_change();

        let (event, action) = if fresh {
            (
                ActivityEvent::FontAdded {
                    path: display,
                    refs,
                },
                EntryAction::Added { refs },
            )
        } else {
            (
                ActivityEvent::FontUpdated {
                    path: display,
                    refs,
                },
                EntryAction::Updated { refs },
            )
        };
        self.logger.send(event);
        report
            .outcomes
            .push(EntryOutcome::new(key.as_str(), local_path, action));
        Some(TrackedFont {
            entry: entry.to_managed(local_path.to_path_buf()),
            registered: refs > 0,
        })
    }

    fn register_once(&self, path: &Path) -> bool {
        let ok = self.registrar.register(path);
        if !ok {
            self.logger.send(ActivityEvent::RegistrationFailed {
                path: path.display().to_string(),
                details: format!("{} refused registration", self.registrar.name()),
            });
        }
        ok
    }

    fn drain(&self, path: &Path) -> u32 {
        let outcome = pal::drain(
            self.registrar.as_ref(),
            path,
            self.settings.max_drain_iterations,
        );
        if outcome.hit_cap {
            self.logger.send(ActivityEvent::RegistrationFailed {
                path: path.display().to_string(),
                details: format!(
                    "still registered after {} unregister calls",
                    outcome.released
                ),
            });
        }
        outcome.released
    }
}

/// Usable remote entries keyed by basename, first occurrence winning.
fn select<'a>(
    font_dir: &Path,
    remote: &'a [RemoteEntry],
) -> (Vec<(FontKey, &'a RemoteEntry)>, Vec<EntryOutcome>) {
    let mut seen = HashSet::new();
    let mut selected = Vec::with_capacity(remote.len());
    let mut skipped = Vec::new();
    for entry in remote {
        let key = entry.key();
        let reason = if !key.is_valid() {
            Some(format!("unusable file name in {:?}", entry.remote_file))
        } else if is_reserved_name(key.as_str()) {
            Some(format!("reserved file name {key}"))
        } else if seen.contains(&key) {
            Some(format!("duplicate of an earlier entry for {key}"))
        } else if !is_well_formed_digest(&entry.md5) {
            // Could never match a local hash, so it would download every pass.
            Some(format!("malformed md5 {:?}", entry.md5))
        } else {
            None
        };
        match reason {
            Some(reason) => skipped.push(EntryOutcome::new(
                key.as_str(),
                entry.local_path_in(font_dir),
                EntryAction::Skipped { reason },
            )),
            None => {
                seen.insert(key.clone());
                selected.push((key, entry));
            }
        }
    }
    (selected, skipped)
}

/// Whether a managed entry still has a remote counterpart at its expected path.
fn is_current(font_dir: &Path, entry: &ManagedEntry, wanted: &HashSet<&FontKey>) -> bool {
    let key = entry.key();
    wanted.contains(&key) && entry.local_file == font_dir.join(key.as_str())
}

fn assess(hasher: &ContentHasher, entry: &RemoteEntry, local_path: &Path) -> LocalState {
    if !local_path.exists() {
        return LocalState::Missing;
    }
    match hasher.hash(local_path) {
        Ok(digest) if digests_match(&digest, &entry.md5) => LocalState::InSync,
        Ok(digest) => LocalState::Stale(digest),
        Err(e) => LocalState::Unreadable(e),
    }
}

fn build_plan<'m>(
    font_dir: &Path,
    hasher: &ContentHasher,
    managed: impl Iterator<Item = &'m ManagedEntry>,
    remote: &[RemoteEntry],
) -> SyncPlan {
    let (selected, skipped) = select(font_dir, remote);
    let wanted: HashSet<&FontKey> = selected.iter().map(|(key, _)| key).collect();
    let mut plan = SyncPlan {
        evict: managed
            .filter(|entry| !is_current(font_dir, entry, &wanted))
            .map(|entry| entry.local_file.clone())
            .collect(),
        skipped,
        ..SyncPlan::default()
    };
    for (key, entry) in &selected {
        let path = font_dir.join(key.as_str());
        let reason = match assess(hasher, entry, &path) {
            LocalState::InSync => {
                plan.unchanged.push(path);
                continue;
            }
            LocalState::Missing => "missing".to_string(),
            LocalState::Stale(local) => {
                format!("digest mismatch (local {local}, remote {})", entry.md5)
            }
            LocalState::Unreadable(err) => format!("unreadable: {err}"),
        };
        plan.download.push(PlannedDownload {
            key: key.to_string(),
            path,
            remote_file: entry.remote_file.clone(),
            reason,
        });
    }
    plan
}

fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| FontSyncError::directory(path, e))
}

fn is_reserved_name(name: &str) -> bool {
    name == LOCK_FILE_NAME || name.ends_with(".part")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::pal::CountingRegistrar;
    use crate::remote::download::MirrorDownloader;

    struct Fixture {
        _tmp: tempfile::TempDir,
        mirror: PathBuf,
        fonts: PathBuf,
        index: PathBuf,
        registrar: Arc<CountingRegistrar>,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let mirror = tmp.path().join("mirror");
            fs::create_dir_all(&mirror).unwrap();
            Self {
                mirror,
                fonts: tmp.path().join("fonts"),
                index: tmp.path().join("state").join("index.json"),
                registrar: Arc::new(CountingRegistrar::new()),
                _tmp: tmp,
            }
        }

        fn publish(&self, file: &str, bytes: &[u8]) -> RemoteEntry {
            fs::write(self.mirror.join(file), bytes).unwrap();
            RemoteEntry {
                name: file.to_string(),
                category: "test".to_string(),
                kind: "truetype".to_string(),
                remote_file: file.to_string(),
                md5: ContentHasher::hash_bytes(bytes),
            }
        }

        fn engine(&self) -> SyncEngine {
            SyncEngine::open(
                SyncSettings::for_dir(&self.fonts),
                self.registrar.clone(),
                Box::new(MirrorDownloader::new(&self.mirror)),
                Box::new(PersistentIndex::new(&self.index)),
                StopSignal::new(),
                ActivityLoggerHandle::disabled(),
            )
            .unwrap()
        }
    }

    #[test]
    fn first_pass_adds_and_registers() {
        let fx = Fixture::new();
        let remote = vec![fx.publish("A.ttf", b"aaa"), fx.publish("B.otf", b"bbb")];
        let mut engine = fx.engine();

        let report = engine.synchronize(&remote).unwrap();
        assert_eq!(report.added(), 2);
        assert_eq!(fs::read(fx.fonts.join("A.ttf")).unwrap(), b"aaa");
        assert_eq!(fx.registrar.count(&fx.fonts.join("B.otf")), 1);
        assert_eq!(engine.is_registered("A.ttf"), Some(true));
        assert_eq!(PersistentIndex::new(&fx.index).load().unwrap().len(), 2);
    }

    #[test]
    fn reopening_restores_registrations_once() {
        let fx = Fixture::new();
        let remote = vec![fx.publish("A.ttf", b"aaa")];
        let mut engine = fx.engine();
        engine.synchronize(&remote).unwrap();
        assert_eq!(engine.release_all(), 1);
        assert_eq!(fx.registrar.count(&fx.fonts.join("A.ttf")), 0);
        drop(engine);

        let engine = fx.engine();
        assert_eq!(engine.managed().len(), 1);
        assert_eq!(fx.registrar.count(&fx.fonts.join("A.ttf")), 1);
    }

    #[test]
    fn unmanaged_matching_file_is_adopted_without_download() {
        let fx = Fixture::new();
        let remote = vec![fx.publish("A.ttf", b"aaa")];
        fs::create_dir_all(&fx.fonts).unwrap();
        fs::write(fx.fonts.join("A.ttf"), b"aaa").unwrap();
        fs::remove_file(fx.mirror.join("A.ttf")).unwrap();

        let mut engine = fx.engine();
        let report = engine.synchronize(&remote).unwrap();
        assert_eq!(report.downloads_attempted, 0);
        assert_eq!(
            report.outcome("A.ttf").unwrap().action,
            EntryAction::Adopted
        );
        assert_eq!(fx.registrar.count(&fx.fonts.join("A.ttf")), 1);
    }

    #[test]
    fn duplicate_and_reserved_names_are_skipped() {
        let fx = Fixture::new();
        let first = fx.publish("A.ttf", b"aaa");
        let mut dup = first.clone();
        dup.remote_file = "other/A.ttf".to_string();
        let mut lock = first.clone();
        lock.remote_file = LOCK_FILE_NAME.to_string();
        let mut blank = first.clone();
        blank.remote_file = "fonts/".to_string();

        let mut engine = fx.engine();
        let report = engine.synchronize(&[first, dup, lock, blank]).unwrap();
        assert_eq!(report.added(), 1);
        assert_eq!(report.failed(), 3);
        assert_eq!(report.downloads_attempted, 1);
    }

    #[test]
    fn plan_has_no_side_effects() {
        let fx = Fixture::new();
        let a = fx.publish("A.ttf", b"aaa");
        let b = fx.publish("B.ttf", b"bbb");
        let mut engine = fx.engine();
        engine.synchronize(&[a.clone(), b]).unwrap();

        let changed = fx.publish("A.ttf", b"AAA");
        let c = fx.publish("C.ttf", b"ccc");
        let plan = engine.plan(&[changed, c]);
        assert_eq!(plan.evict, vec![fx.fonts.join("B.ttf")]);
        assert_eq!(plan.download.len(), 2);
        assert!(plan.download[0].reason.starts_with("digest mismatch"));
        assert_eq!(plan.download[1].reason, "missing");
        assert!(!plan.is_noop());
        assert!(fx.fonts.join("B.ttf").exists());
        assert_eq!(fs::read(fx.fonts.join("A.ttf")).unwrap(), b"aaa");

        assert_eq!(engine.plan(&[a]).unchanged.len(), 1);
    }

    #[test]
    fn directory_failure_is_fatal() {
        let fx = Fixture::new();
        fs::create_dir_all(fx.fonts.parent().unwrap()).unwrap();
        fs::write(&fx.fonts, b"not a directory").unwrap();
        let err = SyncEngine::open(
            SyncSettings::for_dir(&fx.fonts),
            fx.registrar.clone(),
            Box::new(MirrorDownloader::new(&fx.mirror)),
            Box::new(PersistentIndex::new(&fx.index)),
            StopSignal::new(),
            ActivityLoggerHandle::disabled(),
        )
        .err()
        .unwrap();
        assert_eq!(err.code(), "FSY-2001");
        assert!(err.is_pass_fatal());
    }

    #[test]
    fn corrupt_index_starts_empty() {
        let fx = Fixture::new();
        fs::create_dir_all(fx.index.parent().unwrap()).unwrap();
        fs::write(&fx.index, b"{ not json").unwrap();
        let (logger, rx) = ActivityLoggerHandle::capture(16);
        let engine = SyncEngine::open(
            SyncSettings::for_dir(&fx.fonts),
            fx.registrar.clone(),
            Box::new(MirrorDownloader::new(&fx.mirror)),
            Box::new(PersistentIndex::new(&fx.index)),
            StopSignal::new(),
            logger,
        )
        .unwrap();
        assert!(engine.managed().is_empty());
        assert!(matches!(rx.try_recv().unwrap(), ActivityEvent::Error { .. }));
    }

    #[test]
    fn stop_before_download_abandons_entry() {
        let fx = Fixture::new();
        let remote = vec![fx.publish("A.ttf", b"aaa")];
        let stop = StopSignal::new();
        let mut engine = SyncEngine::open(
            SyncSettings::for_dir(&fx.fonts),
            fx.registrar.clone(),
            Box::new(MirrorDownloader::new(&fx.mirror)),
            Box::new(PersistentIndex::new(&fx.index)),
            stop.clone(),
            ActivityLoggerHandle::disabled(),
        )
        .unwrap();
        stop.request_stop();

        let report = engine.synchronize(&remote).unwrap();
        assert!(report.interrupted);
        assert_eq!(report.downloads_attempted, 0);
        assert!(matches!(
            report.outcome("A.ttf").unwrap().action,
            EntryAction::Failed { attempts: 0, .. }
        ));
        assert!(PersistentIndex::new(&fx.index).load().unwrap().is_empty());
    }

    struct StoppingDownloader(StopSignal);

    impl Downloader for StoppingDownloader {
        fn download(&self, remote_path: &str, _destination: &Path) -> Result<u64> {
            self.0.request_stop();
            Err(FontSyncError::Download {
                url: remote_path.to_string(),
                details: "offline".to_string(),
            })
        }
    }

    #[test]
    fn stop_during_retry_delay_ends_the_wait() {
        let fx = Fixture::new();
        let remote = vec![fx.publish("A.ttf", b"aaa")];
        let stop = StopSignal::new();
        let settings = SyncSettings {
            download_retry_delay: Duration::from_secs(30),
            ..SyncSettings::for_dir(&fx.fonts)
        };
        let mut engine = SyncEngine::open(
            settings,
            fx.registrar.clone(),
            Box::new(StoppingDownloader(stop.clone())),
            Box::new(PersistentIndex::new(&fx.index)),
            stop,
            ActivityLoggerHandle::disabled(),
        )
        .unwrap();

        let started = Instant::now();
        let report = engine.synchronize(&remote).unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(report.interrupted);
        assert_eq!(report.downloads_attempted, 1);
        match &report.outcome("A.ttf").unwrap().action {
            EntryAction::Failed { attempts, error } => {
                assert_eq!(*attempts, 1);
                assert!(error.ends_with("stop requested"));
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn malformed_remote_digest_is_skipped() {
        let fx = Fixture::new();
        let mut bad = fx.publish("A.ttf", b"aaa");
        bad.md5 = "not-a-digest".to_string();

        let mut engine = fx.engine();
        let report = engine.synchronize(&[bad]).unwrap();
        assert_eq!(report.downloads_attempted, 0);
        assert!(matches!(
            &report.outcome("A.ttf").unwrap().action,
            EntryAction::Skipped { reason } if reason.contains("malformed md5")
        ));
        assert!(!fx.fonts.join("A.ttf").exists());
    }

    #[test]
    fn plan_from_index_creates_nothing() {
        let fx = Fixture::new();
        let remote = vec![fx.publish("A.ttf", b"aaa")];
        let plan = SyncEngine::plan_from_index(
            &SyncSettings::for_dir(&fx.fonts),
            &PersistentIndex::new(&fx.index),
            &remote,
        )
        .unwrap();
        assert_eq!(plan.download.len(), 1);
        assert_eq!(plan.download[0].reason, "missing");
        assert!(!fx.fonts.exists());
        assert!(!fx.index.exists());
        assert_eq!(fx.registrar.broadcasts(), 0);
    }

    #[test]
    fn plan_from_index_matches_open_engine() {
        let fx = Fixture::new();
        let a = fx.publish("A.ttf", b"aaa");
        let b = fx.publish("B.ttf", b"bbb");
        let mut engine = fx.engine();
        engine.synchronize(&[a.clone(), b]).unwrap();

        let remote = vec![a, fx.publish("C.ttf", b"ccc")];
        let detached = SyncEngine::plan_from_index(
            &SyncSettings::for_dir(&fx.fonts),
            &PersistentIndex::new(&fx.index),
            &remote,
        )
        .unwrap();
        assert_eq!(detached, engine.plan(&remote));
        assert_eq!(detached.evict, vec![fx.fonts.join("B.ttf")]);
    }

    #[test]
    fn run_once_releases_every_registration() {
        let fx = Fixture::new();
        let remote = vec![fx.publish("A.ttf", b"aaa"), fx.publish("B.ttf", b"bbb")];
        let mut engine = fx.engine();
        engine.synchronize(&remote).unwrap();
        engine.release_all();
        drop(engine);

        // Reopening registers the indexed fonts again.
        let mut engine = fx.engine();
        assert_eq!(fx.registrar.count(&fx.fonts.join("A.ttf")), 1);
        let report = engine.run_once(&remote).unwrap();
        assert_eq!(report.unchanged(), 2);
        assert_eq!(fx.registrar.count(&fx.fonts.join("A.ttf")), 0);
        assert_eq!(fx.registrar.count(&fx.fonts.join("B.ttf")), 0);
        assert_eq!(engine.is_registered("A.ttf"), Some(false));
    }

    #[test]
    fn run_once_releases_even_when_commit_fails() {
        let fx = Fixture::new();
        let remote = vec![fx.publish("A.ttf", b"aaa")];
        // A directory where the index file should go makes the rename fail.
        fs::create_dir_all(fx.index.join("blocker")).unwrap();
        let mut engine = fx.engine();

        let err = engine.run_once(&remote).unwrap_err();
        assert_eq!(err.code(), "FSY-2401");
        assert_eq!(fx.registrar.count(&fx.fonts.join("A.ttf")), 0);
    }

    #[test]
    fn settings_follow_config() {
        let config = Config::default();
        let settings = SyncSettings::from_config(&config);
        assert_eq!(settings.max_download_attempts, 3);
        assert_eq!(settings.max_drain_iterations, 64);
        assert_eq!(settings.font_dir, config.paths.font_dir);
    }
}
