//! Font registration abstraction and its platform implementations.
//!
//! The host may stack several internal references per `register` call, so a
//! single `unregister` never proves a font is released. Callers [`drain`]
//! before deleting or overwriting a registered file.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::core::errors::Result;

/// Registers font files with the host rendering subsystem.
pub trait ResourceRegistrar: Send + Sync {
    /// Add one registration for `path`. `false` means the host refused it.
    fn register(&self, path: &Path) -> bool;
    /// Drop one registration for `path`. `false` means none remained.
    fn unregister(&self, path: &Path) -> bool;
    /// Tell running applications that the installed font set changed.
    fn broadcast_change(&self) {}
    /// Short identifier for logs.
    fn name(&self) -> &'static str;
}

/// Result of draining every registration of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Successful `unregister` calls.
    pub released: u32,
    /// The iteration cap stopped the drain while the host still reported references.
    pub hit_cap: bool,
}

/// Unregister `path` until the host reports nothing left, at most `max_iterations` times.
pub fn drain(registrar: &dyn ResourceRegistrar, path: &Path, max_iterations: u32) -> DrainOutcome {
    let mut released = 0;
    while released < max_iterations {
        if !registrar.unregister(path) {
            return DrainOutcome {
                released,
                hit_cap: false,
            };
        }
        released += 1;
    }
    DrainOutcome {
        released,
        hit_cap: true,
    }
}

/// Register `path` `times` times. Returns how many calls succeeded.
pub fn register_times(registrar: &dyn ResourceRegistrar, path: &Path, times: u32) -> u32 {
    (0..times).fold(0, |ok, _| if registrar.register(path) { ok + 1 } else { ok })
}

// ──────────────────── in-memory reference counting ────────────────────

#[derive(Debug, Default)]
struct CountingState {
    refs: HashMap<PathBuf, u32>,
    register_calls: HashMap<PathBuf, u32>,
    unregister_calls: HashMap<PathBuf, u32>,
    refused: Vec<PathBuf>,
    broadcasts: u32,
}

/// Registrar that only tracks reference counts in memory.
///
/// Used on hosts without a registration API and as the test double for the
/// engine: counts can be pre-seeded and registrations refused per path.
#[derive(Debug)]
pub struct CountingRegistrar {
    state: Mutex<CountingState>,
    refs_per_register: u32,
}

impl Default for CountingRegistrar {
    fn default() -> Self {
        Self::new()
    }
}

impl CountingRegistrar {
    #[must_use]
    pub fn new() -> Self {
        Self::stacking(1)
    }

    /// Each successful `register` adds `refs_per_register` references,
    /// mimicking hosts that stack internal references.
    #[must_use]
    pub fn stacking(refs_per_register: u32) -> Self {
        Self {
            state: Mutex::new(CountingState::default()),
            refs_per_register: refs_per_register.max(1),
        }
    }

    /// Pretend `path` already holds `count` references.
    pub fn seed(&self, path: &Path, count: u32) {
        self.state.lock().refs.insert(path.to_path_buf(), count);
    }

    /// Make every future `register` of `path` fail.
    pub fn refuse(&self, path: &Path) {
        self.state.lock().refused.push(path.to_path_buf());
    }

    /// Stop refusing registrations of `path`.
    pub fn allow(&self, path: &Path) {
        self.state.lock().refused.retain(|p| p != path);
    }

    #[must_use]
    pub fn count(&self, path: &Path) -> u32 {
        self.state.lock().refs.get(path).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn register_calls(&self, path: &Path) -> u32 {
        self.state
            .lock()
            .register_calls
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn unregister_calls(&self, path: &Path) -> u32 {
        self.state
            .lock()
            .unregister_calls
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn broadcasts(&self) -> u32 {
        self.state.lock().broadcasts
    }

    /// Total references held across all paths.
    #[must_use]
    pub fn total_refs(&self) -> u32 {
        self.state.lock().refs.values().sum()
    }

    /// Forget call counters, keeping reference counts.
    pub fn reset_calls(&self) {
        let mut state = self.state.lock();
        state.register_calls.clear();
        state.unregister_calls.clear();
        state.broadcasts = 0;
    }
}

impl ResourceRegistrar for CountingRegistrar {
    fn register(&self, path: &Path) -> bool {
        let mut state = self.state.lock();
        *state.register_calls.entry(path.to_path_buf()).or_insert(0) += 1;
        if state.refused.iter().any(|p| p == path) {
            return false;
        }
        *state.refs.entry(path.to_path_buf()).or_insert(0) += self.refs_per_register;
        true
    }

    fn unregister(&self, path: &Path) -> bool {
        let mut state = self.state.lock();
        *state.unregister_calls.entry(path.to_path_buf()).or_insert(0) += 1;
        let remaining = match state.refs.get_mut(path) {
            Some(n) if *n > 0 => {
                *n -= 1;
                *n
            }
            _ => return false,
        };
        if remaining == 0 {
            state.refs.remove(path);
        }
        true
    }

    fn broadcast_change(&self) {
        self.state.lock().broadcasts += 1;
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// ──────────────────── fontconfig (Linux) ────────────────────

/// Linux registrar: fontconfig discovers fonts by directory, so registration
/// is tracked in memory and a change triggers an `fc-cache` rescan of the
/// managed directory.
#[derive(Debug)]
pub struct FontconfigRegistrar {
    refs: CountingRegistrar,
    font_dir: PathBuf,
    fc_cache: PathBuf,
    dirty: AtomicBool,
}

impl FontconfigRegistrar {
    #[must_use]
    pub fn new(font_dir: &Path) -> Self {
        Self {
            refs: CountingRegistrar::new(),
            font_dir: font_dir.to_path_buf(),
            fc_cache: PathBuf::from("fc-cache"),
            dirty: AtomicBool::new(false),
        }
    }

    /// Use a specific `fc-cache` binary.
    #[must_use]
    pub fn with_fc_cache(mut self, binary: impl Into<PathBuf>) -> Self {
        self.fc_cache = binary.into();
        self
    }

    fn rescan(&self) -> std::io::Result<bool> {
        let status = Command::new(&self.fc_cache)
            .arg("--force")
            .arg(&self.font_dir)
            .status()?;
        Ok(status.success())
    }
}

impl ResourceRegistrar for FontconfigRegistrar {
    fn register(&self, path: &Path) -> bool {
        let ok = path.is_file() && self.refs.register(path);
        if ok {
            self.dirty.store(true, Ordering::Relaxed);
        }
        ok
    }

    fn unregister(&self, path: &Path) -> bool {
        let ok = self.refs.unregister(path);
        if ok {
            self.dirty.store(true, Ordering::Relaxed);
        }
        ok
    }

    fn broadcast_change(&self) {
        // Nothing registered or released since the last rescan.
        if !self.dirty.swap(false, Ordering::Relaxed) {
            return;
        }
        match self.rescan() {
            Ok(true) => {}
            Ok(false) => eprintln!(
                "[FSY-PLATFORM] {} exited with failure for {}",
                self.fc_cache.display(),
                self.font_dir.display()
            ),
            Err(e) => eprintln!(
                "[FSY-PLATFORM] cannot run {}: {e}",
                self.fc_cache.display()
            ),
        }
    }

    fn name(&self) -> &'static str {
        "fontconfig"
    }
}

/// Detect the registrar for this host.
pub fn detect_registrar(font_dir: &Path) -> Result<Arc<dyn ResourceRegistrar>> {
    #[cfg(windows)]
    {
        let _ = font_dir;
        Ok(Arc::new(crate::platform::gdi::GdiRegistrar::new()))
    }
    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(FontconfigRegistrar::new(font_dir)))
    }
    #[cfg(not(any(windows, target_os = "linux")))]
    {
        let _ = font_dir;
        eprintln!("[FSY-PLATFORM] no font registration API on this host; tracking in memory only");
        Ok(Arc::new(CountingRegistrar::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_counts_stacked_references() {
        let reg = CountingRegistrar::new();
        let path = Path::new("/fonts/Arial.ttf");
        reg.seed(path, 3);
        let out = drain(&reg, path, 64);
        assert_eq!(
            out,
            DrainOutcome {
                released: 3,
                hit_cap: false
            }
        );
        assert_eq!(reg.count(path), 0);
        // Three successes plus the call that reported nothing left.
        assert_eq!(reg.unregister_calls(path), 4);
    }

    #[test]
    fn drain_of_unregistered_path_is_zero() {
        let reg = CountingRegistrar::new();
        let out = drain(&reg, Path::new("/fonts/none.ttf"), 64);
        assert_eq!(out.released, 0);
        assert!(!out.hit_cap);
    }

    #[test]
    fn drain_respects_cap() {
        let reg = CountingRegistrar::new();
        let path = Path::new("/fonts/Sticky.ttf");
        reg.seed(path, 100);
        let out = drain(&reg, path, 5);
        assert_eq!(out.released, 5);
        assert!(out.hit_cap);
        assert_eq!(reg.count(path), 95);
    }

    #[test]
    fn stacking_registrar_needs_multiple_unregisters() {
        let reg = CountingRegistrar::stacking(2);
        let path = Path::new("/fonts/Stack.ttf");
        assert!(reg.register(path));
        assert_eq!(reg.count(path), 2);
        assert!(reg.unregister(path));
        assert!(reg.unregister(path));
        assert!(!reg.unregister(path));
    }

    #[test]
    fn refused_registration_reports_false() {
        let reg = CountingRegistrar::new();
        let path = Path::new("/fonts/Bad.ttf");
        reg.refuse(path);
        assert_eq!(register_times(&reg, path, 2), 0);
        assert_eq!(reg.register_calls(path), 2);
        assert_eq!(reg.count(path), 0);
        reg.allow(path);
        assert_eq!(register_times(&reg, path, 2), 2);
        assert_eq!(reg.total_refs(), 2);
    }

    #[test]
    fn broadcast_is_counted() {
        let reg = CountingRegistrar::new();
        reg.broadcast_change();
        reg.broadcast_change();
        assert_eq!(reg.broadcasts(), 2);
        reg.reset_calls();
        assert_eq!(reg.broadcasts(), 0);
    }

    #[test]
    fn fontconfig_register_requires_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let font = tmp.path().join("Real.ttf");
        std::fs::write(&font, b"x").unwrap();
        let reg = FontconfigRegistrar::new(tmp.path());
        assert!(reg.register(&font));
        assert!(!reg.register(&tmp.path().join("Missing.ttf")));
        assert!(reg.unregister(&font));
        assert!(!reg.unregister(&font));
    }

    #[test]
    fn fontconfig_missing_binary_does_not_panic() {
        let tmp = tempfile::tempdir().unwrap();
        let font = tmp.path().join("Real.ttf");
        std::fs::write(&font, b"x").unwrap();
        let reg = FontconfigRegistrar::new(tmp.path())
            .with_fc_cache(tmp.path().join("no-such-fc-cache"));
        assert!(reg.register(&font));
        reg.broadcast_change();
        assert!(!reg.dirty.load(Ordering::Relaxed));
    }
}
