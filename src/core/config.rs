//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{FontSyncError, Result};

/// Full fontsync configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub sync: SyncConfig,
    pub paths: PathsConfig,
}

/// Where the authoritative font index lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// Path of the index document on the server, e.g. `update.php`.
    pub resource: String,
    pub request_timeout_ms: u64,
}

/// Poll cadence and retry knobs handed to the scheduler and engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    pub poll_interval_ms: u64,
    /// Delay before the next pass after a failed one.
    pub sync_retry_delay_ms: u64,
    pub max_download_attempts: u32,
    pub download_retry_delay_ms: u64,
    /// Upper bound on unregister calls while draining one font.
    pub max_drain_iterations: u32,
}

/// Filesystem paths used by fontsync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub font_dir: PathBuf,
    pub index_file: PathBuf,
    pub remote_snapshot: PathBuf,
    pub jsonl_log: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            host: "127.0.0.1".to_string(),
            port: 80,
            resource: "update.php".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 60_000,
            sync_retry_delay_ms: 10_000,
            max_download_attempts: 3,
            download_retry_delay_ms: 1_000,
            max_drain_iterations: 64,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[FSY-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir
            .join(".config")
            .join("fontsync")
            .join("config.toml");
        let data = home_dir.join(".local").join("share").join("fontsync");
        Self {
            config_file: cfg,
            font_dir: data.join("fonts"),
            index_file: data.join("index.json"),
            remote_snapshot: data.join("remote-index.json"),
            jsonl_log: data.join("activity.jsonl"),
        }
    }
}

impl ServerConfig {
    /// Base URL of the sync server, always ending in `/`.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}/", self.scheme, self.host, self.port)
    }

    /// Full URL of the remote font index.
    #[must_use]
    pub fn index_url(&self) -> String {
        format!(
            "{}{}",
            self.base_url(),
            self.resource.trim_start_matches('/')
        )
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl SyncConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn sync_retry_delay(&self) -> Duration {
        Duration::from_millis(self.sync_retry_delay_ms)
    }

    #[must_use]
    pub fn download_retry_delay(&self) -> Duration {
        Duration::from_millis(self.download_retry_delay_ms)
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf)
                .map_err(|source| FontSyncError::io(&path_buf, source))?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(FontSyncError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a, stable across processes and toolchains.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // server
        if let Some(raw) = lookup("FONTSYNC_SERVER_HOST") {
            self.server.host = raw;
        }
        set_env_u16(&mut lookup, "FONTSYNC_SERVER_PORT", &mut self.server.port)?;
        if let Some(raw) = lookup("FONTSYNC_SERVER_RESOURCE") {
            self.server.resource = raw;
        }
        if let Some(raw) = lookup("FONTSYNC_SERVER_SCHEME") {
            self.server.scheme = raw.trim().to_ascii_lowercase();
        }
        set_env_u64(
            &mut lookup,
            "FONTSYNC_SERVER_REQUEST_TIMEOUT_MS",
            &mut self.server.request_timeout_ms,
        )?;

        // sync
        set_env_u64(
            &mut lookup,
            "FONTSYNC_SYNC_POLL_INTERVAL_MS",
            &mut self.sync.poll_interval_ms,
        )?;
        set_env_u64(
            &mut lookup,
            "FONTSYNC_SYNC_RETRY_DELAY_MS",
            &mut self.sync.sync_retry_delay_ms,
        )?;
        set_env_u32(
            &mut lookup,
            "FONTSYNC_SYNC_MAX_DOWNLOAD_ATTEMPTS",
            &mut self.sync.max_download_attempts,
        )?;
        set_env_u64(
            &mut lookup,
            "FONTSYNC_SYNC_DOWNLOAD_RETRY_DELAY_MS",
            &mut self.sync.download_retry_delay_ms,
        )?;

        // paths
        if let Some(raw) = lookup("FONTSYNC_FONT_DIR") {
            self.paths.font_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("FONTSYNC_INDEX_FILE") {
            self.paths.index_file = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("FONTSYNC_JSONL_LOG") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }

        Ok(())
    }

    fn normalize_paths(&mut self) {
        for path in [
            &mut self.paths.font_dir,
            &mut self.paths.index_file,
            &mut self.paths.remote_snapshot,
            &mut self.paths.jsonl_log,
        ] {
            let s = path.to_string_lossy();
            if s.len() > 1
                && let Some(stripped) = s.strip_suffix('/')
            {
                *path = PathBuf::from(stripped);
            }
        }
        self.server.resource = self.server.resource.trim().to_string();
    }

    fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(FontSyncError::InvalidConfig {
                details: "server.host must not be empty".to_string(),
            });
        }
        if self.server.port == 0 {
            return Err(FontSyncError::InvalidConfig {
                details: "server.port must be in 1..=65535".to_string(),
            });
        }
        if !matches!(self.server.scheme.as_str(), "http" | "https") {
            return Err(FontSyncError::InvalidConfig {
                details: format!(
                    "server.scheme must be \"http\" or \"https\", got {:?}",
                    self.server.scheme
                ),
            });
        }
        if self.server.request_timeout_ms == 0 {
            return Err(FontSyncError::InvalidConfig {
                details: "server.request_timeout_ms must be > 0".to_string(),
            });
        }

        if self.sync.max_download_attempts == 0 {
            return Err(FontSyncError::InvalidConfig {
                details: "sync.max_download_attempts must be >= 1".to_string(),
            });
        }
        if self.sync.poll_interval_ms == 0 {
            return Err(FontSyncError::InvalidConfig {
                details: "sync.poll_interval_ms must be > 0".to_string(),
            });
        }
        if self.sync.sync_retry_delay_ms > self.sync.poll_interval_ms {
            return Err(FontSyncError::InvalidConfig {
                details: format!(
                    "sync.sync_retry_delay_ms ({}) must be <= sync.poll_interval_ms ({})",
                    self.sync.sync_retry_delay_ms, self.sync.poll_interval_ms
                ),
            });
        }
        if self.sync.max_drain_iterations == 0 {
            return Err(FontSyncError::InvalidConfig {
                details: "sync.max_drain_iterations must be >= 1".to_string(),
            });
        }

        if self.paths.font_dir.as_os_str().is_empty() || self.paths.index_file.as_os_str().is_empty()
        {
            return Err(FontSyncError::InvalidConfig {
                details: "paths.font_dir and paths.index_file must be set".to_string(),
            });
        }
        // Everything inside the font directory is treated as a managed font.
        if self.paths.index_file.starts_with(&self.paths.font_dir) {
            return Err(FontSyncError::InvalidConfig {
                details: format!(
                    "paths.index_file ({}) must not live inside paths.font_dir ({})",
                    self.paths.index_file.display(),
                    self.paths.font_dir.display()
                ),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|error| FontSyncError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

fn set_env_u64<F>(lookup: &mut F, name: &str, slot: &mut u64) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = parse_env(name, &raw)?;
    }
    Ok(())
}

fn set_env_u32<F>(lookup: &mut F, name: &str, slot: &mut u32) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = parse_env(name, &raw)?;
    }
    Ok(())
}

fn set_env_u16<F>(lookup: &mut F, name: &str, slot: &mut u16) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = parse_env(name, &raw)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Config, FontSyncError};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    fn apply(cfg: &mut Config, pairs: &[(&str, &str)]) -> super::Result<()> {
        let overrides = vars(pairs);
        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn defaults_match_agent_conventions() {
        let cfg = Config::default();
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.port, 80);
        assert_eq!(cfg.server.resource, "update.php");
        assert_eq!(cfg.sync.poll_interval_ms, 60_000);
        assert_eq!(cfg.sync.max_download_attempts, 3);
        assert!(cfg.paths.index_file.ends_with("index.json"));
    }

    #[test]
    fn index_url_joins_resource() {
        let mut cfg = Config::default();
        cfg.server.host = "fonts.example".to_string();
        cfg.server.port = 8080;
        cfg.server.resource = "/api/index.json".to_string();
        assert_eq!(cfg.server.base_url(), "http://fonts.example:8080/");
        assert_eq!(cfg.server.index_url(), "http://fonts.example:8080/api/index.json");
    }

    #[test]
    fn zero_download_attempts_rejected() {
        let mut cfg = Config::default();
        cfg.sync.max_download_attempts = 0;
        let err = cfg.validate().expect_err("expected invalid attempts");
        match err {
            FontSyncError::InvalidConfig { details } => {
                assert!(details.contains("max_download_attempts"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn retry_delay_longer_than_poll_rejected() {
        let mut cfg = Config::default();
        cfg.sync.sync_retry_delay_ms = cfg.sync.poll_interval_ms + 1;
        let err = cfg.validate().expect_err("expected retry delay error");
        assert!(err.to_string().contains("sync_retry_delay_ms"));
    }

    #[test]
    fn empty_host_and_zero_port_rejected() {
        let mut cfg = Config::default();
        cfg.server.host = "  ".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.server.port = 0;
        assert!(cfg.validate().unwrap_err().to_string().contains("port"));
    }

    #[test]
    fn unknown_scheme_rejected() {
        let mut cfg = Config::default();
        cfg.server.scheme = "ftp".to_string();
        assert!(cfg.validate().unwrap_err().to_string().contains("scheme"));
    }

    #[test]
    fn index_inside_font_dir_rejected() {
        let mut cfg = Config::default();
        cfg.paths.font_dir = PathBuf::from("/srv/fonts");
        cfg.paths.index_file = PathBuf::from("/srv/fonts/index.json");
        let err = cfg.validate().expect_err("index inside font dir");
        assert!(err.to_string().contains("index_file"));
    }

    #[test]
    fn stable_hash_changes_when_config_changes() {
        let cfg = Config::default();
        let hash_before = cfg.stable_hash().expect("hash should compute");
        let mut modified = Config::default();
        modified.sync.max_download_attempts += 1;
        let hash_after = modified.stable_hash().expect("hash should compute");
        assert_ne!(hash_before, hash_after);
        assert_eq!(hash_before, Config::default().stable_hash().unwrap());
    }

    #[test]
    fn env_overrides_apply_to_every_section() {
        let mut cfg = Config::default();
        apply(
            &mut cfg,
            &[
                ("FONTSYNC_SERVER_HOST", "sync.internal"),
                ("FONTSYNC_SERVER_PORT", "8443"),
                ("FONTSYNC_SERVER_SCHEME", "HTTPS"),
                ("FONTSYNC_SYNC_POLL_INTERVAL_MS", "5000"),
                ("FONTSYNC_SYNC_RETRY_DELAY_MS", "2500"),
                ("FONTSYNC_SYNC_MAX_DOWNLOAD_ATTEMPTS", "5"),
                ("FONTSYNC_FONT_DIR", "/opt/fonts"),
            ],
        )
        .expect("overrides should parse");

        assert_eq!(cfg.server.host, "sync.internal");
        assert_eq!(cfg.server.port, 8443);
        assert_eq!(cfg.server.scheme, "https");
        assert_eq!(cfg.sync.poll_interval_ms, 5000);
        assert_eq!(cfg.sync.sync_retry_delay_ms, 2500);
        assert_eq!(cfg.sync.max_download_attempts, 5);
        assert_eq!(cfg.paths.font_dir, Path::new("/opt/fonts"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_invalid_number_rejected() {
        let mut cfg = Config::default();
        let err = apply(&mut cfg, &[("FONTSYNC_SERVER_PORT", "99999")])
            .expect_err("port out of u16 range");
        assert_eq!(err.code(), "FSY-1003");
        assert!(err.to_string().contains("FONTSYNC_SERVER_PORT"));
    }

    #[test]
    fn normalize_paths_trims_trailing_slashes_and_keeps_root() {
        let mut cfg = Config::default();
        cfg.paths.font_dir = PathBuf::from("/srv/fonts/");
        cfg.paths.jsonl_log = PathBuf::from("/");
        cfg.normalize_paths();
        assert_eq!(cfg.paths.font_dir, Path::new("/srv/fonts"));
        assert_eq!(cfg.paths.jsonl_log, Path::new("/"));
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = Config::load(Some(&missing)).expect_err("missing explicit file");
        assert!(matches!(err, FontSyncError::MissingConfig { .. }));
    }

    #[test]
    fn load_parses_partial_toml_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let fonts = dir.path().join("fonts");
        let index = dir.path().join("index.json");
        std::fs::write(
            &path,
            format!(
                "[server]\nhost = \"fonts.corp\"\n\n[sync]\nmax_download_attempts = 4\n\n[paths]\nfont_dir = {:?}\nindex_file = {:?}\n",
                fonts.display().to_string(),
                index.display().to_string()
            ),
        )
        .unwrap();

        let cfg = Config::load(Some(&path)).expect("config should load");
        assert_eq!(cfg.server.host, "fonts.corp");
        assert_eq!(cfg.server.port, 80);
        assert_eq!(cfg.sync.max_download_attempts, 4);
        assert_eq!(cfg.paths.font_dir, fonts);
        assert_eq!(cfg.paths.config_file, path);
    }
}
