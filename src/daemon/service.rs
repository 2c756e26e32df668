//! systemd integration: unit file generation, install/uninstall through
//! `systemctl`.

use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::core::config::Config;
use crate::core::errors::{FontSyncError, Result};

/// Unit name for the systemd service.
pub const SYSTEMD_UNIT_NAME: &str = "fontsync.service";

/// Lifecycle operations on the installed service.
pub trait ServiceManager: Send + Sync {
    fn install(&self) -> Result<()>;
    fn uninstall(&self) -> Result<()>;
    fn status(&self) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Systemd configuration
// ---------------------------------------------------------------------------

/// Parameters controlling unit file generation and lifecycle commands.
#[derive(Debug, Clone)]
pub struct SystemdConfig {
    /// Whether to operate in user scope (`--user`).
    pub user_scope: bool,
    /// Absolute path to the fontsync binary baked into the unit file.
    pub binary_path: PathBuf,
    /// Config file passed to `daemon` via `--config`.
    pub config_file: PathBuf,
    /// Paths the daemon writes under `ProtectSystem=strict`.
    pub read_write_paths: Vec<PathBuf>,
    /// Directory the unit file goes into.
    pub unit_dir: PathBuf,
}

impl SystemdConfig {
    /// Build from the loaded configuration and the running binary.
    pub fn from_config(config: &Config, user_scope: bool) -> Result<Self> {
        Ok(Self {
            user_scope,
            binary_path: resolve_fontsync_binary()?,
            config_file: config.paths.config_file.clone(),
            read_write_paths: read_write_paths(config),
            unit_dir: default_unit_dir(user_scope),
        })
    }

    #[must_use]
    pub fn unit_path(&self) -> PathBuf {
        self.unit_dir.join(SYSTEMD_UNIT_NAME)
    }

    #[must_use]
    pub const fn scope(&self) -> &'static str {
        if self.user_scope { "user" } else { "system" }
    }
}

fn default_unit_dir(user_scope: bool) -> PathBuf {
    if user_scope {
        let home = env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
        home.join(".config/systemd/user")
    } else {
        PathBuf::from("/etc/systemd/system")
    }
}

// ---------------------------------------------------------------------------
// Systemd service manager
// ---------------------------------------------------------------------------

/// [`ServiceManager`] that drives `systemctl` and writes a hardened unit file.
#[derive(Debug, Clone)]
pub struct SystemdServiceManager {
    config: SystemdConfig,
}

impl SystemdServiceManager {
    #[must_use]
    pub fn new(config: SystemdConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &SystemdConfig {
        &self.config
    }

    /// Full unit file content.
    #[must_use]
    pub fn generate_unit_file(&self) -> String {
        let binary = quote_path(&self.config.binary_path);
        let config_file = quote_path(&self.config.config_file);
        let rw_paths = self
            .config
            .read_write_paths
            .iter()
            .map(|p| quote_path(p))
            .collect::<Vec<_>>()
            .join(" ");

        let mut unit = String::with_capacity(1024);

        writeln!(unit, "[Unit]").ok();
        writeln!(unit, "Description=fontsync - managed font synchronization agent").ok();
        writeln!(unit, "After=network-online.target").ok();
        writeln!(unit, "Wants=network-online.target").ok();
        writeln!(unit).ok();

        writeln!(unit, "[Service]").ok();
        writeln!(unit, "Type=notify").ok();
        writeln!(unit, "NotifyAccess=main").ok();
        writeln!(unit, "WatchdogSec=120").ok();
        writeln!(unit, "ExecStart={binary} --config {config_file} daemon").ok();
        writeln!(unit, "ExecReload=/bin/kill -HUP $MAINPID").ok();
        writeln!(unit, "Restart=on-failure").ok();
        writeln!(unit, "RestartSec=10").ok();
        writeln!(unit, "TimeoutStopSec=30").ok();
        writeln!(unit).ok();

        writeln!(unit, "NoNewPrivileges=true").ok();
        if !self.config.user_scope {
            writeln!(unit, "ProtectSystem=strict").ok();
            writeln!(unit, "ReadWritePaths={rw_paths}").ok();
            writeln!(unit, "ProtectKernelTunables=true").ok();
            writeln!(unit, "ProtectControlGroups=true").ok();
            writeln!(unit, "RestrictSUIDSGID=true").ok();
            writeln!(unit, "StandardOutput=journal").ok();
            writeln!(unit, "StandardError=journal").ok();
            writeln!(unit, "SyslogIdentifier=fontsync").ok();
        }
        writeln!(unit, "MemoryMax=128M").ok();
        writeln!(unit).ok();

        writeln!(unit, "[Install]").ok();
        if self.config.user_scope {
            writeln!(unit, "WantedBy=default.target").ok();
        } else {
            writeln!(unit, "WantedBy=multi-user.target").ok();
        }

        unit
    }

    fn systemctl_args(&self, args: &[&str]) -> Vec<String> {
        let mut cmd_args: Vec<String> = Vec::with_capacity(args.len() + 1);
        if self.config.user_scope {
            cmd_args.push("--user".to_string());
        }
        cmd_args.extend(args.iter().map(|s| (*s).to_string()));
        cmd_args
    }

    fn run_systemctl(&self, args: &[&str]) -> Result<String> {
        let full_args = self.systemctl_args(args);
        let output = Command::new("systemctl")
            .args(&full_args)
            .output()
            .map_err(|source| FontSyncError::io("systemctl", source))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(FontSyncError::Runtime {
                details: format!(
                    "systemctl {} failed (exit {}): {}",
                    full_args.join(" "),
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            })
        }
    }

    /// Run systemctl ignoring failure (stop/disable of an already stopped unit).
    fn run_systemctl_lenient(&self, args: &[&str]) -> String {
        let full_args = self.systemctl_args(args);
        Command::new("systemctl")
            .args(&full_args)
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
            .unwrap_or_default()
    }
}

impl ServiceManager for SystemdServiceManager {
    fn install(&self) -> Result<()> {
        if !self.config.user_scope && !is_running_as_root() {
            return Err(FontSyncError::Runtime {
                details: "system scope install requires root; use --user".to_string(),
            });
        }
        let unit_dir = &self.config.unit_dir;
        let unit_path = self.config.unit_path();
        fs::create_dir_all(unit_dir).map_err(|source| FontSyncError::io(unit_dir, source))?;
        fs::write(&unit_path, self.generate_unit_file())
            .map_err(|source| FontSyncError::io(&unit_path, source))?;

        self.run_systemctl(&["daemon-reload"])?;
        self.run_systemctl(&["enable", SYSTEMD_UNIT_NAME])?;
        Ok(())
    }

    fn uninstall(&self) -> Result<()> {
        let unit_path = self.config.unit_path();
        self.run_systemctl_lenient(&["stop", SYSTEMD_UNIT_NAME]);
        self.run_systemctl_lenient(&["disable", SYSTEMD_UNIT_NAME]);

        match fs::remove_file(&unit_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(FontSyncError::io(&unit_path, source)),
        }
        self.run_systemctl(&["daemon-reload"])?;
        Ok(())
    }

    fn status(&self) -> Result<String> {
        // is-active exits non-zero for inactive units.
        let state = self.run_systemctl_lenient(&["is-active", SYSTEMD_UNIT_NAME]);
        if state.is_empty() {
            return Ok("unknown".to_string());
        }
        Ok(state)
    }
}

// ---------------------------------------------------------------------------
// Structured result for CLI output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, serde::Serialize)]
pub struct ServiceActionResult {
    /// `"install"` or `"uninstall"`.
    pub action: &'static str,
    pub service_type: &'static str,
    /// `"system"` or `"user"`.
    pub scope: &'static str,
    pub unit_path: PathBuf,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn resolve_fontsync_binary() -> Result<PathBuf> {
    if let Ok(exe) = env::current_exe()
        && exe.exists()
    {
        return Ok(exe);
    }
    for candidate in ["/usr/local/bin/fontsync", "/usr/bin/fontsync"] {
        let p = Path::new(candidate);
        if p.exists() {
            return Ok(p.to_path_buf());
        }
    }
    Err(FontSyncError::Runtime {
        details: "could not locate the fontsync binary; install it to a PATH directory first"
            .to_string(),
    })
}

/// Directories the daemon writes: the managed directory and the data files.
fn read_write_paths(config: &Config) -> Vec<PathBuf> {
    let mut paths = vec![config.paths.font_dir.clone()];
    for file in [
        &config.paths.index_file,
        &config.paths.remote_snapshot,
        &config.paths.jsonl_log,
    ] {
        if let Some(parent) = file.parent()
            && !paths.iter().any(|p| p == parent)
        {
            paths.push(parent.to_path_buf());
        }
    }
    paths
}

/// Systemd quoting for paths containing spaces or quotes.
fn quote_path(path: &Path) -> String {
    let s = path.display().to_string();
    if s.contains(' ') || s.contains('"') {
        format!("\"{}\"", s.replace('"', "\\\""))
    } else {
        s
    }
}

fn is_running_as_root() -> bool {
    #[cfg(unix)]
    {
        nix::unistd::geteuid().is_root()
    }
    #[cfg(not(unix))]
    {
        false
    }
}
