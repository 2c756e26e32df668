#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

use fontsync::fonts::entry::RemoteEntry;
use fontsync::fonts::hasher::ContentHasher;

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

impl CmdResult {
    /// Parse the last non-empty stdout line as JSON.
    pub fn json(&self) -> serde_json::Value {
        let line = self
            .stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or_else(|| panic!("no stdout; see {}", self.log_path.display()));
        serde_json::from_str(line).unwrap_or_else(|e| {
            panic!(
                "stdout is not JSON ({e}); see {}",
                self.log_path.display()
            )
        })
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_fontsync") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) {
        "fontsync.exe"
    } else {
        "fontsync"
    };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve fontsync binary path for integration test"),
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    run_cli_case_with_env(case_name, args, &[])
}

pub fn run_cli_case_with_env(case_name: &str, args: &[&str], env: &[(&str, &str)]) -> CmdResult {
    let root = std::env::temp_dir().join("fontsync-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    command
        .args(args)
        .env("RUST_BACKTRACE", "1")
        .env_remove("FONTSYNC_OUTPUT_FORMAT")
        .env_remove("NOTIFY_SOCKET");
    for (key, value) in env {
        command.env(key, value);
    }
    let output = command.output().expect("execute fontsync command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// A server mirror plus the local state directories of one agent.
pub struct SyncFixture {
    pub tmp: tempfile::TempDir,
    pub mirror: PathBuf,
    pub fonts: PathBuf,
    pub state: PathBuf,
}

impl SyncFixture {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().expect("create tempdir");
        let mirror = tmp.path().join("mirror");
        let fonts = tmp.path().join("fonts");
        let state = tmp.path().join("state");
        fs::create_dir_all(mirror.join("fonts")).expect("create mirror");
        fs::create_dir_all(&state).expect("create state dir");
        Self {
            tmp,
            mirror,
            fonts,
            state,
        }
    }

    pub fn index_file(&self) -> PathBuf {
        self.state.join("index.json")
    }

    pub fn jsonl_log(&self) -> PathBuf {
        self.state.join("activity.jsonl")
    }

    pub fn local(&self, file: &str) -> PathBuf {
        self.fonts.join(file)
    }

    /// Put `bytes` on the mirror under `fonts/<file>` and describe it.
    pub fn publish(&self, file: &str, bytes: &[u8]) -> RemoteEntry {
        fs::write(self.mirror.join("fonts").join(file), bytes).expect("write mirror font");
        remote_entry(file, &format!("fonts/{file}"), bytes)
    }

    /// Write the mirror's index document (`update.php`, the default resource).
    pub fn write_index(&self, entries: &[RemoteEntry]) {
        let raw = serde_json::to_string_pretty(entries).expect("encode index");
        fs::write(self.mirror.join("update.php"), raw).expect("write mirror index");
    }

    /// Config file pointing every path into the fixture.
    pub fn write_config(&self) -> PathBuf {
        let path = self.tmp.path().join("config.toml");
        let body = format!(
            "[sync]\n\
             download_retry_delay_ms = 0\n\
             \n\
             [paths]\n\
             font_dir = {fonts:?}\n\
             index_file = {index:?}\n\
             remote_snapshot = {snapshot:?}\n\
             jsonl_log = {log:?}\n",
            fonts = self.fonts.to_string_lossy(),
            index = self.index_file().to_string_lossy(),
            snapshot = self.state.join("remote-index.json").to_string_lossy(),
            log = self.jsonl_log().to_string_lossy(),
        );
        fs::write(&path, body).expect("write config");
        path
    }
}

pub fn remote_entry(name: &str, remote_file: &str, bytes: &[u8]) -> RemoteEntry {
    RemoteEntry {
        name: name.to_string(),
        category: "sans".to_string(),
        kind: "truetype".to_string(),
        remote_file: remote_file.to_string(),
        md5: ContentHasher::hash_bytes(bytes),
    }
}

pub fn path_str(path: &Path) -> &str {
    path.to_str().expect("utf-8 test path")
}
