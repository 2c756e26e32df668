//! Fetching font bytes into the managed directory.
//!
//! Every download lands in a `.part` sibling first and is renamed into place,
//! so a failed attempt never clobbers the previous copy.

#![allow(missing_docs)]

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::StatusCode;

use crate::core::errors::{FontSyncError, Result};
use crate::remote::client::http_client;

/// Fetches one remote font into a local path, replacing any existing bytes.
pub trait Downloader: Send {
    /// Download `remote_path` to `destination`. Returns the bytes written.
    fn download(&self, remote_path: &str, destination: &Path) -> Result<u64>;
}

/// Sibling path used while a download is in flight.
#[must_use]
pub fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

/// Stream `reader` into `destination` via a `.part` file and rename.
pub fn write_atomically(destination: &Path, reader: &mut dyn io::Read) -> io::Result<u64> {
    let part = part_path(destination);
    let result = (|| -> io::Result<u64> {
        let mut file = File::create(&part)?;
        let written = io::copy(&mut *reader, &mut file)?;
        file.flush()?;
        file.sync_all()?;
        drop(file);
        replace_file(&part, destination)?;
        Ok(written)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&part);
    }
    result
}

fn replace_file(from: &Path, to: &Path) -> io::Result<()> {
    #[cfg(windows)]
    match fs::remove_file(to) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::rename(from, to)
}

/// Absolute URL for a remote font path.
///
/// Absolute `http(s)://` paths are used as-is; anything else is resolved
/// against `base_url` with backslashes turned into slashes.
#[must_use]
pub fn resolve_url(base_url: &str, remote_path: &str) -> String {
    let lower = remote_path.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return remote_path.to_string();
    }
    let relative = remote_path.replace('\\', "/");
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}

/// Downloads fonts over HTTP(S).
#[derive(Clone)]
pub struct HttpDownloader {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpDownloader {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into();
        let client = http_client(timeout).map_err(|e| FontSyncError::Download {
            url: base_url.clone(),
            details: format!("building http client: {e}"),
        })?;
        Ok(Self { client, base_url })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Downloader for HttpDownloader {
    fn download(&self, remote_path: &str, destination: &Path) -> Result<u64> {
        let url = resolve_url(&self.base_url, remote_path);
        let mut response = self.client.get(&url).send().map_err(|e| FontSyncError::Download {
            url: url.clone(),
            details: e.to_string(),
        })?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(FontSyncError::Download {
                url,
                details: format!("http response code {}", status.as_u16()),
            });
        }
        write_atomically(destination, &mut response).map_err(|e| FontSyncError::Download {
            url,
            details: format!("writing {}: {e}", destination.display()),
        })
    }
}

/// Serves fonts from a local directory laid out like the remote server.
#[derive(Debug, Clone)]
pub struct MirrorDownloader {
    root: PathBuf,
}

impl MirrorDownloader {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Downloader for MirrorDownloader {
    fn download(&self, remote_path: &str, destination: &Path) -> Result<u64> {
        let relative = remote_path.replace('\\', "/");
        let source = self.root.join(relative.trim_start_matches('/'));
        let to_err = |e: io::Error| FontSyncError::Download {
            url: source.display().to_string(),
            details: e.to_string(),
        };
        let mut file = File::open(&source).map_err(to_err)?;
        write_atomically(destination, &mut file).map_err(to_err)
    }
}
