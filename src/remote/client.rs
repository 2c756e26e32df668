//! Remote font index retrieval.

#![allow(missing_docs)]

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::StatusCode;

use crate::core::config::ServerConfig;
use crate::core::errors::{FontSyncError, Result};
use crate::fonts::entry::RemoteEntry;
use crate::remote::download::write_atomically;

/// Upper bound on the size of an index document.
pub const MAX_INDEX_BYTES: u64 = 16 * 1024 * 1024;

/// Produces the authoritative, ordered remote entry list.
///
/// Either the whole list is returned or the fetch fails; partial lists never
/// reach the engine.
pub trait RemoteIndexSource: Send {
    fn fetch(&self) -> Result<Vec<RemoteEntry>>;
    /// Where the index comes from, for logs.
    fn describe(&self) -> String;
}

/// Parse an index document: a JSON array of remote entries.
pub fn parse_index(source: &str, raw: &str) -> Result<Vec<RemoteEntry>> {
    serde_json::from_str(raw).map_err(|e| FontSyncError::RemoteIndex {
        url: source.to_string(),
        details: format!("invalid index document: {e}"),
    })
}

/// Fetches the index over HTTP(S) and keeps a snapshot of the last good copy.
#[derive(Clone)]
pub struct HttpIndexClient {
    client: reqwest::blocking::Client,
    url: String,
    snapshot: Option<PathBuf>,
}

impl HttpIndexClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        let client = http_client(timeout).map_err(|e| FontSyncError::RemoteIndex {
            url: url.clone(),
            details: format!("building http client: {e}"),
        })?;
        Ok(Self {
            client,
            url,
            snapshot: None,
        })
    }

    pub fn from_config(server: &ServerConfig) -> Result<Self> {
        Self::new(server.index_url(), server.request_timeout())
    }

    /// Copy every successfully parsed index to `path`.
    #[must_use]
    pub fn with_snapshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot = Some(path.into());
        self
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn fetch_raw(&self) -> Result<String> {
        let to_err = |details: String| FontSyncError::RemoteIndex {
            url: self.url.clone(),
            details,
        };
        let response = self
            .client
            .get(&self.url)
            .send()
            .map_err(|e| to_err(e.to_string()))?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(to_err(format!("http response code {}", status.as_u16())));
        }
        let mut raw = String::new();
        response
            .take(MAX_INDEX_BYTES)
            .read_to_string(&mut raw)
            .map_err(|e| to_err(format!("reading response body: {e}")))?;
        Ok(raw)
    }
}

/// Blocking client shared by index fetches and downloads.
pub(crate) fn http_client(timeout: Duration) -> reqwest::Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("fontsync/", env!("CARGO_PKG_VERSION")))
        .build()
}

impl RemoteIndexSource for HttpIndexClient {
    fn fetch(&self) -> Result<Vec<RemoteEntry>> {
        let raw = self.fetch_raw()?;
        let entries = parse_index(&self.url, &raw)?;
        if let Some(snapshot) = &self.snapshot {
            store_snapshot(snapshot, &raw);
        }
        Ok(entries)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Best effort: the snapshot is for operators, never for sync decisions.
fn store_snapshot(path: &Path, raw: &str) {
    if let Some(parent) = path.parent()
        && let Err(e) = fs::create_dir_all(parent)
    {
        eprintln!("[FSY-REMOTE] cannot create {}: {e}", parent.display());
        return;
    }
    if let Err(e) = write_atomically(path, &mut raw.as_bytes()) {
        eprintln!(
            "[FSY-REMOTE] cannot write index snapshot {}: {e}",
            path.display()
        );
    }
}

/// Reads the index from a local directory laid out like the remote server.
#[derive(Debug, Clone)]
pub struct MirrorIndexSource {
    path: PathBuf,
}

impl MirrorIndexSource {
    /// Index document at `root/resource`.
    #[must_use]
    pub fn new(root: &Path, resource: &str) -> Self {
        Self {
            path: root.join(resource.trim_start_matches('/')),
        }
    }
}

impl RemoteIndexSource for MirrorIndexSource {
    fn fetch(&self) -> Result<Vec<RemoteEntry>> {
        let describe = self.describe();
        let mut raw = String::new();
        File::open(&self.path)
            .and_then(|f| f.take(MAX_INDEX_BYTES).read_to_string(&mut raw))
            .map_err(|e| FontSyncError::RemoteIndex {
                url: describe.clone(),
                details: e.to_string(),
            })?;
        parse_index(&describe, &raw)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
