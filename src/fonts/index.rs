//! Durable, atomically replaced record of the managed font set.
//!
//! The file is only ever replaced by renaming a fully written sibling over it,
//! so a reader sees either the previous commit or the new one.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::{FontSyncError, Result};
use crate::fonts::entry::ManagedEntry;

/// On-disk format version.
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// Serialized form of the index file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexDocument {
    pub version: u32,
    pub committed_at: DateTime<Utc>,
    pub fonts: Vec<ManagedEntry>,
}

/// Storage seam for the managed set so callers can substitute faulty or
/// in-memory stores.
pub trait IndexStore: Send {
    /// Last committed entries whose backing files still exist.
    fn load(&self) -> Result<Vec<ManagedEntry>>;
    /// Atomically replace the committed set.
    fn store(&self, entries: &[ManagedEntry]) -> Result<()>;
    /// Location of the committed file, for diagnostics.
    fn location(&self) -> &Path;
}

/// JSON file store using temp-write + rename.
#[derive(Debug, Clone)]
pub struct PersistentIndex {
    path: PathBuf,
}

/// A fully written but not yet published index.
#[derive(Debug)]
#[must_use = "a staged index is not visible until committed"]
pub struct StagedIndex {
    tmp_path: PathBuf,
    path: PathBuf,
}

impl PersistentIndex {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Raw committed document, without filtering. `None` before the first commit.
    pub fn read_document(&self) -> Result<Option<IndexDocument>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(FontSyncError::io(&self.path, e)),
        };
        let doc: IndexDocument = serde_json::from_slice(&raw)?;
        if doc.version > INDEX_FORMAT_VERSION {
            return Err(FontSyncError::Serialization {
                context: "index",
                details: format!(
                    "index format version {} is newer than supported {INDEX_FORMAT_VERSION}",
                    doc.version
                ),
            });
        }
        Ok(Some(doc))
    }

    /// Write the new set to the temp sibling and flush it to disk.
    pub fn stage(&self, entries: &[ManagedEntry]) -> Result<StagedIndex> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| FontSyncError::commit(parent, e))?;
        }

        let doc = IndexDocument {
            version: INDEX_FORMAT_VERSION,
            committed_at: Utc::now(),
            fonts: entries.to_vec(),
        };
        let data = serde_json::to_vec_pretty(&doc)?;

        let tmp_path = self.tmp_path();
        let write = || -> io::Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&data)?;
            file.sync_all()
        };
        write().map_err(|e| FontSyncError::commit(&tmp_path, e))?;

        Ok(StagedIndex {
            tmp_path,
            path: self.path.clone(),
        })
    }
}

impl IndexStore for PersistentIndex {
    fn load(&self) -> Result<Vec<ManagedEntry>> {
        let Some(doc) = self.read_document()? else {
            return Ok(Vec::new());
        };
        let mut seen = HashSet::new();
        Ok(doc
            .fonts
            .into_iter()
            .filter(|entry| entry.local_file.is_file())
            .filter(|entry| seen.insert(entry.local_file.clone()))
            .collect())
    }

    fn store(&self, entries: &[ManagedEntry]) -> Result<()> {
        self.stage(entries)?.commit()
    }

    fn location(&self) -> &Path {
        &self.path
    }
}

impl StagedIndex {
    #[must_use]
    pub fn tmp_path(&self) -> &Path {
        &self.tmp_path
    }

    /// Publish the staged file over the committed one.
    pub fn commit(self) -> Result<()> {
        // Rename cannot replace an existing file on Windows.
        #[cfg(windows)]
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(FontSyncError::commit(&self.path, e)),
        }

        if let Err(e) = fs::rename(&self.tmp_path, &self.path) {
            let _ = fs::remove_file(&self.tmp_path);
            return Err(FontSyncError::commit(&self.path, e));
        }
        sync_parent_dir(&self.path);
        Ok(())
    }

    /// Discard the staged file without publishing it.
    pub fn abandon(self) {
        let _ = fs::remove_file(&self.tmp_path);
    }
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}
