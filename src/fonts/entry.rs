//! Remote and managed font records, and the basename key that pairs them.

#![allow(missing_docs)]

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::paths::{is_plain_file_name, remote_basename};
use crate::fonts::hasher::normalize_digest;

/// Matching key shared by remote and managed entries: the file's basename.
///
/// Directory and category are ignored; two entries with the same basename
/// are the same font.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FontKey(String);

impl FontKey {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key names a single file that can live in the managed directory.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        is_plain_file_name(&self.0)
    }
}

impl fmt::Display for FontKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One font as advertised by the remote index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub remote_file: String,
    pub md5: String,
}

impl RemoteEntry {
    #[must_use]
    pub fn key(&self) -> FontKey {
        FontKey::new(remote_basename(&self.remote_file))
    }

    /// Where this font lives once installed.
    #[must_use]
    pub fn local_path_in(&self, font_dir: &Path) -> PathBuf {
        font_dir.join(remote_basename(&self.remote_file))
    }

    /// Managed record for this font after a successful install at `local_file`.
    #[must_use]
    pub fn to_managed(&self, local_file: PathBuf) -> ManagedEntry {
        ManagedEntry {
            name: self.name.clone(),
            category: self.category.clone(),
            kind: self.kind.clone(),
            local_file,
            md5: normalize_digest(&self.md5),
        }
    }
}

/// One font currently owned by this agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedEntry {
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub local_file: PathBuf,
    pub md5: String,
}

impl ManagedEntry {
    #[must_use]
    pub fn key(&self) -> FontKey {
        FontKey::new(
            self.local_file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        )
    }

    /// Whether the descriptive metadata differs from `remote`.
    #[must_use]
    pub fn metadata_differs(&self, remote: &RemoteEntry) -> bool {
        self.name != remote.name || self.category != remote.category || self.kind != remote.kind
    }
}
