//! FSY-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, FontSyncError>;

/// Top-level error type for fontsync.
#[derive(Debug, Error)]
pub enum FontSyncError {
    #[error("[FSY-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[FSY-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[FSY-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[FSY-1101] unsupported platform: {details}")]
    UnsupportedPlatform { details: String },

    #[error("[FSY-2001] managed directory unusable at {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[FSY-2101] cannot hash {path}: {source}")]
    Hash {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[FSY-2201] download of {url} failed: {details}")]
    Download { url: String, details: String },

    #[error("[FSY-2202] remote index fetch from {url} failed: {details}")]
    RemoteIndex { url: String, details: String },

    #[error("[FSY-2301] font registration failed for {path}: {details}")]
    Registration { path: PathBuf, details: String },

    #[error("[FSY-2401] index commit to {path} failed: {source}")]
    Commit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[FSY-2501] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[FSY-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[FSY-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl FontSyncError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "FSY-1001",
            Self::MissingConfig { .. } => "FSY-1002",
            Self::ConfigParse { .. } => "FSY-1003",
            Self::UnsupportedPlatform { .. } => "FSY-1101",
            Self::Directory { .. } => "FSY-2001",
            Self::Hash { .. } => "FSY-2101",
            Self::Download { .. } => "FSY-2201",
            Self::RemoteIndex { .. } => "FSY-2202",
            Self::Registration { .. } => "FSY-2301",
            Self::Commit { .. } => "FSY-2401",
            Self::Serialization { .. } => "FSY-2501",
            Self::Io { .. } => "FSY-3002",
            Self::Runtime { .. } => "FSY-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Directory { .. }
                | Self::Download { .. }
                | Self::RemoteIndex { .. }
                | Self::Commit { .. }
                | Self::Io { .. }
                | Self::Runtime { .. }
        )
    }

    /// Whether the error ends the whole sync pass rather than a single entry.
    #[must_use]
    pub const fn is_pass_fatal(&self) -> bool {
        matches!(self, Self::Directory { .. } | Self::Commit { .. })
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    #[must_use]
    pub fn directory(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Directory {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    #[must_use]
    pub fn commit(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Commit {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for FontSyncError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for FontSyncError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
