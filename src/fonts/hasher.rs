//! MD5 content digests used for change detection.
//!
//! Not a security boundary: the digest only decides whether a local file
//! matches what the remote index advertises.

#![allow(missing_docs)]

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use md5::{Digest, Md5};

use crate::core::errors::{FontSyncError, Result};

/// Read buffer size used while streaming a file through the digest.
pub const HASH_BLOCK_SIZE: usize = 64 * 1024;

/// Length of a hex-encoded MD5 digest.
pub const DIGEST_HEX_LEN: usize = 32;

/// Streams files through MD5 and renders uppercase hex.
#[derive(Debug, Clone, Copy)]
pub struct ContentHasher {
    block_size: usize,
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self {
            block_size: HASH_BLOCK_SIZE,
        }
    }
}

impl ContentHasher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
        }
    }

    /// Digest of the file at `path`.
    ///
    /// Any open or read failure is a [`FontSyncError::Hash`]; callers treat it
    /// as "out of sync".
    pub fn hash(&self, path: &Path) -> Result<String> {
        let to_err = |source: io::Error| FontSyncError::Hash {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).map_err(to_err)?;
        let mut hasher = Md5::new();
        let mut buf = vec![0_u8; self.block_size];
        loop {
            let read = match file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(to_err(e)),
            };
            hasher.update(&buf[..read]);
        }
        Ok(hex_upper(&hasher.finalize()))
    }

    /// Digest of an in-memory buffer.
    #[must_use]
    pub fn hash_bytes(bytes: &[u8]) -> String {
        hex_upper(&Md5::digest(bytes))
    }
}

/// Canonical form of an advertised digest: trimmed, uppercase.
#[must_use]
pub fn normalize_digest(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Case-insensitive digest comparison.
#[must_use]
pub fn digests_match(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Whether `raw` looks like a hex MD5 digest.
#[must_use]
pub fn is_well_formed_digest(raw: &str) -> bool {
    let raw = raw.trim();
    raw.len() == DIGEST_HEX_LEN && raw.bytes().all(|b| b.is_ascii_hexdigit())
}

fn hex_upper(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
            let _ = write!(s, "{b:02X}");
            s
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn empty_file_digest() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("empty.ttf");
        fs::write(&path, b"").unwrap();
        assert_eq!(
            ContentHasher::new().hash(&path).unwrap(),
            "D41D8CD98F00B204E9800998ECF8427E"
        );
    }

    #[test]
    fn known_content_digest_is_uppercase_fixed_width() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("hello.ttf");
        fs::write(&path, b"hello").unwrap();
        let digest = ContentHasher::new().hash(&path).unwrap();
        assert_eq!(digest, "5D41402ABC4B2A76B9719D911017C592");
        assert_eq!(digest.len(), DIGEST_HEX_LEN);
        assert!(is_well_formed_digest(&digest));
    }

    #[test]
    fn block_size_does_not_change_digest() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("big.otf");
        let data: Vec<u8> = (0..200_000_u32).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &data).unwrap();

        let small = ContentHasher::with_block_size(7).hash(&path).unwrap();
        let large = ContentHasher::new().hash(&path).unwrap();
        assert_eq!(small, large);
        assert_eq!(large, ContentHasher::hash_bytes(&data));
    }

    #[test]
    fn missing_file_is_hash_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = ContentHasher::new()
            .hash(&tmp.path().join("absent.ttf"))
            .unwrap_err();
        assert_eq!(err.code(), "FSY-2101");
    }

    #[cfg(unix)]
    #[test]
    fn directory_is_hash_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = ContentHasher::new().hash(tmp.path()).unwrap_err();
        assert!(matches!(err, FontSyncError::Hash { .. }));
    }

    #[test]
    fn digest_comparison_ignores_case_and_whitespace() {
        assert!(digests_match(
            "5d41402abc4b2a76b9719d911017c592",
            " 5D41402ABC4B2A76B9719D911017C592\n"
        ));
        assert!(!digests_match("AAAA", "BBBB"));
        assert_eq!(normalize_digest(" abc "), "ABC");
        assert!(!is_well_formed_digest("xyz"));
    }
}
