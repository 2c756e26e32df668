//! Font records, content digests, and the persistent managed-set index.

pub mod entry;
pub mod hasher;
pub mod index;
