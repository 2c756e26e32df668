//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use fontsync::prelude::*;
//! ```

// Core
pub use crate::core::cancel::StopSignal;
pub use crate::core::config::Config;
pub use crate::core::errors::{FontSyncError, Result};

// Fonts
pub use crate::fonts::entry::{FontKey, ManagedEntry, RemoteEntry};
pub use crate::fonts::hasher::ContentHasher;
pub use crate::fonts::index::{IndexStore, PersistentIndex};

// Platform
pub use crate::platform::pal::{CountingRegistrar, ResourceRegistrar, detect_registrar};

// Remote
pub use crate::remote::client::{HttpIndexClient, MirrorIndexSource, RemoteIndexSource};
pub use crate::remote::download::{Downloader, HttpDownloader, MirrorDownloader};

// Sync
pub use crate::sync::engine::{SyncEngine, SyncPlan, SyncSettings};
pub use crate::sync::report::{EntryAction, EntryOutcome, SyncReport};
