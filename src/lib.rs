#![deny(unsafe_code)]

//! fontsync: background agent keeping a managed font directory in step with a
//! remote font index.
//!
//! Each sync pass runs in three phases:
//! 1. **Eviction**: fonts no longer listed remotely are unregistered and deleted
//! 2. **Reconcile**: new or stale fonts are downloaded with bounded retries and
//!    re-registered as many times as they were registered before
//! 3. **Commit**: the surviving managed set is written atomically to the index
//!
//! # Library usage
//!
//! ```rust,no_run
//! use fontsync::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use fontsync::core::config::Config;
//! use fontsync::sync::engine::{SyncEngine, SyncSettings};
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod fonts;
pub mod logger;
pub mod platform;
pub mod remote;
pub mod sync;
