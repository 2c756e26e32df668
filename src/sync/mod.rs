//! Synchronization of the managed font directory against the remote index.

pub mod engine;
pub mod report;
