//! Daemon subsystem: poll scheduler, signal handling and systemd integration.

#[cfg(feature = "daemon")]
pub mod scheduler;
pub mod service;
#[cfg(feature = "daemon")]
pub mod signals;
