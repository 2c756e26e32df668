//! Host integration: font registration with the rendering subsystem.

#[cfg(windows)]
pub mod gdi;
pub mod pal;
