//! Windows GDI registrar.

#![allow(unsafe_code)]
#![allow(missing_docs)]

use std::os::windows::ffi::OsStrExt;
use std::path::Path;

use windows_sys::Win32::Graphics::Gdi::{AddFontResourceW, RemoveFontResourceW};
use windows_sys::Win32::UI::WindowsAndMessaging::{HWND_BROADCAST, PostMessageW, WM_FONTCHANGE};

use crate::platform::pal::ResourceRegistrar;

/// Registers fonts for the current session via `AddFontResourceW`.
///
/// GDI keeps its own per-call reference count, which is why callers drain.
#[derive(Debug, Default)]
pub struct GdiRegistrar;

impl GdiRegistrar {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn to_wide(path: &Path) -> Vec<u16> {
    path.as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

impl ResourceRegistrar for GdiRegistrar {
    fn register(&self, path: &Path) -> bool {
        let wide = to_wide(path);
        // SAFETY: `wide` is NUL-terminated and outlives the call.
        unsafe { AddFontResourceW(wide.as_ptr()) > 0 }
    }

    fn unregister(&self, path: &Path) -> bool {
        let wide = to_wide(path);
        // SAFETY: `wide` is NUL-terminated and outlives the call.
        unsafe { RemoveFontResourceW(wide.as_ptr()) != 0 }
    }

    fn broadcast_change(&self) {
        // SAFETY: posting a parameterless broadcast message has no pointer arguments.
        let posted = unsafe { PostMessageW(HWND_BROADCAST, WM_FONTCHANGE, 0, 0) };
        if posted == 0 {
            eprintln!("[FSY-PLATFORM] WM_FONTCHANGE broadcast failed");
        }
    }

    fn name(&self) -> &'static str {
        "gdi"
    }
}
