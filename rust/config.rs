//! Runtime location lookup.
//!
//! The FrontPanel runtime is found, in order, at the path passed to
//! `load_library`, at `$OKFP_LIBRARY_PATH`, or by its platform library name
//! through the system loader search path.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const LIBRARY_PATH_ENV: &str = "OKFP_LIBRARY_PATH";

#[cfg(target_os = "windows")]
pub const DEFAULT_LIBRARY_NAME: &str = "okFrontPanel.dll";
#[cfg(target_os = "macos")]
pub const DEFAULT_LIBRARY_NAME: &str = "libokFrontPanel.dylib";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub const DEFAULT_LIBRARY_NAME: &str = "libokFrontPanel.so";

/// Resolve the runtime path against the process environment.
pub fn library_path(explicit: Option<&Path>) -> PathBuf {
    resolve_library_path(explicit, std::env::var_os(LIBRARY_PATH_ENV))
}

fn resolve_library_path(explicit: Option<&Path>, env: Option<OsString>) -> PathBuf {
    if let Some(path) = explicit.filter(|p| !p.as_os_str().is_empty()) {
        return path.to_path_buf();
    }
    match env {
        Some(value) if !value.is_empty() => PathBuf::from(value),
        _ => PathBuf::from(DEFAULT_LIBRARY_NAME),
    }
}
