//! Helpers for running against real X servers
//!
//! Live tests need an X server binary (Xvfb or Xephyr) and a window manager
//! installed. They are gated behind the `gui-tests` feature and can be run
//! with:
//!
//! ```bash
//! cargo test -p wmprobe --features gui-tests
//! ```
//!
//! Use `program_available()` to skip gracefully:
//!
//! ```ignore
//! #[test]
//! fn my_live_test() {
//!     if !live::program_available("Xvfb") {
//!         eprintln!("Skipping: Xvfb not installed");
//!         return;
//!     }
//!     // ... test code
//! }
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::HarnessError;

/// Display numbers tried before giving up
const MAX_DISPLAY_PROBES: u32 = 64;

/// Offset from the configured base; display numbers are never reused
/// within one process
static NEXT_DISPLAY_OFFSET: AtomicU32 = AtomicU32::new(0);

/// Check whether `program` can be found on `PATH` (or exists, if it is a path)
pub fn program_available(program: &str) -> bool {
    if program.contains('/') {
        return Path::new(program).is_file();
    }
    env::var_os("PATH")
        .map(|paths| env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}

/// Lock file an X server creates for display `number`
pub fn lock_file_path(number: u32) -> PathBuf {
    PathBuf::from(format!("/tmp/.X{}-lock", number))
}

/// Unix socket an X server listens on for display `number`
pub fn socket_path(number: u32) -> PathBuf {
    PathBuf::from(format!("/tmp/.X11-unix/X{}", number))
}

/// Check whether some server already claims display `number`
pub fn display_in_use(number: u32) -> bool {
    lock_file_path(number).exists() || socket_path(number).exists()
}

/// Pick a display number at or above `base` that no server is using
pub fn allocate_display_number(base: u32) -> Result<u32, HarnessError> {
    for _ in 0..MAX_DISPLAY_PROBES {
        let number = base.saturating_add(NEXT_DISPLAY_OFFSET.fetch_add(1, Ordering::SeqCst));
        if !display_in_use(number) {
            return Ok(number);
        }
        tracing::debug!(number, "display number in use, skipping");
    }
    Err(HarnessError::Session(format!(
        "no free display number found starting from :{}",
        base
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_is_available() {
        assert!(program_available("sh"));
        assert!(program_available("/bin/sh"));
        assert!(!program_available("definitely-not-a-real-program-name"));
    }

    #[test]
    fn display_paths_follow_x_conventions() {
        assert_eq!(lock_file_path(23), PathBuf::from("/tmp/.X23-lock"));
        assert_eq!(socket_path(23), PathBuf::from("/tmp/.X11-unix/X23"));
    }

    #[test]
    fn allocation_never_repeats() {
        let first = allocate_display_number(4000).unwrap();
        let second = allocate_display_number(4000).unwrap();
        assert_ne!(first, second);
        assert!(first >= 4000 && second >= 4000);
    }
}
