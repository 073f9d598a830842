//! Helpers shared by the backends.

pub mod retention;

use std::fs;
use std::io::{self, ErrorKind};
use std::path::Path;

/// Creates `dir` and its parents if missing.
///
/// Fails if `dir` exists but isn't a directory.
pub fn ensure_dir(dir: &Path) -> io::Result<()> {
    if !dir.exists() {
        log::debug!(target: "util", "Creating directory: {}", dir.display());
        fs::create_dir_all(dir)?;
    }

    if dir.is_dir() {
        Ok(())
    } else {
        Err(io::Error::new(
            ErrorKind::AlreadyExists,
            format!("{} exists but is not a directory", dir.display()),
        ))
    }
}
