use std::path::{Path, PathBuf};

use directories::BaseDirs;
use fs_err as fs;

use crate::error::{DtmError, Result};

pub const MANIFEST_FILE_NAME: &str = ".datamole";
pub const IGNORE_FILE_NAME: &str = ".dtmignore";
pub const SETTINGS_FOLDER_NAME: &str = ".datamole";
pub const SETTINGS_FILE_NAME: &str = "config.yaml";
pub const DEFAULT_STORAGE_FOLDER_NAME: &str = "storage";

/// Finds the root of a datamole project by walking up from the given directory
/// until a `.datamole` manifest is found.
///
/// Returns `None` if no manifest is found before reaching the filesystem root.
pub fn find_project_root(start_dir: impl AsRef<Path>) -> Option<PathBuf> {
    let mut dir = start_dir.as_ref();
    log::debug!("Searching for project root starting from {}", dir.display());

    loop {
        if dir.join(MANIFEST_FILE_NAME).is_file() {
            log::debug!("Found project root at {}", dir.display());
            return Some(dir.to_path_buf());
        }

        dir = dir.parent()?;
    }
}

/// The per-user settings directory, `~/.datamole`.
pub fn settings_dir() -> Result<PathBuf> {
    let base = BaseDirs::new()
        .ok_or_else(|| DtmError::not_found("Cannot determine the home directory"))?;
    Ok(base.home_dir().join(SETTINGS_FOLDER_NAME))
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => return PathBuf::from(path),
    };
    match BaseDirs::new() {
        Some(base) if rest.is_empty() => base.home_dir().to_path_buf(),
        Some(base) => base.home_dir().join(rest),
        None => PathBuf::from(path),
    }
}

/// Checks that `dir` exists and can be written to before we try to put a file in it.
pub(crate) fn ensure_writable_dir(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Err(DtmError::DirectoryMissing(dir.to_path_buf()));
    }
    if fs::metadata(dir)?.permissions().readonly() {
        return Err(DtmError::permission_denied(format!(
            "directory is not writable: {}",
            dir.display()
        )));
    }
    Ok(())
}

/// Whether a directory is missing or has no entries at all.
pub(crate) fn is_missing_or_empty(dir: &Path) -> Result<bool> {
    if !dir.exists() {
        return Ok(true);
    }
    Ok(fs::read_dir(dir)?.next().is_none())
}
