use std::path::{Path, PathBuf};

use fs_err as fs;
use walkdir::WalkDir;

use crate::backends::{RemotePath, StorageBackend};
use crate::error::{DtmError, Result};
use crate::ignore::IgnoreRules;
use crate::paths::expand_tilde;
use crate::settings::BackendConfig;

const WRITE_CHECK_FILENAME: &str = ".datamole_test";

/// Stores versions as plain directory trees: `<base>/<project>/<hash>/...`.
///
/// Works for a local disk as well as a mounted network drive.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalBackend {
    pub path: PathBuf,
}

impl LocalBackend {
    /// Accepts `/abs/path`, `~/path` or `file:///abs/path`.
    pub fn new(storage_path: &str) -> Self {
        let raw = storage_path.strip_prefix("file://").unwrap_or(storage_path);
        Self {
            path: expand_tilde(raw),
        }
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let storage_path = config.storage_path().ok_or_else(|| {
            DtmError::invalid_argument(
                "Local backend configuration missing 'storage_path'.\n\
                 Please run: dtm config --backend local --storage-path <path>",
            )
        })?;
        Ok(Self::new(storage_path))
    }

    fn version_path(&self, remote: &RemotePath) -> PathBuf {
        self.path.join(&remote.project).join(&remote.hash)
    }
}

/// Copies the tree under `source` into `dest`, skipping ignored entries.
/// `dest` must not exist yet.
fn copy_tree(source: &Path, dest: &Path, ignore: &IgnoreRules) -> std::io::Result<usize> {
    fs::create_dir_all(dest)?;
    let mut copied = 0;

    let walker = WalkDir::new(source).min_depth(1).into_iter().filter_entry(|e| {
        e.path()
            .strip_prefix(source)
            .map(|rel| !ignore.is_ignored(rel))
            .unwrap_or(true)
    });

    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

fn replace_with_copy(source: &Path, dest: &Path, ignore: &IgnoreRules) -> std::io::Result<usize> {
    if dest.exists() {
        log::debug!("Removing existing {}", dest.display());
        fs::remove_dir_all(dest)?;
    }
    copy_tree(source, dest, ignore)
}

impl StorageBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn setup(&self, project: &str) -> Result<()> {
        let project_path = self.path.join(project);
        log::debug!("Creating project storage: {}", project_path.display());

        let check_file = project_path.join(WRITE_CHECK_FILENAME);
        let result = fs::create_dir_all(&project_path)
            .and_then(|_| fs::write(&check_file, b""))
            .and_then(|_| fs::remove_file(&check_file));

        match result {
            Ok(()) => {
                log::info!("Storage ready at {}", project_path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(DtmError::permission_denied(format!(
                    "No write permission for storage location: {}",
                    self.path.display()
                )))
            }
            Err(e) => Err(DtmError::storage(format!(
                "Failed to set up project storage: {e}"
            ))),
        }
    }

    fn upload_directory(
        &self,
        local_path: &Path,
        remote_path: &str,
        ignore: &IgnoreRules,
    ) -> Result<()> {
        if !local_path.exists() {
            return Err(DtmError::storage(format!(
                "Local path does not exist: {}",
                local_path.display()
            )));
        }
        if !local_path.is_dir() {
            return Err(DtmError::storage(format!(
                "Local path is not a directory: {}",
                local_path.display()
            )));
        }

        let remote = RemotePath::parse(remote_path)?;
        let dest = self.version_path(&remote);
        log::debug!("Uploading {} to {}", local_path.display(), dest.display());

        let copied = replace_with_copy(local_path, &dest, ignore)
            .map_err(|e| DtmError::from_transfer("Failed to upload directory", e))?;
        log::info!("Uploaded {copied} file(s) to {remote}");
        Ok(())
    }

    fn download_directory(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let remote = RemotePath::parse(remote_path)?;
        let source = self.version_path(&remote);
        if !source.is_dir() {
            return Err(DtmError::not_found(format!(
                "Version not found in storage: {remote}"
            )));
        }

        log::debug!("Downloading {} to {}", source.display(), local_path.display());
        let copied = replace_with_copy(&source, local_path, &IgnoreRules::default())
            .map_err(|e| DtmError::from_transfer("Failed to download directory", e))?;
        log::info!("Downloaded {copied} file(s) from {remote}");
        Ok(())
    }

    fn list_versions(&self, project: &str) -> Result<Vec<String>> {
        let project_path = self.path.join(project);
        if !project_path.is_dir() {
            return Ok(Vec::new());
        }

        let mut versions = Vec::new();
        for entry in fs::read_dir(&project_path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                versions.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        versions.sort();
        Ok(versions)
    }

    fn version_exists(&self, project: &str, hash: &str) -> Result<bool> {
        Ok(self.version_path(&RemotePath::new(project, hash)).is_dir())
    }

    fn remove_version(&self, project: &str, hash: &str) -> Result<()> {
        let path = self.version_path(&RemotePath::new(project, hash));
        if path.is_dir() {
            log::debug!("Removing {} from storage", path.display());
            fs::remove_dir_all(&path)
                .map_err(|e| DtmError::from_transfer("Failed to remove version", e))?;
        }
        Ok(())
    }
}
