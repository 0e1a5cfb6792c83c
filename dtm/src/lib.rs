pub mod backends;
pub mod error;
pub mod hashes;
pub mod ignore;
pub mod manifest;
pub mod paths;
pub mod project;
pub mod settings;

pub use backends::{create_backend, BackendType, LocalBackend, RemotePath, StorageBackend};
pub use error::{DtmError, Result};
pub use ignore::IgnoreRules;
pub use manifest::{validate_tag, Manifest, VersionEntry};
pub use paths::find_project_root;
pub use project::{
    configure_backend, AddVersionOptions, Confirm, Datamole, InitOptions, InitOutcome,
    PullOptions, PullOutcome,
};
pub use settings::{BackendConfig, Settings, SettingsStore};

#[cfg(test)]
pub mod testutil {
    use fs_err as fs;
    use std::path::{Path, PathBuf};
    use walkdir::WalkDir;

    /// Creates a file with the given content at the specified path.
    /// Creates parent directories if needed.
    /// Returns the full path to the created file.
    pub fn create_file(dir: &Path, relative_path: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(relative_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).ok();
        }
        fs::write(&path, content).unwrap();
        path
    }

    /// Every file under `dir`, relative to it and sorted.
    pub fn list_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .map(|e| e.unwrap())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().strip_prefix(dir).unwrap().to_path_buf())
            .collect();
        files.sort();
        files
    }
}
