//! The per-project `.datamole` manifest.
//!
//! The manifest is a small YAML document tracking where the project's data
//! lives, which backend stores its versions, every version created so far and
//! which of them is currently checked out:
//!
//! ```yaml
//! project: churn-model
//! data_directory: data
//! current_version: 3f9a0c1d
//! backend_type: local
//! versions:
//! - hash: 3f9a0c1d
//!   timestamp: 2026-10-17T09:30:00Z
//!   message: cleaned labels
//!   tag: v1
//! ```
//!
//! Every mutation rewrites the whole file. Version counts are expected to stay
//! in the tens, so there is no append log.

use std::path::{Path, PathBuf};

use fs_err as fs;
use path_absolutize::Absolutize;
use serde::{Deserialize, Serialize};

use crate::backends::BackendType;
use crate::error::{DtmError, Result};
use crate::paths::ensure_writable_dir;

/// Identifier that always resolves to the current version.
pub const LATEST: &str = "latest";

/// Shortest hash prefix accepted when looking a version up.
pub const MIN_PREFIX_LEN: usize = 4;

/// One recorded snapshot of the data directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub hash: String,
    /// UTC, RFC 3339.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Who created the version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl VersionEntry {
    pub fn new(hash: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            timestamp: timestamp.into(),
            message: None,
            tag: None,
            author: None,
        }
    }

    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.message = message.filter(|m| !m.is_empty());
        self
    }

    pub fn with_tag(mut self, tag: Option<String>) -> Self {
        self.tag = tag;
        self
    }

    pub fn with_author(mut self, author: Option<String>) -> Self {
        self.author = author;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub data_directory: Option<PathBuf>,
    #[serde(default)]
    pub current_version: Option<String>,
    #[serde(default)]
    backend_type: Option<BackendType>,
    #[serde(default)]
    pub versions: Vec<VersionEntry>,
    #[serde(skip)]
    path: PathBuf,
}

/// Trims a tag and checks it only uses `[A-Za-z0-9._-]`.
pub fn validate_tag(tag: &str) -> Result<String> {
    let tag = tag.trim();
    if tag.is_empty() {
        return Err(DtmError::invalid_argument("Tag cannot be empty"));
    }
    if !tag
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(DtmError::invalid_argument(format!(
            "Tag '{tag}' contains invalid characters. \
             Only alphanumeric characters, hyphens, underscores, and dots are allowed."
        )));
    }
    Ok(tag.to_string())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

impl Manifest {
    /// Creates the manifest file at `path` and writes it immediately.
    pub fn create(
        path: impl AsRef<Path>,
        project: impl Into<String>,
        data_directory: Option<PathBuf>,
        backend_type: BackendType,
    ) -> Result<Self> {
        let path = path.as_ref();
        ensure_writable_dir(parent_dir(path))?;
        if path.exists() {
            return Err(DtmError::already_exists(format!(
                "File already exists: {}",
                path.display()
            )));
        }
        if let Some(dir) = &data_directory {
            if dir.is_absolute() {
                return Err(DtmError::invalid_argument(format!(
                    "data_directory must be a relative path, got: {}",
                    dir.display()
                )));
            }
        }

        let manifest = Self {
            project: project.into(),
            data_directory,
            current_version: None,
            backend_type: Some(backend_type),
            versions: Vec::new(),
            path: path.to_path_buf(),
        };
        manifest.save()?;
        log::info!("Created manifest {}", path.display());
        Ok(manifest)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(DtmError::not_found(format!(
                "No .datamole file found at {}\nRun `dtm init` first.",
                path.display()
            )));
        }
        log::debug!("Loading manifest {}", path.display());
        let content = fs::read_to_string(path)?;
        let mut manifest: Manifest = if content.trim().is_empty() {
            serde_yaml::from_str("{}")?
        } else {
            serde_yaml::from_str(&content)?
        };
        manifest.path = path.to_path_buf();
        Ok(manifest)
    }

    /// Rewrites the whole file.
    pub fn save(&self) -> Result<()> {
        ensure_writable_dir(parent_dir(&self.path))?;
        let content = serde_yaml::to_string(self)?;
        fs::write(&self.path, content).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                DtmError::permission_denied(format!("cannot write {}", self.path.display()))
            } else {
                DtmError::Io(e)
            }
        })?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The backend this project is bound to. Manifests written before the field
    /// existed are treated as local.
    pub fn backend_type(&self) -> BackendType {
        self.backend_type.unwrap_or_default()
    }

    /// Checks a tag for a new version: well formed and not used yet.
    pub fn check_new_tag(&self, tag: &str) -> Result<String> {
        let tag = validate_tag(tag)?;
        if self.has_tag(&tag) {
            return Err(DtmError::already_exists(format!(
                "Tag '{tag}' already exists. Tags must be unique."
            )));
        }
        Ok(tag)
    }

    fn push_entry(&mut self, mut entry: VersionEntry) -> Result<()> {
        if self.has_version(&entry.hash) {
            return Err(DtmError::already_exists(format!(
                "Version {} already exists",
                entry.hash
            )));
        }
        if let Some(tag) = entry.tag.take() {
            entry.tag = Some(self.check_new_tag(&tag)?);
        }
        self.versions.push(entry);
        Ok(())
    }

    /// Appends a version and persists. Does not touch `current_version`.
    pub fn add_version_entry(
        &mut self,
        hash: impl Into<String>,
        timestamp: impl Into<String>,
        message: Option<String>,
        tag: Option<String>,
    ) -> Result<&VersionEntry> {
        let entry = VersionEntry::new(hash, timestamp)
            .with_message(message)
            .with_tag(tag);
        self.push_entry(entry)?;
        self.save()?;
        Ok(&self.versions[self.versions.len() - 1])
    }

    /// Appends a version, makes it current and persists both in one write.
    pub fn commit_version(&mut self, entry: VersionEntry) -> Result<&VersionEntry> {
        let previous = self.current_version.clone();
        self.push_entry(entry)?;
        let index = self.versions.len() - 1;
        self.current_version = Some(self.versions[index].hash.clone());
        if let Err(e) = self.save() {
            self.versions.pop();
            self.current_version = previous;
            return Err(e);
        }
        Ok(&self.versions[index])
    }

    pub fn set_current_version(&mut self, hash: &str) -> Result<()> {
        if !self.has_version(hash) {
            return Err(DtmError::not_found(format!("Version not found: {hash}")));
        }
        self.current_version = Some(hash.to_string());
        self.save()
    }

    /// Points the manifest at a new data directory. Not persisted until [`Manifest::save`].
    pub fn set_data_directory(&mut self, data_directory: impl Into<PathBuf>) -> Result<()> {
        let data_directory = data_directory.into();
        if data_directory.is_absolute() {
            return Err(DtmError::invalid_argument(format!(
                "data_directory must be a relative path, got: {}",
                data_directory.display()
            )));
        }
        self.data_directory = Some(data_directory);
        Ok(())
    }

    /// Drops a version from the history and persists.
    pub fn remove_version_entry(&mut self, hash: &str) -> Result<VersionEntry> {
        let index = self
            .versions
            .iter()
            .position(|v| v.hash == hash)
            .ok_or_else(|| DtmError::not_found(format!("Version not found: {hash}")))?;
        let removed = self.versions.remove(index);
        if self.current_version.as_deref() == Some(hash) {
            self.current_version = None;
        }
        self.save()?;
        Ok(removed)
    }

    /// The most recently created version (last in the list).
    pub fn latest_version(&self) -> Option<&VersionEntry> {
        self.versions.last()
    }

    pub fn current(&self) -> Option<&VersionEntry> {
        self.current_version
            .as_deref()
            .and_then(|hash| self.version(hash))
    }

    pub fn has_version(&self, hash: &str) -> bool {
        self.versions.iter().any(|v| v.hash == hash)
    }

    pub fn version(&self, hash: &str) -> Option<&VersionEntry> {
        self.versions.iter().find(|v| v.hash == hash)
    }

    /// Case-sensitive tag lookup.
    pub fn version_by_tag(&self, tag: &str) -> Option<&VersionEntry> {
        self.versions.iter().find(|v| v.tag.as_deref() == Some(tag))
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.version_by_tag(tag).is_some()
    }

    pub fn versions_by_hash_prefix(&self, prefix: &str) -> Result<Vec<&VersionEntry>> {
        if prefix.len() < MIN_PREFIX_LEN {
            return Err(DtmError::invalid_argument(format!(
                "Hash prefix must be at least {MIN_PREFIX_LEN} characters, got: {prefix}"
            )));
        }
        Ok(self
            .versions
            .iter()
            .filter(|v| v.hash.starts_with(prefix))
            .collect())
    }

    /// Finds the version an identifier refers to.
    ///
    /// Tried in order, first match wins:
    /// 1. nothing or `latest`: the current version
    /// 2. an exact hash
    /// 3. a hash prefix of at least 4 hex digits (several matches is an error)
    /// 4. a tag
    pub fn resolve(&self, identifier: Option<&str>) -> Result<&VersionEntry> {
        let identifier = match identifier {
            None => return self.resolve_current(),
            Some(id) if id == LATEST => return self.resolve_current(),
            Some(id) => id,
        };

        if let Some(entry) = self.version(identifier) {
            return Ok(entry);
        }

        if identifier.len() >= MIN_PREFIX_LEN && identifier.chars().all(|c| c.is_ascii_hexdigit())
        {
            let prefix = identifier.to_ascii_lowercase();
            let matches = self.versions_by_hash_prefix(&prefix)?;
            match matches.as_slice() {
                [] => {}
                [single] => return Ok(single),
                many => {
                    return Err(DtmError::Ambiguous {
                        identifier: identifier.to_string(),
                        matches: many.iter().map(|v| v.hash.clone()).collect(),
                    })
                }
            }
        }

        if let Some(entry) = self.version_by_tag(identifier) {
            return Ok(entry);
        }

        Err(DtmError::not_found(format!(
            "Version not found: {identifier}\nRun `dtm list-versions` to see available versions."
        )))
    }

    fn resolve_current(&self) -> Result<&VersionEntry> {
        let hash = self.current_version.as_deref().ok_or_else(|| {
            DtmError::not_found("No current version set. Run `dtm add-version` first.")
        })?;
        self.version(hash).ok_or_else(|| {
            DtmError::not_found(format!(
                "Current version {hash} is not recorded in {}",
                self.path.display()
            ))
        })
    }

    /// `data_directory` resolved against the directory holding the manifest file.
    pub fn absolute_data_path(&self) -> Result<PathBuf> {
        let data_directory = self
            .data_directory
            .as_ref()
            .ok_or_else(|| DtmError::invalid_argument("data_directory not configured"))?;
        let joined = parent_dir(&self.path).join(data_directory);
        Ok(joined.absolutize()?.into_owned())
    }
}
