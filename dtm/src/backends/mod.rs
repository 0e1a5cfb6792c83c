use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DtmError, Result};
use crate::ignore::IgnoreRules;
use crate::settings::BackendConfig;

pub mod local;

pub use local::LocalBackend;

/// The storage backends a project can be bound to.
///
/// Written lowercase; read through [`FromStr`], so any casing is accepted.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum BackendType {
    #[default]
    Local,
    Gcs,
    S3,
    Azure,
}

impl BackendType {
    pub const ALL: [BackendType; 4] = [
        BackendType::Local,
        BackendType::Gcs,
        BackendType::S3,
        BackendType::Azure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Local => "local",
            BackendType::Gcs => "gcs",
            BackendType::S3 => "s3",
            BackendType::Azure => "azure",
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = DtmError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        BackendType::ALL
            .into_iter()
            .find(|b| b.as_str() == lower)
            .ok_or_else(|| {
                let supported: Vec<&str> = BackendType::ALL.iter().map(|b| b.as_str()).collect();
                DtmError::invalid_argument(format!(
                    "Unsupported backend type: {s}. Supported types: {}",
                    supported.join(", ")
                ))
            })
    }
}

impl TryFrom<String> for BackendType {
    type Error = DtmError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Location of one version inside a backend: `<project>/<hash>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath {
    pub project: String,
    pub hash: String,
}

impl RemotePath {
    pub fn new(project: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            hash: hash.into(),
        }
    }

    pub fn parse(remote_path: &str) -> Result<Self> {
        match remote_path.split('/').collect::<Vec<_>>().as_slice() {
            [project, hash] if !project.is_empty() && !hash.is_empty() => {
                Ok(Self::new(*project, *hash))
            }
            _ => Err(DtmError::invalid_argument(format!(
                "Invalid remote path format: {remote_path}. Expected: project_name/version_hash"
            ))),
        }
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.hash)
    }
}

pub trait StorageBackend {
    /// Short name used in log and error messages.
    fn name(&self) -> &'static str;

    /// Prepare storage for a project, or verify an existing setup is still usable.
    fn setup(&self, project: &str) -> Result<()>;

    /// Replace the version at `remote_path` with the contents of `local_path`,
    /// leaving out anything matched by `ignore`.
    fn upload_directory(&self, local_path: &Path, remote_path: &str, ignore: &IgnoreRules)
        -> Result<()>;

    /// Replace `local_path` with the version stored at `remote_path`.
    fn download_directory(&self, remote_path: &str, local_path: &Path) -> Result<()>;

    /// Hashes of every version stored for `project`.
    fn list_versions(&self, project: &str) -> Result<Vec<String>>;

    fn version_exists(&self, project: &str, hash: &str) -> Result<bool>;

    /// Remove a stored version. Removing a missing version is a no-op.
    fn remove_version(&self, project: &str, hash: &str) -> Result<()>;
}

/// Builds the backend for `backend_type` from its block in the global settings.
pub fn create_backend(
    backend_type: BackendType,
    config: &BackendConfig,
) -> Result<Box<dyn StorageBackend>> {
    log::debug!("Creating {backend_type} storage backend");
    match backend_type {
        BackendType::Local => Ok(Box::new(LocalBackend::from_config(config)?)),
        BackendType::Gcs => Err(DtmError::NotImplemented("GCS backend".to_string())),
        BackendType::S3 => Err(DtmError::NotImplemented("S3 backend".to_string())),
        BackendType::Azure => Err(DtmError::NotImplemented("Azure backend".to_string())),
    }
}
