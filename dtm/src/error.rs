//! datamole error types.
//!
//! Every failure the library reports maps onto one [`DtmError`] variant, and
//! each variant exposes a stable `error_type()` string so callers (and the
//! CLI's JSON output) can branch on the kind without parsing messages.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DtmError>;

#[derive(Debug, Error)]
pub enum DtmError {
    /// Manifest, settings file or version not found.
    #[error("{0}")]
    NotFound(String),

    /// Manifest already exists or a tag is already taken.
    #[error("{0}")]
    AlreadyExists(String),

    /// The parent directory of a file we need to write does not exist.
    #[error("directory does not exist: {}", .0.display())]
    DirectoryMissing(PathBuf),

    /// Malformed tag, absolute data directory, malformed remote path, ...
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A hash prefix matched more than one version.
    #[error(
        "version identifier '{identifier}' is ambiguous, it matches: {}",
        .matches.join(", ")
    )]
    Ambiguous {
        identifier: String,
        matches: Vec<String>,
    },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Backend missing from the global settings.
    #[error(
        "backend '{backend}' is not configured\n\nPlease run: dtm config --backend {backend}\nOr manually edit: {}",
        .settings_path.display()
    )]
    NotConfigured {
        backend: String,
        settings_path: PathBuf,
    },

    /// Wraps errors raised while transferring data to or from a backend.
    #[error("storage error: {0}")]
    StorageFailure(String),

    #[error("{0} is not implemented yet")]
    NotImplemented(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl DtmError {
    /// Stable identifier of the error kind.
    ///
    /// These strings are part of the CLI's JSON output and must not change.
    pub fn error_type(&self) -> &'static str {
        match self {
            DtmError::NotFound(_) => "not_found",
            DtmError::AlreadyExists(_) => "already_exists",
            DtmError::DirectoryMissing(_) => "directory_missing",
            DtmError::InvalidArgument(_) => "invalid_argument",
            DtmError::Ambiguous { .. } => "ambiguous",
            DtmError::PermissionDenied(_) => "permission_denied",
            DtmError::NotConfigured { .. } => "not_configured",
            DtmError::StorageFailure(_) => "storage_failure",
            DtmError::NotImplemented(_) => "not_implemented",
            DtmError::Internal(_) => "internal",
            DtmError::Io(_) => "io_error",
            DtmError::Yaml(_) => "yaml_error",
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::AlreadyExists(message.into())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageFailure(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Convert an I/O error raised by a backend transfer into a storage failure,
    /// keeping permission problems distinguishable.
    pub(crate) fn from_transfer(context: &str, e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            Self::PermissionDenied(format!("{context}: {e}"))
        } else {
            Self::StorageFailure(format!("{context}: {e}"))
        }
    }
}
