//! Project-level operations: the commands `dtm` exposes, wired through the
//! manifest, the global settings and a storage backend.

use std::path::{Path, PathBuf};

use path_absolutize::Absolutize;

use crate::backends::{create_backend, BackendType, RemotePath, StorageBackend};
use crate::error::{DtmError, Result};
use crate::hashes::unique_hash;
use crate::ignore::IgnoreRules;
use crate::manifest::{Manifest, VersionEntry};
use crate::paths::{find_project_root, is_missing_or_empty, MANIFEST_FILE_NAME};
use crate::settings::{BackendConfig, Settings, SettingsStore};

/// Asks the user before something destructive happens.
pub trait Confirm {
    fn confirm(&mut self, prompt: &str) -> bool;
}

impl<F> Confirm for F
where
    F: FnMut(&str) -> bool,
{
    fn confirm(&mut self, prompt: &str) -> bool {
        self(prompt)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Data directory to track, relative to the project root.
    pub data_directory: Option<PathBuf>,
    /// Only used for a new project. An existing manifest keeps its backend.
    pub backend: BackendType,
    /// Skip pulling the current version when re-attaching to a project.
    pub no_pull: bool,
}

#[derive(Debug)]
pub enum InitOutcome {
    Created(Manifest),
    /// The manifest already existed.
    Attached {
        manifest: Manifest,
        /// Hash of the version pulled into an empty data directory.
        pulled: Option<String>,
        /// Why the automatic pull failed.
        warning: Option<String>,
    },
}

impl InitOutcome {
    pub fn manifest(&self) -> &Manifest {
        match self {
            InitOutcome::Created(manifest) => manifest,
            InitOutcome::Attached { manifest, .. } => manifest,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AddVersionOptions {
    /// Defaults to the tracked data directory.
    pub data_dir: Option<PathBuf>,
    pub message: Option<String>,
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// Hash, hash prefix, tag or `latest`. `None` means `latest`.
    pub version: Option<String>,
    /// Where to put the data instead of the tracked data directory.
    pub to: Option<PathBuf>,
    /// Overwrite a non-empty destination without asking.
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    Pulled { hash: String, destination: PathBuf },
    /// The user refused to overwrite the destination. Nothing changed.
    Declined { hash: String, destination: PathBuf },
}

fn now_rfc3339() -> String {
    jiff::Timestamp::now()
        .strftime("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    Ok(path.absolutize()?.into_owned())
}

/// A datamole project rooted at the directory holding its `.datamole` file.
#[derive(Debug)]
pub struct Datamole {
    root: PathBuf,
    settings: SettingsStore,
}

impl Datamole {
    pub fn new(root: impl Into<PathBuf>, settings: SettingsStore) -> Self {
        let root = root.into();
        let root = match root.absolutize() {
            Ok(p) => p.into_owned(),
            Err(_) => root.clone(),
        };
        Self { root, settings }
    }

    /// Opens the project containing `start`, walking up to find its manifest.
    pub fn discover(start: impl AsRef<Path>, settings: SettingsStore) -> Result<Self> {
        let start = start.as_ref();
        let root = find_project_root(start).ok_or_else(|| {
            DtmError::not_found(format!(
                "No .datamole file found in {} or any parent directory\nRun `dtm init` first.",
                start.display()
            ))
        })?;
        Ok(Self::new(root, settings))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE_NAME)
    }

    pub fn load_manifest(&self) -> Result<Manifest> {
        Manifest::load(self.manifest_path())
    }

    fn project_name(&self) -> Result<String> {
        self.root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                DtmError::invalid_argument(format!(
                    "Cannot derive a project name from {}",
                    self.root.display()
                ))
            })
    }

    fn resolve_in_root(&self, path: &Path) -> Result<PathBuf> {
        if path.is_absolute() {
            absolutize(path)
        } else {
            absolutize(&self.root.join(path))
        }
    }

    /// `absolute` relative to the project root. It has to sit strictly inside
    /// the root, so it can never hold the manifest itself.
    fn data_dir_in_project(&self, absolute: &Path) -> Result<PathBuf> {
        match absolute.strip_prefix(&self.root) {
            Ok(rel) if !rel.as_os_str().is_empty() => Ok(rel.to_path_buf()),
            _ => Err(DtmError::invalid_argument(format!(
                "Data directory must be inside the project at {}, got: {}",
                self.root.display(),
                absolute.display()
            ))),
        }
    }

    /// The tracked data directory, checked to still be inside the project.
    fn tracked_data_path(&self, manifest: &Manifest) -> Result<PathBuf> {
        let data_path = manifest.absolute_data_path()?;
        self.data_dir_in_project(&data_path)?;
        Ok(data_path)
    }

    /// Builds the backend for `backend_type` from the global settings.
    pub fn backend(&self, backend_type: BackendType) -> Result<Box<dyn StorageBackend>> {
        let config = self.settings.backend_config(backend_type)?;
        create_backend(backend_type, &config)
    }

    /// Creates the project, or re-attaches to it if the manifest already exists.
    pub fn init(&self, options: InitOptions) -> Result<InitOutcome> {
        let backend_type = if self.manifest_path().is_file() {
            let stored = self.load_manifest()?.backend_type();
            if stored != options.backend {
                log::info!(
                    "Project already uses the {stored} backend, ignoring requested {}",
                    options.backend
                );
            }
            stored
        } else {
            options.backend
        };
        let backend = self.backend(backend_type)?;
        self.init_with_backend(options, backend.as_ref())
    }

    pub fn init_with_backend(
        &self,
        options: InitOptions,
        backend: &dyn StorageBackend,
    ) -> Result<InitOutcome> {
        if self.manifest_path().is_file() {
            return self.reattach(options, backend);
        }

        let project = self.project_name()?;
        let data_directory = match &options.data_directory {
            Some(dir) => Some(self.data_dir_in_project(&self.resolve_in_root(dir)?)?),
            None => None,
        };
        log::debug!("Setting up {} storage for {project}", backend.name());
        backend.setup(&project)?;
        let manifest = Manifest::create(
            self.manifest_path(),
            project,
            data_directory,
            options.backend,
        )?;
        log::info!("Initialized datamole project in {}", self.root.display());
        Ok(InitOutcome::Created(manifest))
    }

    fn reattach(&self, options: InitOptions, backend: &dyn StorageBackend) -> Result<InitOutcome> {
        let mut manifest = self.load_manifest()?;
        log::debug!(
            "Found existing manifest for {}, verifying {} storage",
            manifest.project,
            backend.name()
        );
        backend.setup(&manifest.project)?;

        if let Some(requested) = options.data_directory {
            let requested = self.data_dir_in_project(&self.resolve_in_root(&requested)?)?;
            match manifest.data_directory.clone() {
                None => {
                    manifest.set_data_directory(requested)?;
                    manifest.save()?;
                }
                Some(tracked) if tracked != requested => log::warn!(
                    "Project already tracks {}, ignoring requested data directory {}",
                    tracked.display(),
                    requested.display()
                ),
                Some(_) => {}
            }
        }

        let mut pulled = None;
        let mut warning = None;
        if !options.no_pull {
            match self.auto_pull(&mut manifest, backend) {
                Ok(hash) => pulled = hash,
                Err(e) => {
                    log::warn!("Could not pull the current version: {e}");
                    warning = Some(e.to_string());
                }
            }
        }

        Ok(InitOutcome::Attached {
            manifest,
            pulled,
            warning,
        })
    }

    /// Downloads the current version when the data directory is missing or empty.
    fn auto_pull(
        &self,
        manifest: &mut Manifest,
        backend: &dyn StorageBackend,
    ) -> Result<Option<String>> {
        let Some(hash) = manifest.current_version.clone() else {
            return Ok(None);
        };
        if manifest.data_directory.is_none() {
            return Ok(None);
        }
        let data_path = self.tracked_data_path(manifest)?;
        if !is_missing_or_empty(&data_path)? {
            log::debug!("{} already has data, not pulling", data_path.display());
            return Ok(None);
        }
        let remote = RemotePath::new(manifest.project.as_str(), hash.as_str());
        backend.download_directory(&remote.to_string(), &data_path)?;
        log::info!("Pulled version {hash} into {}", data_path.display());
        Ok(Some(hash))
    }

    /// Snapshots the data directory as a new version and makes it current.
    pub fn add_version(&self, options: AddVersionOptions) -> Result<VersionEntry> {
        let manifest = self.load_manifest()?;
        let backend = self.backend(manifest.backend_type())?;
        self.commit_new_version(manifest, options, backend.as_ref())
    }

    pub fn add_version_with_backend(
        &self,
        options: AddVersionOptions,
        backend: &dyn StorageBackend,
    ) -> Result<VersionEntry> {
        let manifest = self.load_manifest()?;
        self.commit_new_version(manifest, options, backend)
    }

    fn commit_new_version(
        &self,
        mut manifest: Manifest,
        options: AddVersionOptions,
        backend: &dyn StorageBackend,
    ) -> Result<VersionEntry> {
        let tag = options
            .tag
            .as_deref()
            .map(|tag| manifest.check_new_tag(tag))
            .transpose()?;
        let data_path = self.select_data_dir(&mut manifest, options.data_dir.as_deref())?;
        if !data_path.exists() {
            return Err(DtmError::not_found(format!(
                "Data directory not found: {}",
                data_path.display()
            )));
        }
        if !data_path.is_dir() {
            return Err(DtmError::invalid_argument(format!(
                "Data path is not a directory: {}",
                data_path.display()
            )));
        }
        if is_missing_or_empty(&data_path)? {
            return Err(DtmError::invalid_argument(format!(
                "Data directory is empty: {}",
                data_path.display()
            )));
        }

        let hash = unique_hash(|candidate| manifest.has_version(candidate))?;
        log::debug!("Generated version hash {hash}");

        let ignore = IgnoreRules::load(&self.root)?;
        let remote = RemotePath::new(manifest.project.as_str(), hash.as_str());
        log::debug!(
            "Uploading {} to {} storage at {remote}",
            data_path.display(),
            backend.name()
        );
        backend.upload_directory(&data_path, &remote.to_string(), &ignore)?;

        let entry = VersionEntry::new(hash, now_rfc3339())
            .with_message(options.message)
            .with_tag(tag)
            .with_author(whoami::username().ok());
        let entry = manifest.commit_version(entry)?.clone();
        log::info!("Added version {}", entry.hash);
        Ok(entry)
    }

    /// The absolute data directory to snapshot. An explicit directory must sit
    /// inside the project and agree with the tracked one; if nothing is tracked
    /// yet it becomes the tracked directory (in memory, saved with the commit).
    fn select_data_dir(&self, manifest: &mut Manifest, explicit: Option<&Path>) -> Result<PathBuf> {
        let Some(explicit) = explicit else {
            if manifest.data_directory.is_none() {
                return Err(DtmError::invalid_argument(
                    "No data directory is tracked for this project.\n\
                     Run `dtm add-version <data_dir>` or `dtm init --data-dir <data_dir>`.",
                ));
            }
            return self.tracked_data_path(manifest);
        };

        let requested = self.resolve_in_root(explicit)?;
        let relative = self.data_dir_in_project(&requested)?;

        if manifest.data_directory.is_some() {
            let tracked = self.tracked_data_path(manifest)?;
            if tracked != requested {
                return Err(DtmError::invalid_argument(format!(
                    "Project tracks {}, not {}",
                    tracked.display(),
                    requested.display()
                )));
            }
        } else {
            log::info!("Tracking data directory {}", relative.display());
            manifest.set_data_directory(relative)?;
        }
        Ok(requested)
    }

    /// Downloads a version, asking through `confirm` before overwriting data.
    pub fn pull(&self, options: PullOptions, confirm: &mut dyn Confirm) -> Result<PullOutcome> {
        let manifest = self.load_manifest()?;
        let backend = self.backend(manifest.backend_type())?;
        self.pull_into(manifest, options, confirm, backend.as_ref())
    }

    pub fn pull_with_backend(
        &self,
        options: PullOptions,
        confirm: &mut dyn Confirm,
        backend: &dyn StorageBackend,
    ) -> Result<PullOutcome> {
        let manifest = self.load_manifest()?;
        self.pull_into(manifest, options, confirm, backend)
    }

    fn pull_into(
        &self,
        mut manifest: Manifest,
        options: PullOptions,
        confirm: &mut dyn Confirm,
        backend: &dyn StorageBackend,
    ) -> Result<PullOutcome> {
        let hash = manifest.resolve(options.version.as_deref())?.hash.clone();

        let tracked = match &manifest.data_directory {
            Some(_) => Some(self.tracked_data_path(&manifest)?),
            None => None,
        };
        let destination = match (&options.to, &tracked) {
            (Some(to), _) => self.resolve_in_root(to)?,
            (None, Some(tracked)) => tracked.clone(),
            (None, None) => {
                return Err(DtmError::invalid_argument(
                    "No data directory is tracked for this project. Use --to <path>.",
                ))
            }
        };
        // The destination is wiped before the copy.
        if self.root.starts_with(&destination) {
            return Err(DtmError::invalid_argument(format!(
                "Cannot pull into {}, it contains the project at {}",
                destination.display(),
                self.root.display()
            )));
        }

        if !options.force && !is_missing_or_empty(&destination)? {
            let prompt = format!(
                "{} is not empty. Replace its contents with version {hash}?",
                destination.display()
            );
            if !confirm.confirm(&prompt) {
                log::info!("Pull of {hash} cancelled");
                return Ok(PullOutcome::Declined { hash, destination });
            }
        }

        let remote = RemotePath::new(manifest.project.as_str(), hash.as_str());
        log::debug!(
            "Downloading {remote} from {} storage to {}",
            backend.name(),
            destination.display()
        );
        backend.download_directory(&remote.to_string(), &destination)?;

        if tracked.as_deref() == Some(destination.as_path()) {
            manifest.set_current_version(&hash)?;
        }
        log::info!("Pulled version {hash} into {}", destination.display());
        Ok(PullOutcome::Pulled { hash, destination })
    }

    pub fn current_version(&self) -> Result<Option<VersionEntry>> {
        Ok(self.load_manifest()?.current().cloned())
    }

    pub fn list_versions(&self) -> Result<Vec<VersionEntry>> {
        Ok(self.load_manifest()?.versions)
    }

    /// Forgets a version. With `purge` the stored copy is removed too.
    pub fn delete_version(&self, identifier: &str, purge: bool) -> Result<VersionEntry> {
        let manifest = self.load_manifest()?;
        if purge {
            let backend = self.backend(manifest.backend_type())?;
            self.remove_version(manifest, identifier, Some(backend.as_ref()))
        } else {
            self.remove_version(manifest, identifier, None)
        }
    }

    pub fn delete_version_with_backend(
        &self,
        identifier: &str,
        backend: &dyn StorageBackend,
    ) -> Result<VersionEntry> {
        let manifest = self.load_manifest()?;
        self.remove_version(manifest, identifier, Some(backend))
    }

    fn remove_version(
        &self,
        mut manifest: Manifest,
        identifier: &str,
        purge_from: Option<&dyn StorageBackend>,
    ) -> Result<VersionEntry> {
        let hash = manifest.resolve(Some(identifier))?.hash.clone();
        if manifest.current_version.as_deref() == Some(hash.as_str()) {
            return Err(DtmError::invalid_argument(format!(
                "Cannot delete {hash}, it is the current version.\n\
                 Pull another version first: dtm pull-version <version>"
            )));
        }
        if let Some(backend) = purge_from {
            log::debug!("Removing {hash} from {} storage", backend.name());
            backend.remove_version(&manifest.project, &hash)?;
        }
        let removed = manifest.remove_version_entry(&hash)?;
        log::info!("Deleted version {hash}");
        Ok(removed)
    }
}

/// Replaces the settings block of one backend, creating the settings file if needed.
pub fn configure_backend(
    settings: &SettingsStore,
    backend_type: BackendType,
    config: BackendConfig,
) -> Result<Settings> {
    settings.initialize_defaults()?;
    settings.set_backend_config(backend_type, config)?;
    settings.save()?;
    log::info!("Configured {backend_type} backend");
    settings.reload()
}
