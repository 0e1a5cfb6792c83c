//! Per-user settings shared by every project, stored in `~/.datamole/config.yaml`.
//!
//! ```yaml
//! backends:
//!   local:
//!     storage_path: /home/me/.datamole/storage
//!   gcs:
//!     service_account_json: /path/to/credentials.json
//!     default_bucket: my-bucket
//! ```
//!
//! The file is read once per [`SettingsStore`] and cached; [`SettingsStore::reload`]
//! drops the cache. Nothing coordinates two processes writing the file at the
//! same time: the last `save` wins.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use fs_err as fs;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::backends::BackendType;
use crate::error::{DtmError, Result};
use crate::paths::{settings_dir, DEFAULT_STORAGE_FOLDER_NAME, SETTINGS_FILE_NAME};

const STORAGE_PATH_KEY: &str = "storage_path";

/// The key/value block configuring one backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendConfig(BTreeMap<String, Value>);

impl BackendConfig {
    pub fn with_storage_path(path: impl AsRef<Path>) -> Self {
        let mut config = Self::default();
        config.set(STORAGE_PATH_KEY, path.as_ref().display().to_string());
        config
    }

    /// Returns the value for `key` if it is set and is a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), Value::String(value.into()));
    }

    pub fn storage_path(&self) -> Option<&str> {
        self.get_str(STORAGE_PATH_KEY)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    backends: BTreeMap<String, BackendConfig>,
    /// Top-level keys we do not know about survive a rewrite untouched.
    #[serde(flatten)]
    other: BTreeMap<String, Value>,
}

impl Settings {
    fn with_defaults(settings_dir: &Path) -> Self {
        let mut settings = Self::default();
        settings.set_backend(
            BackendType::Local,
            BackendConfig::with_storage_path(settings_dir.join(DEFAULT_STORAGE_FOLDER_NAME)),
        );
        settings
    }

    pub fn backend(&self, backend_type: BackendType) -> Option<&BackendConfig> {
        self.backends.get(backend_type.as_str())
    }

    /// Replaces the whole block for `backend_type`, leaving other backends alone.
    pub fn set_backend(&mut self, backend_type: BackendType, config: BackendConfig) {
        self.backends.insert(backend_type.as_str().to_string(), config);
    }

    pub fn backends(&self) -> impl Iterator<Item = (&String, &BackendConfig)> {
        self.backends.iter()
    }
}

/// Handle on the global settings file.
///
/// Create one per process (usually via [`SettingsStore::default_location`]) and
/// hand it to whatever needs backend configuration.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    cache: Mutex<Option<Settings>>,
}

impl SettingsStore {
    /// A store backed by an explicit settings file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    /// The store for `~/.datamole/config.yaml`.
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(settings_dir()?.join(SETTINGS_FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    fn lock(&self) -> MutexGuard<'_, Option<Settings>> {
        // The cache is only ever replaced wholesale, so a poisoned lock still
        // holds a consistent value.
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_from_disk(&self) -> Result<Settings> {
        if !self.path.is_file() {
            return Err(DtmError::not_found(format!(
                "Global datamole configuration not found at: {}\n\n\
                 Please run the setup first:\n  dtm config\n\n\
                 Or configure manually:\n  dtm config --backend local --storage-path ~/.datamole/storage",
                self.path.display()
            )));
        }
        log::debug!("Reading settings from {}", self.path.display());
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Settings::default());
        }
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Returns the cached settings, reading the file on first use.
    pub fn load(&self) -> Result<Settings> {
        let mut cache = self.lock();
        if let Some(settings) = cache.as_ref() {
            return Ok(settings.clone());
        }
        let settings = self.read_from_disk()?;
        *cache = Some(settings.clone());
        Ok(settings)
    }

    /// Re-reads the file, replacing whatever was cached.
    pub fn reload(&self) -> Result<Settings> {
        let mut cache = self.lock();
        let settings = self.read_from_disk()?;
        *cache = Some(settings.clone());
        Ok(settings)
    }

    /// Makes sure the settings file exists.
    ///
    /// An existing file is loaded and never overwritten. Otherwise the file is
    /// created with the local backend pointing at `~/.datamole/storage`.
    pub fn initialize_defaults(&self) -> Result<Settings> {
        if self.path.is_file() {
            log::debug!(
                "Settings already present at {}, not overwriting",
                self.path.display()
            );
            return self.reload();
        }

        let settings = Settings::with_defaults(self.dir());
        write_settings(&self.path, &settings)?;
        log::info!("Created default settings at {}", self.path.display());
        *self.lock() = Some(settings.clone());
        Ok(settings)
    }

    /// The configuration block for `backend_type`.
    pub fn backend_config(&self, backend_type: BackendType) -> Result<BackendConfig> {
        self.load()?
            .backend(backend_type)
            .cloned()
            .ok_or_else(|| DtmError::NotConfigured {
                backend: backend_type.to_string(),
                settings_path: self.path.clone(),
            })
    }

    /// Sets the block for `backend_type` in memory. Call [`SettingsStore::save`] to persist it.
    pub fn set_backend_config(&self, backend_type: BackendType, config: BackendConfig) -> Result<()> {
        let mut cache = self.lock();
        if cache.is_none() {
            *cache = Some(if self.path.is_file() {
                self.read_from_disk()?
            } else {
                Settings::default()
            });
        }
        if let Some(settings) = cache.as_mut() {
            settings.set_backend(backend_type, config);
        }
        Ok(())
    }

    /// Writes the cached settings back to disk, creating the directory if needed.
    /// With nothing cached, the file is read first so saving never loses it.
    pub fn save(&self) -> Result<()> {
        let mut cache = self.lock();
        if cache.is_none() && self.path.is_file() {
            *cache = Some(self.read_from_disk()?);
        }
        let settings = cache.clone().unwrap_or_default();
        write_settings(&self.path, &settings)?;
        log::info!("Settings saved to {}", self.path.display());
        Ok(())
    }
}

fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_yaml::to_string(settings)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> SettingsStore {
        SettingsStore::new(dir.join(".datamole").join(SETTINGS_FILE_NAME))
    }

    fn read_yaml(path: &Path) -> Value {
        serde_yaml::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn load_without_file_explains_how_to_configure() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let err = store.load().unwrap_err();
        assert!(matches!(err, DtmError::NotFound(_)));
        let msg = err.to_string();
        assert!(msg.contains("Global datamole configuration not found"));
        assert!(msg.contains("dtm config --backend local"));
    }

    #[test]
    fn initialize_defaults_seeds_local_backend() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        store.initialize_defaults().unwrap();

        assert!(store.path().is_file());
        let yaml = read_yaml(store.path());
        let storage_path = yaml["backends"]["local"]["storage_path"].as_str().unwrap();
        assert_eq!(
            PathBuf::from(storage_path),
            tmp.path().join(".datamole").join("storage")
        );
    }

    #[test]
    fn initialize_defaults_does_not_overwrite_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        store
            .set_backend_config(BackendType::Local, BackendConfig::with_storage_path("/custom"))
            .unwrap();
        store.save().unwrap();

        // A fresh process only knows the file, not the previous cache.
        let fresh = store_in(tmp.path());
        let settings = fresh.initialize_defaults().unwrap();
        assert_eq!(
            settings.backend(BackendType::Local).unwrap().storage_path(),
            Some("/custom")
        );
        let yaml = read_yaml(fresh.path());
        assert_eq!(yaml["backends"]["local"]["storage_path"].as_str(), Some("/custom"));
    }

    #[test]
    fn save_writes_backend_credentials() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        store.initialize_defaults().unwrap();

        let mut gcs = BackendConfig::default();
        gcs.set("service_account_json", "/path/to/creds.json");
        gcs.set("default_bucket", "my-bucket");
        store.set_backend_config(BackendType::Gcs, gcs).unwrap();
        store.save().unwrap();

        let yaml = read_yaml(store.path());
        assert_eq!(yaml["backends"]["gcs"]["default_bucket"].as_str(), Some("my-bucket"));
        assert_eq!(
            yaml["backends"]["gcs"]["service_account_json"].as_str(),
            Some("/path/to/creds.json")
        );
    }

    #[test]
    fn updating_one_backend_preserves_the_others() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        store.initialize_defaults().unwrap();
        store
            .set_backend_config(BackendType::Local, BackendConfig::with_storage_path("/local/path"))
            .unwrap();
        let mut gcs = BackendConfig::default();
        gcs.set("default_bucket", "my-bucket");
        store.set_backend_config(BackendType::Gcs, gcs).unwrap();
        store.save().unwrap();

        store.reload().unwrap();
        store
            .set_backend_config(
                BackendType::Local,
                BackendConfig::with_storage_path("/new/local/path"),
            )
            .unwrap();
        store.save().unwrap();

        let yaml = read_yaml(store.path());
        assert_eq!(
            yaml["backends"]["local"]["storage_path"].as_str(),
            Some("/new/local/path")
        );
        assert_eq!(yaml["backends"]["gcs"]["default_bucket"].as_str(), Some("my-bucket"));
    }

    #[test]
    fn load_is_cached_until_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        store.initialize_defaults().unwrap();
        let first = store.load().unwrap();

        fs::write(
            store.path(),
            "backends:\n  local:\n    storage_path: /elsewhere\n",
        )
        .unwrap();
        assert_eq!(store.load().unwrap(), first);

        let reloaded = store.reload().unwrap();
        assert_eq!(
            reloaded.backend(BackendType::Local).unwrap().storage_path(),
            Some("/elsewhere")
        );
    }

    #[test]
    fn missing_backend_is_not_configured() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        store.initialize_defaults().unwrap();

        let err = store.backend_config(BackendType::Gcs).unwrap_err();
        assert!(matches!(err, DtmError::NotConfigured { .. }));
        assert!(err.to_string().contains("backend 'gcs' is not configured"));
        assert!(store.backend_config(BackendType::Local).is_ok());
    }

    #[test]
    fn save_on_a_fresh_store_keeps_the_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        store
            .set_backend_config(BackendType::Local, BackendConfig::with_storage_path("/custom"))
            .unwrap();
        store.save().unwrap();

        let fresh = store_in(tmp.path());
        fresh.save().unwrap();
        let yaml = read_yaml(fresh.path());
        assert_eq!(yaml["backends"]["local"]["storage_path"].as_str(), Some("/custom"));
    }

    #[test]
    fn unknown_top_level_keys_survive_a_rewrite() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            "backends:\n  local:\n    storage_path: /data\ntelemetry: false\n",
        )
        .unwrap();

        store.load().unwrap();
        store.save().unwrap();
        let yaml = read_yaml(store.path());
        assert_eq!(yaml["telemetry"].as_bool(), Some(false));
        assert_eq!(yaml["backends"]["local"]["storage_path"].as_str(), Some("/data"));
    }
}
