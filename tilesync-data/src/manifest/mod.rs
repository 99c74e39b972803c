//! Durable manifest and settings for a snapshot prefix.
//!
//! A prefix is a directory holding `settings.json`, `filelist.json` and the
//! snapshot files the manifest lists. Both JSON documents are replaced
//! atomically, so a reader never sees a half-written manifest.

mod entry;
mod error;
mod settings;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Serialize, de::DeserializeOwned};

pub use entry::{Manifest, ManifestEntry};
pub use error::ManifestError;
pub use settings::{DEFAULT_SOURCE_URL, Settings, SettingsError};

/// File name of the snapshot list.
pub const MANIFEST_FILE: &str = "filelist.json";
/// File name of the settings document.
pub const SETTINGS_FILE: &str = "settings.json";

/// Reads and writes the JSON documents of one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestStore {
    prefix: Utf8PathBuf,
}

impl ManifestStore {
    /// Store rooted at `prefix`.
    #[must_use]
    pub fn new(prefix: impl Into<Utf8PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The prefix directory.
    #[must_use]
    pub fn prefix(&self) -> &Utf8Path {
        &self.prefix
    }

    /// Path of `filelist.json`.
    #[must_use]
    pub fn manifest_path(&self) -> Utf8PathBuf {
        self.prefix.join(MANIFEST_FILE)
    }

    /// Path of `settings.json`.
    #[must_use]
    pub fn settings_path(&self) -> Utf8PathBuf {
        self.prefix.join(SETTINGS_FILE)
    }

    /// Path of a snapshot listed in the manifest.
    #[must_use]
    pub fn snapshot_path(&self, filename: &str) -> Utf8PathBuf {
        self.prefix.join(filename)
    }

    /// Whether a manifest exists.
    pub fn has_manifest(&self) -> Result<bool, ManifestError> {
        let path = self.manifest_path();
        tilesync_fs::file_is_file(&path).map_err(|source| ManifestError::Io { path, source })
    }

    /// Load the settings; a missing file is [`ManifestError::ConfigMissing`].
    pub fn load_settings(&self) -> Result<Settings, ManifestError> {
        let path = self.settings_path();
        read_json(&path, |path| ManifestError::ConfigMissing { path })
    }

    /// Replace the settings.
    pub fn save_settings(&self, settings: &Settings) -> Result<(), ManifestError> {
        write_json(&self.settings_path(), settings)
    }

    /// Load the manifest, which must list at least the initial snapshot.
    pub fn load(&self) -> Result<Manifest, ManifestError> {
        let path = self.manifest_path();
        let manifest: Manifest = read_json(&path, |path| ManifestError::ManifestMissing { path })?;
        if manifest.is_empty() {
            return Err(ManifestError::Empty { path });
        }
        Ok(manifest)
    }

    /// Replace the manifest.
    pub fn save(&self, manifest: &Manifest) -> Result<(), ManifestError> {
        write_json(&self.manifest_path(), manifest)
    }
}

fn read_json<T, F>(path: &Utf8Path, missing: F) -> Result<T, ManifestError>
where
    T: DeserializeOwned,
    F: FnOnce(Utf8PathBuf) -> ManifestError,
{
    let path_buf = path.to_owned();
    let exists = tilesync_fs::file_is_file(path).map_err(|source| ManifestError::Io {
        path: path_buf.clone(),
        source,
    })?;
    if !exists {
        return Err(missing(path_buf));
    }
    let text = tilesync_fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path_buf.clone(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ManifestError::Parse {
        path: path_buf,
        source,
    })
}

fn write_json<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), ManifestError> {
    let mut body = serde_json::to_vec_pretty(value).map_err(|source| ManifestError::Serialise {
        path: path.to_owned(),
        source,
    })?;
    body.push(b'\n');
    tilesync_fs::write_atomic(path, &body).map_err(|source| ManifestError::Io {
        path: path.to_owned(),
        source,
    })?;
    log::debug!("wrote {path}");
    Ok(())
}
