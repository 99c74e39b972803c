//! Creating a prefix and rolling back its newest snapshot.

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use tilesync_core::ElementStore;

use super::SyncError;
use crate::manifest::{Manifest, ManifestEntry, ManifestStore, Settings};

/// Everything `initial` needs to start a prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialSnapshot {
    /// Snapshot file name inside the prefix.
    pub filename: String,
    /// Timestamp of the newest data in the snapshot.
    pub end_date: DateTime<Utc>,
    /// Directory for downloaded diffs and the state ledger.
    pub diffs_location: Utf8PathBuf,
    /// Replication sequence the snapshot is current to.
    pub initial_sequence: u64,
    /// `key=value` settings overrides.
    pub overrides: Vec<String>,
}

/// Write the settings and a one-entry manifest for a new prefix.
///
/// The element store indexes the snapshot first, so a snapshot it cannot
/// read leaves the prefix untouched.
pub fn initialise<E: ElementStore>(
    manifests: &ManifestStore,
    store: &E,
    snapshot: &InitialSnapshot,
) -> Result<ManifestEntry, SyncError> {
    if manifests.has_manifest()? {
        return Err(SyncError::AlreadyInitialised {
            path: manifests.manifest_path(),
        });
    }
    let mut settings = Settings::new(snapshot.diffs_location.clone(), snapshot.initial_sequence);
    for input in &snapshot.overrides {
        settings.apply_override(input)?;
    }

    let path = manifests.snapshot_path(&snapshot.filename);
    let tile_count = store.write_tile_index(&path)?;
    tilesync_fs::ensure_dir(&settings.diffs_location)
        .map_err(SyncError::io(settings.diffs_location.clone()))?;
    manifests.save_settings(&settings)?;

    let entry = ManifestEntry {
        filename: snapshot.filename.clone(),
        end_date: snapshot.end_date,
        tile_count,
        sequence_number: Some(snapshot.initial_sequence),
    };
    manifests.save(&Manifest::with_initial(entry.clone()))?;
    log::info!("initialised {} with {entry}", manifests.prefix());
    Ok(entry)
}

/// Remove the newest snapshot from the manifest and delete its file.
///
/// The manifest is rewritten before the file is deleted, so an interruption
/// leaves at worst an unlisted file behind.
pub fn drop_last(manifests: &ManifestStore) -> Result<ManifestEntry, SyncError> {
    let mut manifest = manifests.load()?;
    if manifest.len() == 1 {
        let filename = manifest
            .last()
            .map(|entry| entry.filename.clone())
            .unwrap_or_default();
        return Err(SyncError::CannotDropInitial { filename });
    }
    let Some(entry) = manifest.pop() else {
        return Err(crate::manifest::ManifestError::Empty {
            path: manifests.manifest_path(),
        }
        .into());
    };
    manifests.save(&manifest)?;

    let path = manifests.snapshot_path(&entry.filename);
    let removed = tilesync_fs::remove_file(&path).map_err(SyncError::io(path.clone()))?;
    if removed {
        log::info!("dropped {entry}");
    } else {
        log::warn!("dropped {entry}; {path} was already gone");
    }
    Ok(entry)
}
