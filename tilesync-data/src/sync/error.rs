//! Failures of the sync engine.

use camino::Utf8PathBuf;
use thiserror::Error;
use tilesync_core::ElementStoreError;

use crate::{
    ledger::LedgerError,
    manifest::{ManifestError, SettingsError},
    replication::{ReplicationError, TransportError},
};

/// Errors raised while synchronising a prefix.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Settings or manifest could not be read or written.
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    /// The `state.csv` ledger could not be read or extended.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// The replication feed failed or answered with a malformed state.
    #[error(transparent)]
    Replication(#[from] ReplicationError),
    /// The element engine failed.
    #[error(transparent)]
    ElementStore(#[from] ElementStoreError),
    /// A `key=value` settings override was rejected.
    #[error(transparent)]
    Settings(#[from] SettingsError),
    /// Local file handling failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File or directory being accessed.
        path: Utf8PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// A merged snapshot would overwrite one already in the manifest.
    #[error("snapshot {filename} is already listed in the manifest")]
    SnapshotExists {
        /// Name the merge would have written.
        filename: String,
    },
    /// A merged snapshot would end before the newest one in the manifest.
    #[error("snapshot {filename} would end at {end}, before {previous}")]
    SnapshotOutOfOrder {
        /// Name the merge would have written.
        filename: String,
        /// End date of the batch, as written to the manifest.
        end: String,
        /// End date of the newest snapshot in the manifest.
        previous: String,
    },
    /// The newest snapshot records no sequence and the ledger has no state
    /// matching its end date.
    #[error("cannot tell which replication state {filename} (ending {end_date}) is current to")]
    UnknownLastSequence {
        /// The newest snapshot in the manifest.
        filename: String,
        /// Its end date, as written to the manifest.
        end_date: String,
    },
    /// Only the initial snapshot is left.
    #[error("refusing to drop the initial snapshot {filename}")]
    CannotDropInitial {
        /// The initial snapshot.
        filename: String,
    },
    /// `initial` found an existing manifest.
    #[error("prefix already initialised: {path} exists")]
    AlreadyInitialised {
        /// The manifest that already exists.
        path: Utf8PathBuf,
    },
}

impl From<TransportError> for SyncError {
    fn from(error: TransportError) -> Self {
        Self::Replication(error.into())
    }
}

impl SyncError {
    /// Whether the prefix has no `settings.json`.
    #[must_use]
    pub const fn is_config_missing(&self) -> bool {
        matches!(self, Self::Manifest(ManifestError::ConfigMissing { .. }))
    }

    pub(crate) fn io(path: impl Into<Utf8PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let owned = path.into();
        move |source| Self::Io {
            path: owned,
            source,
        }
    }
}
