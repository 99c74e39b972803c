//! Seam to the native element engine.
//!
//! Snapshot files hold quadtree-partitioned element blocks with a trailing
//! tile index. Encoding those files, computing element quadtrees and applying
//! change files happen outside this workspace; [`ElementStore`] is the
//! contract the synchronisation engine and tile index rely on.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::QuadtreeKey;

/// One row of a snapshot's tile index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TileIndexEntry {
    /// Tile key.
    pub key: QuadtreeKey,
    /// Byte offset of the tile's block.
    pub offset: u64,
    /// Block length in bytes.
    pub size: u64,
}

/// Inputs for [`ElementStore::merge_changes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    /// Directory holding the snapshots.
    pub prefix: Utf8PathBuf,
    /// Snapshot file names in application order, initial snapshot first.
    pub inputs: Vec<String>,
    /// Change files applied in order.
    pub changes: Vec<Utf8PathBuf>,
    /// End date of the newest input snapshot.
    pub start: DateTime<Utc>,
    /// Timestamp of the last change file.
    pub end: DateTime<Utc>,
    /// File name of the snapshot to write under `prefix`.
    pub output: String,
    /// Accept changes whose author metadata is missing.
    pub allow_missing_users: bool,
}

/// Outcome of a successful merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeReport {
    /// Number of tiles written to the output snapshot.
    pub tiles: u64,
}

/// Errors raised by an [`ElementStore`].
#[derive(Debug, Error)]
pub enum ElementStoreError {
    /// Reading or writing a snapshot failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Snapshot being accessed.
        path: Utf8PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// The snapshot has no tile index.
    #[error("snapshot {path} has no tile index")]
    MissingIndex {
        /// Snapshot without an index.
        path: Utf8PathBuf,
    },
    /// The engine rejected the request or produced unreadable output.
    #[error("element engine failed: {message}")]
    Engine {
        /// What the engine reported.
        message: String,
    },
}

/// Access to snapshot tile indexes and change merging.
pub trait ElementStore {
    /// Read the tile index of the snapshot at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ElementStoreError::MissingIndex`] when the snapshot carries
    /// no index.
    fn read_tile_index(&self, path: &Utf8Path) -> Result<Vec<TileIndexEntry>, ElementStoreError>;

    /// Build the tile index of the snapshot at `path`, returning its tile
    /// count.
    ///
    /// # Errors
    ///
    /// Returns [`ElementStoreError`] when the snapshot cannot be read.
    fn write_tile_index(&self, path: &Utf8Path) -> Result<u64, ElementStoreError>;

    /// Apply `request.changes` on top of the input snapshots and write the
    /// changed tiles to `request.output`, including its tile index.
    ///
    /// # Errors
    ///
    /// Returns [`ElementStoreError`] when an input cannot be read or the
    /// engine rejects the changes.
    fn merge_changes(&self, request: &MergeRequest) -> Result<MergeReport, ElementStoreError>;
}

impl<T: ElementStore + ?Sized> ElementStore for &T {
    fn read_tile_index(&self, path: &Utf8Path) -> Result<Vec<TileIndexEntry>, ElementStoreError> {
        (**self).read_tile_index(path)
    }

    fn write_tile_index(&self, path: &Utf8Path) -> Result<u64, ElementStoreError> {
        (**self).write_tile_index(path)
    }

    fn merge_changes(&self, request: &MergeRequest) -> Result<MergeReport, ElementStoreError> {
        (**self).merge_changes(request)
    }
}
