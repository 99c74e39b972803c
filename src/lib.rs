//! Facade crate for the tilesync snapshot engine.
//!
//! This crate re-exports the tile geometry and region types and exposes the
//! replication sync engine behind the `replication` feature.

#![forbid(unsafe_code)]

pub use tilesync_core::{
    BoundingBox, BoundingBoxError, Classification, ElementStore, ElementStoreError, LogProgress,
    MergeReport, MergeRequest, NoProgress, PolygonError, PolygonFilter, ProgressReporter,
    QuadtreeKey, Region, TileIndexEntry, find_tile, nearest_tile,
};

#[cfg(feature = "test-support")]
pub use tilesync_core::test_support;

#[cfg(feature = "replication")]
pub use tilesync_data::{
    DiffSource, HttpDiffSource, InitialSnapshot, Manifest, ManifestEntry, ManifestStore,
    ProcessElementStore, ReplicationSync, ResolvedTiles, Settings, SyncError, TileIndex,
    TileIndexError, UpdateOptions, UpdateOutcome, UpdateReport, drop_last, initialise,
};
