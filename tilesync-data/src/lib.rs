//! Persistence and replication for tilesync prefixes.
//!
//! Responsibilities:
//! - Read and write the prefix documents (`settings.json`, `filelist.json`)
//!   and the `state.csv` ledger.
//! - Talk to replication feeds over HTTP.
//! - Drive updates: discover states, fetch diffs, merge batches, commit.
//! - Resolve the tiles a region selects across a prefix's snapshots.
//!
//! Boundaries:
//! - Geometry and tile keys live in `tilesync-core`.
//! - Snapshot encoding and change application stay behind
//!   [`tilesync_core::ElementStore`]; [`ProcessElementStore`] reaches an
//!   external engine.
//!
//! Invariants:
//! - Documents are replaced atomically; diffs appear under their final name
//!   only once fully downloaded.
//! - A prefix's applied sequence numbers strictly increase.
//! - No global mutable state.

pub mod engine;
pub mod ledger;
pub mod manifest;
pub mod replication;
pub mod sync;
pub mod tile_index;
pub mod timestamp;

pub use engine::{DEFAULT_ENGINE, ProcessElementStore};
pub use ledger::{DiffLedger, LedgerError, LedgerRow};
pub use manifest::{Manifest, ManifestEntry, ManifestError, ManifestStore, Settings, SettingsError};
pub use replication::{
    DiffDescriptor, DiffSource, HttpDiffSource, HttpSourceError, ReplicationError,
    ReplicationState, TransportError,
};
pub use sync::{
    InitialSnapshot, Phase, ReplicationSync, SyncError, UpdateOptions, UpdateOutcome,
    UpdateReport, drop_last, initialise,
};
pub use tile_index::{ResolvedTiles, TileIndex, TileIndexError, TileLocation};
pub use timestamp::TimestampError;
