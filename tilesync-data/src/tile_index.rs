//! Resolve which snapshot blocks to read for a region.
//!
//! A prefix holds an initial snapshot and a chain of change snapshots. For
//! every tile the region selects, [`TileIndex::resolve`] lists where each
//! snapshot stores that tile, in application order, so a reader can replay
//! the tile's history.

use std::{collections::BTreeMap, sync::Arc};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tilesync_core::{
    BoundingBox, ElementStore, ElementStoreError, NoProgress, ProgressReporter, QuadtreeKey,
    Region, TileIndexEntry, fraction, nearest_tile,
};

use crate::manifest::{ManifestError, ManifestStore};
use crate::timestamp::format_end_date;

/// Where one snapshot stores a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TileLocation {
    /// Position of the snapshot in [`ResolvedTiles::files`].
    pub source_index: usize,
    /// Byte offset of the tile's block in that snapshot.
    pub offset: u64,
}

/// Outcome of [`TileIndex::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTiles {
    /// Snapshot files in application order.
    pub files: Vec<Utf8PathBuf>,
    /// Locations of every selected tile.
    pub locations: BTreeMap<QuadtreeKey, Vec<TileLocation>>,
    /// Bounds of the region that selected the tiles.
    pub bounds: BoundingBox,
}

impl ResolvedTiles {
    /// Locations of the nearest selected tile that is `key` or one of its
    /// ancestors.
    #[must_use]
    pub fn locate(&self, key: QuadtreeKey) -> Option<(QuadtreeKey, &[TileLocation])> {
        let found = nearest_tile(&self.locations, key)?;
        self.locations
            .get(&found)
            .map(|locations| (found, locations.as_slice()))
    }

    /// Number of selected tiles.
    #[must_use]
    pub fn tile_count(&self) -> usize {
        self.locations.len()
    }
}

/// Errors raised by [`TileIndex::resolve`].
#[derive(Debug, Error)]
pub enum TileIndexError {
    /// The prefix's manifest could not be read.
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    /// A snapshot's tile index could not be read.
    #[error(transparent)]
    Store(#[from] ElementStoreError),
    /// Probing the input path failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path given to [`TileIndex::resolve`].
        path: Utf8PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// No snapshot ends on or before the requested date.
    #[error("no snapshot in {prefix} ends on or before {as_of}")]
    NoSnapshots {
        /// The prefix searched.
        prefix: Utf8PathBuf,
        /// Requested date, as written to the manifest.
        as_of: String,
    },
}

/// Tile lookup across a single snapshot or a prefix.
pub struct TileIndex<E> {
    store: E,
    progress: Arc<dyn ProgressReporter>,
}

impl<E: ElementStore> TileIndex<E> {
    /// Index reading snapshots through `store`.
    pub fn new(store: E) -> Self {
        Self {
            store,
            progress: Arc::new(NoProgress),
        }
    }

    /// Report per-snapshot progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Resolve the tiles `region` selects.
    ///
    /// `path` is either a snapshot file or a prefix directory holding a
    /// manifest. For a prefix, snapshots ending after `as_of` are ignored.
    pub fn resolve(
        &self,
        path: &Utf8Path,
        region: &Region,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<ResolvedTiles, TileIndexError> {
        let is_file = tilesync_fs::file_is_file(path).map_err(|source| TileIndexError::Io {
            path: path.to_owned(),
            source,
        })?;
        let files = if is_file {
            vec![path.to_owned()]
        } else {
            self.manifest_files(path, as_of)?
        };

        let mut locations: BTreeMap<QuadtreeKey, Vec<TileLocation>> = BTreeMap::new();
        let total = files.len();
        for (source_index, file) in files.iter().enumerate() {
            self.progress
                .report_progress(fraction(source_index, total), file.as_str());
            for entry in self.read_index(file)? {
                if region.accepts_tile(entry.key) {
                    locations.entry(entry.key).or_default().push(TileLocation {
                        source_index,
                        offset: entry.offset,
                    });
                }
            }
        }
        self.progress
            .report_message(&format!("{} tiles from {total} files", locations.len()));

        Ok(ResolvedTiles {
            files,
            locations,
            bounds: region.bounds(),
        })
    }

    fn manifest_files(
        &self,
        prefix: &Utf8Path,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Vec<Utf8PathBuf>, TileIndexError> {
        let manifests = ManifestStore::new(prefix);
        let manifest = manifests.load()?;
        let files: Vec<_> = manifest
            .entries_as_of(as_of)
            .map(|entry| manifests.snapshot_path(&entry.filename))
            .collect();
        if files.is_empty() {
            return Err(TileIndexError::NoSnapshots {
                prefix: prefix.to_owned(),
                as_of: as_of.map(format_end_date).unwrap_or_default(),
            });
        }
        if as_of.is_some() {
            log::info!("using {} of {} snapshots", files.len(), manifest.len());
        }
        Ok(files)
    }

    fn read_index(&self, file: &Utf8Path) -> Result<Vec<TileIndexEntry>, TileIndexError> {
        let entries = self.store.read_tile_index(file)?;
        if entries.is_empty() {
            return Err(ElementStoreError::MissingIndex {
                path: file.to_owned(),
            }
            .into());
        }
        Ok(entries)
    }
}

#[cfg(test)]
#[expect(clippy::expect_used, reason = "tests fail fast on invalid fixtures")]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;
    use tilesync_core::test_support::{MemoryElementStore, RecordingProgress};

    use crate::manifest::{Manifest, ManifestEntry};

    struct Fixture {
        _guard: TempDir,
        prefix: Utf8PathBuf,
    }

    fn key(path: &str) -> QuadtreeKey {
        QuadtreeKey::from_path(path).expect("valid path")
    }

    fn entry(tile: &str, offset: u64) -> TileIndexEntry {
        TileIndexEntry {
            key: key(tile),
            offset,
            size: 10,
        }
    }

    fn manifest_entry(filename: &str, day: u32) -> ManifestEntry {
        ManifestEntry {
            filename: filename.to_owned(),
            end_date: Utc
                .with_ymd_and_hms(2020, 1, day, 0, 0, 0)
                .single()
                .expect("valid date"),
            tile_count: 2,
            sequence_number: Some(5000 + u64::from(day)),
        }
    }

    #[fixture]
    fn prefix() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let prefix = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 tempdir");
        let mut manifest = Manifest::with_initial(manifest_entry("planet.pbf", 1));
        manifest.push(manifest_entry("20200102.pbfc", 2));
        manifest.push(manifest_entry("20200103.pbfc", 3));
        ManifestStore::new(prefix.clone())
            .save(&manifest)
            .expect("save manifest");
        Fixture {
            _guard: dir,
            prefix,
        }
    }

    fn store(prefix: &Utf8Path) -> MemoryElementStore {
        MemoryElementStore::default()
            .with_index(prefix.join("planet.pbf"), [entry("A", 0), entry("B", 100), entry("D", 200)])
            .with_index(prefix.join("20200102.pbfc"), [entry("B", 0)])
            .with_index(prefix.join("20200103.pbfc"), [entry("A", 0), entry("B", 50)])
    }

    #[rstest]
    fn collects_locations_in_application_order(prefix: Fixture) {
        let index = TileIndex::new(store(&prefix.prefix));
        let resolved = index
            .resolve(&prefix.prefix, &Region::Planet, None)
            .expect("resolves");
        assert_eq!(resolved.files.len(), 3);
        assert_eq!(
            resolved.locations[&key("B")],
            vec![
                TileLocation { source_index: 0, offset: 100 },
                TileLocation { source_index: 1, offset: 0 },
                TileLocation { source_index: 2, offset: 50 },
            ]
        );
        assert_eq!(resolved.tile_count(), 3);
        assert_eq!(resolved.bounds, BoundingBox::planet());
    }

    #[rstest]
    fn as_of_drops_later_snapshots(prefix: Fixture) {
        let index = TileIndex::new(store(&prefix.prefix));
        let as_of = Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).single();
        let resolved = index
            .resolve(&prefix.prefix, &Region::Planet, as_of)
            .expect("resolves");
        assert_eq!(resolved.files.len(), 2);
        assert_eq!(resolved.locations[&key("A")].len(), 1);
    }

    #[rstest]
    fn as_of_before_initial_snapshot_is_an_error(prefix: Fixture) {
        let index = TileIndex::new(store(&prefix.prefix));
        let as_of = Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).single();
        let err = index
            .resolve(&prefix.prefix, &Region::Planet, as_of)
            .expect_err("nothing that old");
        assert!(matches!(err, TileIndexError::NoSnapshots { .. }));
    }

    #[rstest]
    fn region_filters_tiles(prefix: Fixture) {
        let index = TileIndex::new(store(&prefix.prefix));
        let region = Region::Box(BoundingBox::from_degrees(10.0, 10.0, 20.0, 20.0).expect("box"));
        let resolved = index.resolve(&prefix.prefix, &region, None).expect("resolves");
        assert_eq!(resolved.locations.keys().copied().collect::<Vec<_>>(), vec![key("B")]);
    }

    #[rstest]
    fn single_snapshot_is_indexed_directly(prefix: Fixture) {
        let file = prefix.prefix.join("planet.pbf");
        tilesync_fs::write_atomic(&file, b"pbf").expect("write snapshot");
        let progress = Arc::new(RecordingProgress::default());
        let index = TileIndex::new(store(&prefix.prefix)).with_progress(progress.clone());
        let resolved = index.resolve(&file, &Region::Planet, None).expect("resolves");
        assert_eq!(resolved.files, vec![file.clone()]);
        assert_eq!(resolved.tile_count(), 3);
        assert_eq!(
            progress.messages(),
            vec![format!("0% {file}"), "3 tiles from 1 files".to_owned()]
        );
    }

    #[rstest]
    fn snapshot_without_index_is_fatal(prefix: Fixture) {
        let index = TileIndex::new(
            MemoryElementStore::default().with_index(prefix.prefix.join("planet.pbf"), [entry("A", 0)]),
        );
        let err = index
            .resolve(&prefix.prefix, &Region::Planet, None)
            .expect_err("later snapshots have no index");
        assert!(matches!(
            err,
            TileIndexError::Store(ElementStoreError::MissingIndex { .. })
        ));
    }

    #[rstest]
    fn missing_manifest_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let prefix = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 tempdir");
        let index = TileIndex::new(MemoryElementStore::default());
        let err = index
            .resolve(&prefix, &Region::Planet, None)
            .expect_err("no manifest");
        assert!(matches!(
            err,
            TileIndexError::Manifest(ManifestError::ManifestMissing { .. })
        ));
    }

    #[rstest]
    fn locate_walks_to_nearest_ancestor(prefix: Fixture) {
        let index = TileIndex::new(store(&prefix.prefix));
        let resolved = index
            .resolve(&prefix.prefix, &Region::Planet, None)
            .expect("resolves");
        let (found, locations) = resolved.locate(key("BCDA")).expect("ancestor B exists");
        assert_eq!(found, key("B"));
        assert_eq!(locations.len(), 3);
        assert!(resolved.locate(key("CA")).is_none());
    }
}
