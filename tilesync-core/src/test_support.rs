//! Test-only collaborators used by unit and behaviour tests.

use std::{
    collections::HashMap,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use camino::{Utf8Path, Utf8PathBuf};

use crate::{
    ElementStore, ElementStoreError, MergeReport, MergeRequest, ProgressReporter, QuadtreeKey,
    TileIndexEntry,
};

/// In-memory [`ElementStore`].
///
/// Tile indexes live in a map keyed by snapshot path. Merges write a small
/// marker file to the requested output so callers can observe and delete
/// it, register a single-tile index for it and count one tile per change
/// file.
#[derive(Debug, Default)]
pub struct MemoryElementStore {
    indexes: Mutex<HashMap<Utf8PathBuf, Vec<TileIndexEntry>>>,
    merges: Mutex<Vec<MergeRequest>>,
    fail_merges: AtomicBool,
}

impl MemoryElementStore {
    /// Register the tile index of the snapshot at `path`.
    pub fn with_index<I>(self, path: impl Into<Utf8PathBuf>, entries: I) -> Self
    where
        I: IntoIterator<Item = TileIndexEntry>,
    {
        self.insert_index(path.into(), entries.into_iter().collect());
        self
    }

    /// Make every later merge fail after writing a partial output file.
    pub fn fail_merges(&self, fail: bool) {
        self.fail_merges.store(fail, Ordering::SeqCst);
    }

    /// Requests received by [`ElementStore::merge_changes`], oldest first.
    pub fn merges(&self) -> Vec<MergeRequest> {
        self.merges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn insert_index(&self, path: Utf8PathBuf, entries: Vec<TileIndexEntry>) {
        self.indexes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path, entries);
    }
}

impl ElementStore for MemoryElementStore {
    fn read_tile_index(&self, path: &Utf8Path) -> Result<Vec<TileIndexEntry>, ElementStoreError> {
        self.indexes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| ElementStoreError::MissingIndex {
                path: path.to_owned(),
            })
    }

    fn write_tile_index(&self, path: &Utf8Path) -> Result<u64, ElementStoreError> {
        let mut indexes = self.indexes.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = indexes.entry(path.to_owned()).or_insert_with(|| {
            vec![TileIndexEntry {
                key: QuadtreeKey::ROOT,
                offset: 0,
                size: 0,
            }]
        });
        Ok(entries.len() as u64)
    }

    fn merge_changes(&self, request: &MergeRequest) -> Result<MergeReport, ElementStoreError> {
        self.merges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        let output = request.prefix.join(&request.output);
        let body = request
            .changes
            .iter()
            .map(|change| format!("{change}\n"))
            .collect::<String>();
        std::fs::write(&output, body).map_err(|source| ElementStoreError::Io {
            path: output.clone(),
            source,
        })?;
        if self.fail_merges.load(Ordering::SeqCst) {
            return Err(ElementStoreError::Engine {
                message: format!("refusing to merge into {output}"),
            });
        }
        self.insert_index(
            output,
            vec![TileIndexEntry {
                key: QuadtreeKey::ROOT,
                offset: 0,
                size: request.changes.len() as u64,
            }],
        );
        Ok(MergeReport {
            tiles: request.changes.len() as u64,
        })
    }
}

/// [`ProgressReporter`] that records every message.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    messages: Mutex<Vec<String>>,
}

impl RecordingProgress {
    /// Messages received so far.
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(&self, message: String) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }
}

impl ProgressReporter for RecordingProgress {
    fn report_progress(&self, fraction: f64, message: &str) {
        self.push(format!("{:.0}% {message}", fraction * 100.0));
    }

    fn report_message(&self, message: &str) {
        self.push(message.to_owned());
    }
}
