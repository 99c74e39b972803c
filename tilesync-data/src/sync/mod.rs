//! Keeping a prefix current with a replication feed.
//!
//! An update walks `Idle → Checking → Fetching → Merging → Committed → Idle`.
//! Checking loads the prefix and learns new states from the feed, appending
//! each to the `state.csv` ledger as it arrives. Fetching downloads the
//! missing change files in ascending order. Merging groups them into batches
//! and asks the [`ElementStore`] to write one snapshot per batch; the
//! manifest is persisted after every batch, so a failure part way keeps the
//! batches already merged. Any error moves the engine to
//! [`Phase::Failed`] and leaves the manifest as last committed.

mod batch;
mod error;
mod report;
mod snapshots;

use std::{
    fmt,
    sync::Arc,
    time::Instant,
};

use camino::{Utf8Path, Utf8PathBuf};
use tilesync_core::{ElementStore, MergeRequest, NoProgress, ProgressReporter, progress::fraction};

pub use batch::{Batch, DEFAULT_BATCH_LIMIT, FetchedDiff, plan_batches};
pub use error::SyncError;
pub use report::{StageTimings, UpdateOutcome, UpdateReport};
pub use snapshots::{InitialSnapshot, drop_last, initialise};

use crate::{
    ledger::{DiffLedger, LedgerRow},
    manifest::{Manifest, ManifestEntry, ManifestStore, Settings},
    replication::{DiffDescriptor, DiffSource, diff_path},
    timestamp::{format_end_date, snapshot_filename},
};

/// Where an update currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// No update running.
    #[default]
    Idle,
    /// Loading the prefix and discovering new states.
    Checking,
    /// Downloading change files.
    Fetching,
    /// Merging batches into snapshots.
    Merging,
    /// Every batch merged and recorded.
    Committed,
    /// The last update stopped on an error.
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::Fetching => "fetching",
            Self::Merging => "merging",
            Self::Committed => "committed",
            Self::Failed => "failed",
        })
    }
}

/// Knobs for a single update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateOptions {
    /// Apply at most this many diffs.
    pub max_diffs: Option<usize>,
    /// Work from the ledger alone without asking the feed for new states.
    pub offline: bool,
}

/// Synchronisation engine for one prefix.
pub struct ReplicationSync<S, E> {
    manifests: ManifestStore,
    source: S,
    store: E,
    progress: Arc<dyn ProgressReporter>,
    batch_limit: u64,
    phase: Phase,
}

impl<S, E> fmt::Debug for ReplicationSync<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationSync")
            .field("prefix", &self.manifests.prefix())
            .field("batch_limit", &self.batch_limit)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl<S: DiffSource, E: ElementStore> ReplicationSync<S, E> {
    /// Engine for the prefix directory `prefix`.
    pub fn new(prefix: impl Into<Utf8PathBuf>, source: S, store: E) -> Self {
        Self {
            manifests: ManifestStore::new(prefix),
            source,
            store,
            progress: Arc::new(NoProgress),
            batch_limit: DEFAULT_BATCH_LIMIT,
            phase: Phase::Idle,
        }
    }

    /// Report download and merge progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Close merge batches once they reach `bytes`.
    #[must_use]
    pub fn with_batch_limit(mut self, bytes: u64) -> Self {
        self.batch_limit = bytes;
        self
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The prefix's manifest store.
    #[must_use]
    pub fn manifests(&self) -> &ManifestStore {
        &self.manifests
    }

    /// Bring the prefix up to date with the feed.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] when the prefix cannot be read, the feed fails
    /// or answers inconsistently, a download fails, or a merge fails. Batches
    /// committed before the failure stay in the manifest.
    pub fn update(&mut self, options: UpdateOptions) -> Result<UpdateOutcome, SyncError> {
        let result = self.run_update(options);
        match &result {
            Ok(_) => self.transition(Phase::Idle),
            Err(err) => {
                log::warn!("update of {} failed: {err}", self.manifests.prefix());
                self.transition(Phase::Failed);
            }
        }
        result
    }

    fn run_update(&mut self, options: UpdateOptions) -> Result<UpdateOutcome, SyncError> {
        let started = Instant::now();
        self.transition(Phase::Checking);
        let settings = self.manifests.load_settings()?;
        let mut manifest = self.manifests.load()?;
        if self.source.base_url().trim_end_matches('/')
            != settings.diff_source_url.trim_end_matches('/')
        {
            log::warn!(
                "prefix expects diffs from {}, reading {}",
                settings.diff_source_url,
                self.source.base_url()
            );
        }

        let ledger = DiffLedger::in_directory(&settings.diffs_location);
        let mut known = ledger.load()?;
        let last_sequence = resolve_last_sequence(&manifest, &settings, &known)?;
        let latest = if options.offline {
            known
                .iter()
                .map(|row| row.sequence)
                .max()
                .unwrap_or(last_sequence)
        } else {
            self.discover(&ledger, &mut known, last_sequence)?
        };
        let pending = select_pending(known, last_sequence, latest, options.max_diffs);
        let mut timings = StageTimings {
            checking: started.elapsed(),
            ..StageTimings::default()
        };
        let (Some(first), Some(last)) = (pending.first(), pending.last()) else {
            log::info!("no diffs after {last_sequence}");
            return Ok(UpdateOutcome::NoNewDiffs { last_sequence });
        };
        log::info!(
            "{} diffs to apply: {}..={} (feed at {latest})",
            pending.len(),
            first.sequence,
            last.sequence
        );

        let started = Instant::now();
        self.transition(Phase::Fetching);
        let fetched = self.fetch_all(&settings.diffs_location, &pending)?;
        timings.fetching = started.elapsed();
        let downloaded = fetched.iter().filter(|diff| diff.downloaded).count();
        let reused = fetched.len() - downloaded;

        let started = Instant::now();
        self.transition(Phase::Merging);
        let limit = settings.merge_diffs.then_some(self.batch_limit);
        let batches = plan_batches(fetched, limit);
        let mut applied = Vec::with_capacity(batches.len());
        for (index, batch) in batches.iter().enumerate() {
            self.progress.report_progress(
                fraction(index, batches.len()),
                &format!("merging {} diffs", batch.diffs().len()),
            );
            let entry = self.merge(&settings, &manifest, batch)?;
            manifest.push(entry.clone());
            self.manifests.save(&manifest)?;
            log::info!("committed {entry}");
            applied.push(entry);
        }
        timings.merging = started.elapsed();
        self.transition(Phase::Committed);

        Ok(UpdateOutcome::Applied(UpdateReport {
            downloaded,
            reused,
            applied,
            timings,
        }))
    }

    /// Learn every state newer than both the ledger and `floor`, returning
    /// the feed's newest sequence.
    fn discover(
        &self,
        ledger: &DiffLedger,
        known: &mut Vec<LedgerRow>,
        floor: u64,
    ) -> Result<u64, SyncError> {
        let latest = self.source.latest_state()?;
        let highest_known = known
            .iter()
            .map(|row| row.sequence)
            .max()
            .unwrap_or(floor)
            .max(floor);
        log::debug!("feed at {latest}, ledger at {highest_known}");
        for sequence in highest_known.saturating_add(1)..=latest.sequence {
            let state = if sequence == latest.sequence {
                latest
            } else {
                self.source.state(sequence)?
            };
            let row = LedgerRow {
                sequence: state.sequence,
                timestamp: state.timestamp,
            };
            ledger.append(&[row])?;
            known.push(row);
            log::debug!("learned state {state}");
        }
        Ok(latest.sequence)
    }

    fn fetch_all(
        &self,
        diffs_location: &Utf8Path,
        pending: &[LedgerRow],
    ) -> Result<Vec<FetchedDiff>, SyncError> {
        tilesync_fs::ensure_dir(diffs_location).map_err(SyncError::io(diffs_location))?;
        pending
            .iter()
            .enumerate()
            .map(|(index, row)| {
                self.progress.report_progress(
                    fraction(index, pending.len()),
                    &format!("fetching {}", row.sequence),
                );
                self.fetch(diffs_location, *row)
            })
            .collect()
    }

    fn fetch(&self, diffs_location: &Utf8Path, row: LedgerRow) -> Result<FetchedDiff, SyncError> {
        let descriptor = DiffDescriptor {
            sequence: row.sequence,
            timestamp: row.timestamp,
            local_path: diff_path(diffs_location, row.sequence),
        };
        let path = descriptor.local_path.clone();
        if tilesync_fs::file_is_file(&path).map_err(SyncError::io(path.clone()))? {
            let size = tilesync_fs::file_size(&path).map_err(SyncError::io(path.clone()))?;
            log::debug!("{path} already downloaded");
            return Ok(FetchedDiff {
                descriptor,
                size,
                downloaded: false,
            });
        }

        let mut file = tilesync_fs::AtomicFile::create(&path).map_err(SyncError::io(path.clone()))?;
        let size = self.source.download_diff(row.sequence, &mut file)?;
        file.commit().map_err(SyncError::io(path))?;
        log::info!("downloaded {descriptor} ({size} bytes)");
        Ok(FetchedDiff {
            descriptor,
            size,
            downloaded: true,
        })
    }

    fn merge(
        &self,
        settings: &Settings,
        manifest: &Manifest,
        batch: &Batch,
    ) -> Result<ManifestEntry, SyncError> {
        let end = batch.end();
        let output = snapshot_filename(end, settings.round_time);
        if manifest.contains_filename(&output) {
            return Err(SyncError::SnapshotExists { filename: output });
        }
        if let Some(previous) = manifest.last()
            && end <= previous.end_date
        {
            return Err(SyncError::SnapshotOutOfOrder {
                filename: output,
                end: format_end_date(end),
                previous: format_end_date(previous.end_date),
            });
        }
        let request = MergeRequest {
            prefix: self.manifests.prefix().to_owned(),
            inputs: manifest.filenames(),
            changes: batch
                .diffs()
                .iter()
                .map(|diff| diff.local_path.clone())
                .collect(),
            start: manifest.last().map_or(end, |entry| entry.end_date),
            end,
            output: output.clone(),
            allow_missing_users: settings.allow_missing_users,
        };
        log::info!(
            "merging {} diffs ({} bytes) into {output}",
            batch.diffs().len(),
            batch.size()
        );
        let report = match self.store.merge_changes(&request) {
            Ok(report) => report,
            Err(err) => {
                self.discard_partial(&output);
                return Err(err.into());
            }
        };
        Ok(ManifestEntry {
            filename: output,
            end_date: end,
            tile_count: report.tiles,
            sequence_number: Some(batch.last_sequence()),
        })
    }

    fn discard_partial(&self, filename: &str) {
        let path = self.manifests.snapshot_path(filename);
        match tilesync_fs::remove_file(&path) {
            Ok(true) => log::warn!("removed partial snapshot {path}"),
            Ok(false) => {}
            Err(err) => log::warn!("failed to remove partial snapshot {path}: {err}"),
        }
    }

    fn transition(&mut self, next: Phase) {
        log::debug!("{}: {} -> {next}", self.manifests.prefix(), self.phase);
        self.phase = next;
    }
}

/// Replication sequence the newest snapshot is current to.
///
/// The newest entry's `State` wins. Older manifests may omit it; the
/// sequence is then the ledger row whose timestamp equals the entry's end
/// date, or the configured initial sequence when the entry is the initial
/// snapshot. Older entries are never consulted.
fn resolve_last_sequence(
    manifest: &Manifest,
    settings: &Settings,
    known: &[LedgerRow],
) -> Result<u64, SyncError> {
    let Some(last) = manifest.last() else {
        return Ok(settings.initial_sequence);
    };
    if let Some(sequence) = manifest.last_sequence() {
        return Ok(sequence);
    }
    if let Some(row) = known.iter().find(|row| row.timestamp == last.end_date) {
        log::debug!(
            "{} carries no state; ledger places it at {}",
            last.filename,
            row.sequence
        );
        return Ok(row.sequence);
    }
    if manifest.len() == 1 {
        return Ok(settings.initial_sequence);
    }
    Err(SyncError::UnknownLastSequence {
        filename: last.filename.clone(),
        end_date: format_end_date(last.end_date),
    })
}

/// Ledger rows in `(last_sequence, latest]`, ascending, one per sequence.
fn select_pending(
    mut known: Vec<LedgerRow>,
    last_sequence: u64,
    latest: u64,
    max_diffs: Option<usize>,
) -> Vec<LedgerRow> {
    known.retain(|row| row.sequence > last_sequence && row.sequence <= latest);
    known.sort_by_key(|row| row.sequence);
    known.dedup_by_key(|row| row.sequence);
    if let Some(max) = max_diffs {
        known.truncate(max);
    }
    known
}

#[cfg(test)]
#[expect(
    clippy::expect_used,
    clippy::indexing_slicing,
    reason = "tests fail fast on invalid fixtures"
)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rstest::{fixture, rstest};
    use tempfile::TempDir;
    use tilesync_core::test_support::MemoryElementStore;

    use crate::replication::test_support::StaticDiffSource;

    const FEED: &str = "https://example.org/day/";

    struct Prefix {
        _guard: TempDir,
        root: Utf8PathBuf,
        store: MemoryElementStore,
    }

    impl Prefix {
        fn manifests(&self) -> ManifestStore {
            ManifestStore::new(self.root.clone())
        }

        fn diffs(&self) -> Utf8PathBuf {
            self.root.join("diffs")
        }

        fn sync<'a>(
            &'a self,
            source: &'a StaticDiffSource,
        ) -> ReplicationSync<&'a StaticDiffSource, &'a MemoryElementStore> {
            ReplicationSync::new(self.root.clone(), source, &self.store)
        }

        fn sequences(&self) -> Vec<Option<u64>> {
            self.manifests()
                .load()
                .expect("manifest")
                .entries()
                .iter()
                .map(|entry| entry.sequence_number)
                .collect()
        }
    }

    fn prefix_with(overrides: &[&str]) -> Prefix {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 tempdir");
        let store = MemoryElementStore::default();
        let mut all = vec![format!("sourceprfx={FEED}")];
        all.extend(overrides.iter().map(|o| (*o).to_owned()));
        initialise(
            &ManifestStore::new(root.clone()),
            &store,
            &InitialSnapshot {
                filename: "planet.pbf".to_owned(),
                end_date: Utc
                    .with_ymd_and_hms(2020, 1, 1, 0, 0, 0)
                    .single()
                    .expect("valid date"),
                diffs_location: root.join("diffs"),
                initial_sequence: 5000,
                overrides: all,
            },
        )
        .expect("initialise");
        Prefix {
            _guard: dir,
            root,
            store,
        }
    }

    #[fixture]
    fn prefix() -> Prefix {
        prefix_with(&[])
    }

    fn day(day: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, day, 0, 0, 0)
            .single()
            .expect("valid date")
    }

    /// Append an entry written before snapshots recorded their `State`.
    fn push_entry(
        prefix: &Prefix,
        filename: &str,
        end_date: chrono::DateTime<Utc>,
        state: Option<u64>,
    ) {
        let manifests = prefix.manifests();
        let mut manifest = manifests.load().expect("manifest");
        manifest.push(ManifestEntry {
            filename: filename.to_owned(),
            end_date,
            tile_count: 0,
            sequence_number: state,
        });
        manifests.save(&manifest).expect("save manifest");
    }

    fn feed() -> StaticDiffSource {
        StaticDiffSource::new(FEED).with_daily_states(5001, 3)
    }

    fn applied(outcome: UpdateOutcome) -> UpdateReport {
        match outcome {
            UpdateOutcome::Applied(report) => report,
            UpdateOutcome::NoNewDiffs { .. } => panic!("expected diffs to be applied"),
        }
    }

    #[rstest]
    fn one_snapshot_per_diff_without_merging(prefix: Prefix) {
        let source = feed();
        let mut sync = prefix.sync(&source);
        let report = applied(sync.update(UpdateOptions::default()).expect("update"));

        assert_eq!(report.downloaded, 3);
        assert_eq!(report.applied.len(), 3);
        assert_eq!(report.last_sequence(), Some(5003));
        assert_eq!(sync.phase(), Phase::Idle);
        assert_eq!(
            prefix.sequences(),
            vec![Some(5000), Some(5001), Some(5002), Some(5003)]
        );
        assert_eq!(source.downloads(), vec![5001, 5002, 5003]);
        assert!(diff_path(&prefix.diffs(), 5002).is_file());
        let ledger = DiffLedger::in_directory(&prefix.diffs()).load().expect("ledger");
        assert_eq!(
            ledger.iter().map(|row| row.sequence).collect::<Vec<_>>(),
            vec![5001, 5002, 5003]
        );
    }

    #[rstest]
    fn merging_collapses_diffs_into_one_snapshot() {
        let prefix = prefix_with(&["mergeoscfiles=yes"]);
        let source = feed();
        let report = applied(prefix.sync(&source).update(UpdateOptions::default()).expect("update"));

        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.applied[0].filename, "20200104.pbfc");
        assert_eq!(prefix.sequences(), vec![Some(5000), Some(5003)]);
        let merges = prefix.store.merges();
        assert_eq!(merges.len(), 1);
        assert_eq!(merges[0].inputs, vec!["planet.pbf".to_owned()]);
        assert_eq!(merges[0].changes.len(), 3);
    }

    #[rstest]
    fn small_batch_limit_splits_merges() {
        let prefix = prefix_with(&["mergeoscfiles=true"]);
        let source = feed();
        let report = applied(
            prefix
                .sync(&source)
                .with_batch_limit(1)
                .update(UpdateOptions::default())
                .expect("update"),
        );
        assert_eq!(report.applied.len(), 3);
    }

    #[rstest]
    fn second_update_finds_nothing(prefix: Prefix) {
        let source = feed();
        let mut sync = prefix.sync(&source);
        sync.update(UpdateOptions::default()).expect("first update");
        let outcome = sync.update(UpdateOptions::default()).expect("second update");
        assert_eq!(outcome, UpdateOutcome::NoNewDiffs { last_sequence: 5003 });
        assert_eq!(prefix.sequences().len(), 4);
    }

    #[rstest]
    fn max_diffs_limits_the_run(prefix: Prefix) {
        let source = feed();
        let mut sync = prefix.sync(&source);
        let options = UpdateOptions {
            max_diffs: Some(2),
            offline: false,
        };
        let report = applied(sync.update(options).expect("update"));
        assert_eq!(report.last_sequence(), Some(5002));

        let report = applied(sync.update(options).expect("resume"));
        assert_eq!(report.last_sequence(), Some(5003));
        assert_eq!(source.downloads(), vec![5001, 5002, 5003]);
    }

    #[rstest]
    fn offline_update_uses_the_ledger(prefix: Prefix) {
        let source = feed();
        let mut sync = prefix.sync(&source);
        sync.update(UpdateOptions {
            max_diffs: Some(1),
            offline: false,
        })
        .expect("partial update");
        let requests = source.state_requests().len();

        let report = applied(
            sync.update(UpdateOptions {
                max_diffs: None,
                offline: true,
            })
            .expect("offline update"),
        );
        assert_eq!(report.last_sequence(), Some(5003));
        assert_eq!(source.state_requests().len(), requests);
    }

    #[rstest]
    fn present_diffs_are_not_downloaded_again(prefix: Prefix) {
        let source = feed();
        tilesync_fs::write_atomic(&diff_path(&prefix.diffs(), 5001), b"cached").expect("seed diff");
        let report = applied(prefix.sync(&source).update(UpdateOptions::default()).expect("update"));
        assert_eq!(report.reused, 1);
        assert_eq!(report.downloaded, 2);
        assert_eq!(source.downloads(), vec![5002, 5003]);
    }

    #[rstest]
    fn failed_download_keeps_earlier_files_and_manifest(prefix: Prefix) {
        let source = feed().with_failing_download(5002);
        let mut sync = prefix.sync(&source);
        let err = sync.update(UpdateOptions::default()).expect_err("download fails");

        assert!(matches!(err, SyncError::Replication(_)));
        assert_eq!(sync.phase(), Phase::Failed);
        assert_eq!(prefix.sequences(), vec![Some(5000)]);
        assert!(diff_path(&prefix.diffs(), 5001).is_file());
        assert!(!diff_path(&prefix.diffs(), 5002).exists());
        assert!(!prefix.diffs().join(".5002.osc.gz.partial").exists());
    }

    #[rstest]
    fn failed_merge_removes_partial_output(prefix: Prefix) {
        let source = feed();
        prefix.store.fail_merges(true);
        let mut sync = prefix.sync(&source);
        let err = sync.update(UpdateOptions::default()).expect_err("merge fails");

        assert!(matches!(err, SyncError::ElementStore(_)));
        assert_eq!(prefix.sequences(), vec![Some(5000)]);
        assert!(!prefix.root.join("20200102.pbfc").exists());
    }

    #[rstest]
    fn mislabelled_state_is_rejected(prefix: Prefix) {
        let source = StaticDiffSource::new(FEED)
            .with_state(5001, "2020-01-02T00:00:00")
            .with_mislabelled_state(5002, 5004, "2020-01-03T00:00:00")
            .with_state(5003, "2020-01-04T00:00:00");
        let err = prefix
            .sync(&source)
            .update(UpdateOptions::default())
            .expect_err("mismatch");
        assert!(matches!(
            err,
            SyncError::Replication(crate::replication::ReplicationError::SequenceMismatch { .. })
        ));
        let ledger = DiffLedger::in_directory(&prefix.diffs()).load().expect("ledger");
        assert_eq!(ledger.len(), 1);
    }

    #[rstest]
    fn colliding_snapshot_name_is_rejected(prefix: Prefix) {
        let source = StaticDiffSource::new(FEED)
            .with_state(5001, "2020-01-02T00:00:00")
            .with_state(5002, "2020-01-02T06:00:00");
        let mut sync = prefix.sync(&source);
        let err = sync.update(UpdateOptions::default()).expect_err("same day twice");
        assert!(matches!(err, SyncError::SnapshotExists { ref filename } if filename == "20200102.pbfc"));
        assert_eq!(prefix.sequences(), vec![Some(5000), Some(5001)]);
    }

    #[rstest]
    fn stateless_newest_entry_is_placed_by_the_ledger(prefix: Prefix) {
        DiffLedger::in_directory(&prefix.diffs())
            .append(&[
                LedgerRow { sequence: 5001, timestamp: day(2) },
                LedgerRow { sequence: 5002, timestamp: day(3) },
            ])
            .expect("seed ledger");
        push_entry(&prefix, "2020-01-03T00-00-00.pbfc", day(3), None);
        let source = feed();

        let report = applied(prefix.sync(&source).update(UpdateOptions::default()).expect("update"));

        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.applied[0].filename, "20200104.pbfc");
        assert_eq!(source.downloads(), vec![5003]);
        assert_eq!(prefix.sequences(), vec![Some(5000), None, Some(5003)]);
        assert_eq!(prefix.store.merges()[0].start, day(3));
    }

    #[rstest]
    fn stateless_newest_entry_without_ledger_row_aborts(prefix: Prefix) {
        push_entry(&prefix, "20200102.pbfc", day(2), Some(5001));
        push_entry(&prefix, "2020-01-03T00-00-00.pbfc", day(3), None);
        let before = prefix.manifests().load().expect("manifest");
        let source = feed();
        let mut sync = prefix.sync(&source);

        let err = sync.update(UpdateOptions::default()).expect_err("unknown sequence");

        assert!(matches!(
            err,
            SyncError::UnknownLastSequence { ref filename, .. } if filename == "2020-01-03T00-00-00.pbfc"
        ));
        assert_eq!(sync.phase(), Phase::Failed);
        assert_eq!(prefix.manifests().load().expect("manifest"), before);
        assert!(source.downloads().is_empty());
        assert!(prefix.store.merges().is_empty());
    }

    #[rstest]
    fn stateless_initial_entry_uses_the_initial_sequence(prefix: Prefix) {
        let manifests = prefix.manifests();
        let mut manifest = manifests.load().expect("manifest");
        let mut initial = manifest.pop().expect("initial entry");
        initial.sequence_number = None;
        manifest.push(initial);
        manifests.save(&manifest).expect("save manifest");
        let source = feed();

        let report = applied(prefix.sync(&source).update(UpdateOptions::default()).expect("update"));

        assert_eq!(report.last_sequence(), Some(5003));
        assert_eq!(source.downloads(), vec![5001, 5002, 5003]);
    }

    #[rstest]
    fn snapshot_ending_before_the_newest_is_rejected(prefix: Prefix) {
        push_entry(&prefix, "20200105.pbfc", day(5), Some(5001));
        let before = prefix.manifests().load().expect("manifest");
        let source = StaticDiffSource::new(FEED).with_state(5002, "2020-01-03T00:00:00");

        let err = prefix
            .sync(&source)
            .update(UpdateOptions::default())
            .expect_err("backwards snapshot");

        assert!(matches!(err, SyncError::SnapshotOutOfOrder { ref filename, .. } if filename == "20200103.pbfc"));
        assert_eq!(prefix.manifests().load().expect("manifest"), before);
        assert!(prefix.store.merges().is_empty());
    }

    #[rstest]
    fn missing_settings_are_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 tempdir");
        let source = feed();
        let store = MemoryElementStore::default();
        let err = ReplicationSync::new(root, &source, &store)
            .update(UpdateOptions::default())
            .expect_err("no settings");
        assert!(err.is_config_missing());
    }

    #[rstest]
    fn drop_last_undoes_an_update(prefix: Prefix) {
        let before = prefix.manifests().load().expect("manifest");
        let source = StaticDiffSource::new(FEED).with_daily_states(5001, 1);
        prefix.sync(&source).update(UpdateOptions::default()).expect("update");
        let dropped = drop_last(&prefix.manifests()).expect("drop");
        assert_eq!(dropped.sequence_number, Some(5001));
        assert_eq!(prefix.manifests().load().expect("manifest"), before);
        assert!(!prefix.root.join(&dropped.filename).exists());
    }

    #[rstest]
    #[case(None, vec![5002, 5003, 5004])]
    #[case(Some(2), vec![5002, 5003])]
    fn pending_rows_are_ordered_and_unique(
        #[case] max_diffs: Option<usize>,
        #[case] expected: Vec<u64>,
    ) {
        let at = |sequence: u64| LedgerRow {
            sequence,
            timestamp: Utc
                .timestamp_opt(i64::try_from(sequence).expect("small sequence"), 0)
                .single()
                .expect("valid timestamp"),
        };
        let known = vec![at(5004), at(5001), at(5002), at(5003), at(5002), at(5009)];
        let pending = select_pending(known, 5001, 5004, max_diffs);
        assert_eq!(
            pending.iter().map(|row| row.sequence).collect::<Vec<_>>(),
            expected
        );
    }
}
