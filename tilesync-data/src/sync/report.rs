//! What an update did.

use std::{fmt, time::Duration};

use crate::manifest::ManifestEntry;

/// Wall-clock time spent in each stage of an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageTimings {
    /// Loading settings and learning new states from the feed.
    pub checking: Duration,
    /// Downloading change files.
    pub fetching: Duration,
    /// Merging batches and committing the manifest.
    pub merging: Duration,
}

impl StageTimings {
    /// Total time across all stages.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.checking + self.fetching + self.merging
    }
}

/// Summary of a successful update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    /// Diffs downloaded by this run.
    pub downloaded: usize,
    /// Diffs already present in the diffs directory.
    pub reused: usize,
    /// Manifest entries appended, oldest first.
    pub applied: Vec<ManifestEntry>,
    /// Per-stage timings.
    pub timings: StageTimings,
}

impl UpdateReport {
    /// Sequence number the prefix is now current to.
    #[must_use]
    pub fn last_sequence(&self) -> Option<u64> {
        self.applied.last().and_then(|entry| entry.sequence_number)
    }
}

impl fmt::Display for UpdateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "downloaded {} diffs ({} already present), applied {} snapshots",
            self.downloaded,
            self.reused,
            self.applied.len()
        )?;
        for entry in &self.applied {
            writeln!(f, "  {entry}")?;
        }
        write!(
            f,
            "checking {:.1}s, fetching {:.1}s, merging {:.1}s",
            self.timings.checking.as_secs_f64(),
            self.timings.fetching.as_secs_f64(),
            self.timings.merging.as_secs_f64()
        )
    }
}

/// Result of [`ReplicationSync::update`](super::ReplicationSync::update).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// New snapshots were merged and committed.
    Applied(UpdateReport),
    /// The feed had nothing newer than the manifest.
    NoNewDiffs {
        /// Sequence number the prefix is current to.
        last_sequence: u64,
    },
}
