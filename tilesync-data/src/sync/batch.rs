//! Grouping fetched diffs into merge batches.

use chrono::{DateTime, Utc};

use crate::replication::DiffDescriptor;

/// Cumulative diff size that closes a batch when merging is enabled.
pub const DEFAULT_BATCH_LIMIT: u64 = 100 * 1024 * 1024;

/// A diff present in the diffs directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDiff {
    /// The diff.
    pub descriptor: DiffDescriptor,
    /// Size of the change file in bytes.
    pub size: u64,
    /// Whether this run downloaded it, rather than finding it on disk.
    pub downloaded: bool,
}

/// Consecutive diffs merged into one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    diffs: Vec<DiffDescriptor>,
    size: u64,
}

impl Batch {
    /// Diffs in application order.
    #[must_use]
    pub fn diffs(&self) -> &[DiffDescriptor] {
        &self.diffs
    }

    /// Combined size of the batch's change files.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Sequence number the batch brings the data up to.
    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        self.diffs.last().map_or(0, |diff| diff.sequence)
    }

    /// Timestamp the batch brings the data up to.
    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        self.diffs
            .last()
            .map_or(DateTime::<Utc>::UNIX_EPOCH, |diff| diff.timestamp)
    }

    fn push(&mut self, diff: FetchedDiff) {
        self.size += diff.size;
        self.diffs.push(diff.descriptor);
    }
}

/// Split diffs, already in ascending sequence order, into batches.
///
/// Without a limit every diff is its own batch. With one, diffs accumulate
/// until the batch's size reaches `limit`; the diff that reaches it closes
/// the batch. A diff is never split and a batch is never empty.
#[must_use]
pub fn plan_batches(diffs: Vec<FetchedDiff>, limit: Option<u64>) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current = Batch {
        diffs: Vec::new(),
        size: 0,
    };
    for diff in diffs {
        current.push(diff);
        if limit.is_none_or(|limit| current.size >= limit) {
            batches.push(std::mem::replace(
                &mut current,
                Batch {
                    diffs: Vec::new(),
                    size: 0,
                },
            ));
        }
    }
    if !current.diffs.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
#[expect(
    clippy::expect_used,
    clippy::indexing_slicing,
    reason = "tests fail fast on invalid fixtures"
)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use chrono::TimeZone;
    use rstest::rstest;

    fn fetched(sequence: u64, size: u64) -> FetchedDiff {
        FetchedDiff {
            descriptor: DiffDescriptor {
                sequence,
                timestamp: Utc
                    .timestamp_opt(1_577_836_800 + i64::try_from(sequence).expect("small sequence") * 86_400, 0)
                    .single()
                    .expect("valid timestamp"),
                local_path: Utf8PathBuf::from(format!("/diffs/{sequence}.osc.gz")),
            },
            size,
            downloaded: true,
        }
    }

    fn sequences(batches: &[Batch]) -> Vec<Vec<u64>> {
        batches
            .iter()
            .map(|batch| batch.diffs().iter().map(|diff| diff.sequence).collect())
            .collect()
    }

    #[rstest]
    fn without_limit_each_diff_is_a_batch() {
        let batches = plan_batches(vec![fetched(1, 10), fetched(2, 10), fetched(3, 10)], None);
        assert_eq!(sequences(&batches), vec![vec![1], vec![2], vec![3]]);
    }

    #[rstest]
    fn small_diffs_share_one_batch() {
        let batches = plan_batches(vec![fetched(1, 10), fetched(2, 10), fetched(3, 10)], Some(100));
        assert_eq!(sequences(&batches), vec![vec![1, 2, 3]]);
        assert_eq!(batches[0].size(), 30);
        assert_eq!(batches[0].last_sequence(), 3);
        assert_eq!(batches[0].end(), fetched(3, 0).descriptor.timestamp);
    }

    #[rstest]
    #[case(vec![60, 40, 10], vec![vec![1, 2], vec![3]])]
    #[case(vec![150, 10], vec![vec![1], vec![2]])]
    #[case(vec![99, 0, 1, 5], vec![vec![1, 2, 3], vec![4]])]
    fn diff_reaching_the_limit_closes_the_batch(
        #[case] sizes: Vec<u64>,
        #[case] expected: Vec<Vec<u64>>,
    ) {
        let diffs = sizes
            .into_iter()
            .enumerate()
            .map(|(index, size)| fetched(index as u64 + 1, size))
            .collect();
        assert_eq!(sequences(&plan_batches(diffs, Some(100))), expected);
    }

    #[rstest]
    fn no_diffs_no_batches() {
        assert!(plan_batches(Vec::new(), Some(100)).is_empty());
    }
}
