//! Manifest entries and the ordered snapshot list.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timestamp::{self, format_end_date};

/// One applied snapshot.
///
/// Older manifests may omit `State` on entries after the first; entries
/// appended by this crate always carry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Snapshot file name relative to the prefix.
    #[serde(rename = "Filename")]
    pub filename: String,
    /// Timestamp of the newest data in the snapshot.
    #[serde(rename = "EndDate", with = "timestamp::end_date")]
    pub end_date: DateTime<Utc>,
    /// Number of tiles in the snapshot.
    #[serde(rename = "NumTiles", default)]
    pub tile_count: u64,
    /// Replication sequence the snapshot is current to.
    #[serde(rename = "State", default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<u64>,
}

impl ManifestEntry {
    /// The entry as `(filename, end_date, tile_count, sequence_number)`.
    #[must_use]
    pub fn to_tuple(&self) -> (&str, DateTime<Utc>, u64, Option<u64>) {
        (
            self.filename.as_str(),
            self.end_date,
            self.tile_count,
            self.sequence_number,
        )
    }
}

impl fmt::Display for ManifestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {} tiles",
            self.filename,
            format_end_date(self.end_date),
            self.tile_count
        )?;
        if let Some(sequence) = self.sequence_number {
            write!(f, " @{sequence}")?;
        }
        Ok(())
    }
}

/// Ordered, append-only list of snapshots; the first is the initial one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// A manifest holding only the initial snapshot.
    #[must_use]
    pub fn with_initial(entry: ManifestEntry) -> Self {
        Self {
            entries: vec![entry],
        }
    }

    /// Entries in application order.
    #[must_use]
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Number of snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manifest lists no snapshots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest snapshot.
    #[must_use]
    pub fn last(&self) -> Option<&ManifestEntry> {
        self.entries.last()
    }

    /// Sequence number recorded on the newest snapshot.
    ///
    /// `None` when that entry carries no `State`, even if older entries do;
    /// an older sequence would predate the newest snapshot's data.
    #[must_use]
    pub fn last_sequence(&self) -> Option<u64> {
        self.last().and_then(|entry| entry.sequence_number)
    }

    /// Whether a snapshot with `filename` is already listed.
    #[must_use]
    pub fn contains_filename(&self, filename: &str) -> bool {
        self.entries.iter().any(|entry| entry.filename == filename)
    }

    /// Snapshot file names in application order.
    #[must_use]
    pub fn filenames(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| entry.filename.clone())
            .collect()
    }

    /// Entries whose end date is not after `as_of`; all entries without a limit.
    pub fn entries_as_of(
        &self,
        as_of: Option<DateTime<Utc>>,
    ) -> impl Iterator<Item = &ManifestEntry> + '_ {
        self.entries
            .iter()
            .filter(move |entry| as_of.is_none_or(|limit| entry.end_date <= limit))
    }

    /// Append a snapshot.
    pub fn push(&mut self, entry: ManifestEntry) {
        self.entries.push(entry);
    }

    /// Remove and return the newest snapshot.
    pub fn pop(&mut self) -> Option<ManifestEntry> {
        self.entries.pop()
    }
}

#[cfg(test)]
#[expect(
    clippy::expect_used,
    clippy::indexing_slicing,
    reason = "tests fail fast on invalid fixtures"
)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::{fixture, rstest};

    fn entry(filename: &str, day: u32, sequence: Option<u64>) -> ManifestEntry {
        ManifestEntry {
            filename: filename.to_owned(),
            end_date: Utc
                .with_ymd_and_hms(2020, 1, day, 0, 0, 0)
                .single()
                .expect("valid date"),
            tile_count: 10,
            sequence_number: sequence,
        }
    }

    #[fixture]
    fn manifest() -> Manifest {
        let mut manifest = Manifest::with_initial(entry("planet.pbf", 1, Some(5000)));
        manifest.push(entry("20200102.pbfc", 2, Some(5001)));
        manifest.push(entry("20200103.pbfc", 3, None));
        manifest
    }

    #[rstest]
    fn reads_legacy_json() {
        let text = r#"[{"Filename": "planet.pbf", "EndDate": "2020-01-01T00:00:00", "NumTiles": 3, "State": 5000},
                      {"Filename": "20200102.pbfc", "EndDate": "2020-01-02T00-00-00", "NumTiles": 1}]"#;
        let manifest: Manifest = serde_json::from_str(text).expect("manifest parses");
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.entries()[1].sequence_number, None);
        assert_eq!(manifest.last_sequence(), None);
    }

    #[rstest]
    fn writes_original_field_names() {
        let json = serde_json::to_value(entry("planet.pbf", 1, Some(5000))).expect("serialise");
        assert_eq!(json["Filename"], "planet.pbf");
        assert_eq!(json["EndDate"], "2020-01-01T00:00:00");
        assert_eq!(json["NumTiles"], 10);
        assert_eq!(json["State"], 5000);
    }

    #[rstest]
    fn last_sequence_never_reads_older_entries(mut manifest: Manifest) {
        assert_eq!(manifest.last_sequence(), None);
        manifest.pop();
        assert_eq!(manifest.last_sequence(), Some(5001));
    }

    #[rstest]
    fn filters_by_end_date(manifest: Manifest) {
        let limit = Utc
            .with_ymd_and_hms(2020, 1, 2, 0, 0, 0)
            .single()
            .expect("valid date");
        let names: Vec<_> = manifest
            .entries_as_of(Some(limit))
            .map(|entry| entry.filename.as_str())
            .collect();
        assert_eq!(names, ["planet.pbf", "20200102.pbfc"]);
        assert_eq!(manifest.entries_as_of(None).count(), 3);
    }

    #[rstest]
    fn displays_entry() {
        assert_eq!(
            entry("planet.pbf", 1, Some(5000)).to_string(),
            "planet.pbf [2020-01-01T00:00:00] 10 tiles @5000"
        );
    }
}
