//! Per-prefix synchronisation settings.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Replication feed used when none is configured.
pub const DEFAULT_SOURCE_URL: &str = "https://planet.openstreetmap.org/replication/day/";

/// Settings written once by `initial` and read by every update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Name merged snapshots by day instead of by second.
    #[serde(rename = "RoundTime", default = "default_round_time")]
    pub round_time: bool,
    /// Directory holding downloaded diffs and the `state.csv` ledger.
    #[serde(rename = "DiffsLocation")]
    pub diffs_location: Utf8PathBuf,
    /// Sequence number of the initial snapshot.
    #[serde(rename = "InitialState")]
    pub initial_sequence: u64,
    /// Base URL of the replication feed.
    #[serde(rename = "SourcePrfx", default = "default_source_url")]
    pub diff_source_url: String,
    /// Accept changes whose author metadata is missing.
    #[serde(rename = "AllowMissingUsers", default, skip_serializing_if = "is_false")]
    pub allow_missing_users: bool,
    /// Merge several diffs into one snapshot.
    #[serde(rename = "MergeOscFiles", default, skip_serializing_if = "is_false")]
    pub merge_diffs: bool,
}

fn default_round_time() -> bool {
    true
}

fn default_source_url() -> String {
    DEFAULT_SOURCE_URL.to_owned()
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// A `key=value` override was not understood.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    /// The override had no `=`.
    #[error("expected key=value, found {input:?}")]
    Malformed {
        /// The rejected override.
        input: String,
    },
    /// The key names no setting.
    #[error("unknown setting {key:?}")]
    UnknownKey {
        /// The unrecognised key.
        key: String,
    },
}

impl Settings {
    /// Default settings for a diffs directory and initial sequence.
    #[must_use]
    pub fn new(diffs_location: impl Into<Utf8PathBuf>, initial_sequence: u64) -> Self {
        Self {
            round_time: true,
            diffs_location: diffs_location.into(),
            initial_sequence,
            diff_source_url: default_source_url(),
            allow_missing_users: false,
            merge_diffs: false,
        }
    }

    /// Apply one `key=value` override.
    ///
    /// Keys are case-insensitive: `roundtime`, `sourceprfx`,
    /// `allowmissingusers` and `mergeoscfiles`. Boolean values are true when
    /// they read `yes` or `true`.
    pub fn apply_override(&mut self, input: &str) -> Result<(), SettingsError> {
        let (key, value) = input.split_once('=').ok_or_else(|| SettingsError::Malformed {
            input: input.to_owned(),
        })?;
        match key.trim().to_ascii_lowercase().as_str() {
            "roundtime" => self.round_time = is_truthy(value),
            "sourceprfx" => self.diff_source_url = value.trim().to_owned(),
            "allowmissingusers" => self.allow_missing_users = is_truthy(value),
            "mergeoscfiles" => self.merge_diffs = is_truthy(value),
            other => {
                return Err(SettingsError::UnknownKey {
                    key: other.to_owned(),
                });
            }
        }
        Ok(())
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "yes" | "true")
}

#[cfg(test)]
#[expect(clippy::expect_used, reason = "tests fail fast on invalid fixtures")]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn defaults_round_time_and_source() {
        let settings = Settings::new("/data/diffs", 5000);
        assert!(settings.round_time);
        assert_eq!(settings.diff_source_url, DEFAULT_SOURCE_URL);
        assert!(!settings.merge_diffs);
    }

    #[rstest]
    #[case("roundtime=no", |s: &Settings| !s.round_time)]
    #[case("RoundTime=YES", |s: &Settings| s.round_time)]
    #[case("mergeoscfiles=true", |s: &Settings| s.merge_diffs)]
    #[case("allowmissingusers=yes", |s: &Settings| s.allow_missing_users)]
    #[case("sourceprfx=https://example.org/minute/", |s: &Settings| s.diff_source_url == "https://example.org/minute/")]
    fn applies_overrides(#[case] input: &str, #[case] check: fn(&Settings) -> bool) {
        let mut settings = Settings::new("diffs", 1);
        settings.apply_override(input).expect("override applies");
        assert!(check(&settings));
    }

    #[rstest]
    #[case("roundtime", SettingsError::Malformed { input: "roundtime".to_owned() })]
    #[case("colour=blue", SettingsError::UnknownKey { key: "colour".to_owned() })]
    fn rejects_bad_overrides(#[case] input: &str, #[case] expected: SettingsError) {
        let mut settings = Settings::new("diffs", 1);
        assert_eq!(settings.apply_override(input), Err(expected));
    }

    #[rstest]
    fn round_trips_original_field_names() {
        let text = r#"{"RoundTime": false, "DiffsLocation": "/d/", "InitialState": 42,
                       "SourcePrfx": "https://example.org/", "MergeOscFiles": true}"#;
        let settings: Settings = serde_json::from_str(text).expect("settings parse");
        assert!(!settings.round_time);
        assert!(settings.merge_diffs);
        assert!(!settings.allow_missing_users);
        let json = serde_json::to_value(&settings).expect("serialise");
        assert_eq!(json["InitialState"], 42);
        assert!(json.get("AllowMissingUsers").is_none());
    }
}
