//! Replication feed access.
//!
//! A feed publishes `state.txt` describing its newest state and, for each
//! sequence number `n`, a state file and a gzipped change file under
//! `AAA/BBB/CCC`, the zero-padded millions, thousands and units of `n`.
//! State files are Java properties: `key=value` lines with `:` escaped as
//! `\:`.
//!
//! [`DiffSource`] is synchronous. [`HttpDiffSource`] drives `reqwest` on a
//! Tokio runtime it owns.

mod error;
mod http;
#[doc(hidden)]
pub mod test_support;

use std::{collections::HashMap, fmt, io::Write};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};

pub use error::{ReplicationError, TransportError};
pub use http::{HttpDiffSource, HttpSourceError, REQUEST_TIMEOUT, USER_AGENT};

use crate::timestamp::{format_end_date, parse_state_timestamp};

/// A replication state: a sequence number and the time it is current to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationState {
    /// Sequence number.
    pub sequence: u64,
    /// Timestamp of the newest change included.
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for ReplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.sequence, format_end_date(self.timestamp))
    }
}

/// A downloaded diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffDescriptor {
    /// Sequence number.
    pub sequence: u64,
    /// Timestamp the diff brings the data up to.
    pub timestamp: DateTime<Utc>,
    /// Location of the `.osc.gz` file.
    pub local_path: Utf8PathBuf,
}

impl DiffDescriptor {
    /// The descriptor as `(sequence, timestamp, local_path)`.
    #[must_use]
    pub fn to_tuple(&self) -> (u64, DateTime<Utc>, &Utf8Path) {
        (self.sequence, self.timestamp, &self.local_path)
    }
}

impl fmt::Display for DiffDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.sequence,
            format_end_date(self.timestamp),
            self.local_path
        )
    }
}

/// Local path of the diff for `sequence`.
#[must_use]
pub fn diff_path(diffs_location: &Utf8Path, sequence: u64) -> Utf8PathBuf {
    diffs_location.join(format!("{sequence}.osc.gz"))
}

/// Feed path of `sequence` without extension, e.g. `005/001/234`.
#[must_use]
pub fn sequence_path(sequence: u64) -> String {
    format!(
        "{:03}/{:03}/{:03}",
        sequence / 1_000_000,
        (sequence / 1_000) % 1_000,
        sequence % 1_000
    )
}

/// URL of the state file for `sequence`, or of `state.txt` for the newest.
///
/// # Examples
/// ```
/// use tilesync_data::replication::state_url;
///
/// assert_eq!(
///     state_url("https://example.org/day/", Some(5_001_234)),
///     "https://example.org/day/005/001/234.state.txt"
/// );
/// assert_eq!(state_url("https://example.org/day", None), "https://example.org/day/state.txt");
/// ```
#[must_use]
pub fn state_url(base_url: &str, sequence: Option<u64>) -> String {
    let base = base_url.trim_end_matches('/');
    match sequence {
        Some(sequence) => format!("{base}/{}.state.txt", sequence_path(sequence)),
        None => format!("{base}/state.txt"),
    }
}

/// URL of the change file for `sequence`.
#[must_use]
pub fn diff_url(base_url: &str, sequence: u64) -> String {
    format!(
        "{}/{}.osc.gz",
        base_url.trim_end_matches('/'),
        sequence_path(sequence)
    )
}

/// Parse the body of a state file fetched from `url`.
pub fn parse_state(body: &str, url: &str) -> Result<ReplicationState, ReplicationError> {
    let values: HashMap<&str, &str> = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect();
    let field = |key: &str| {
        values
            .get(key)
            .copied()
            .ok_or_else(|| ReplicationError::BadState {
                url: url.to_owned(),
                reason: format!("missing {key}"),
            })
    };
    let sequence_text = field("sequenceNumber")?;
    let sequence = sequence_text
        .parse::<u64>()
        .map_err(|_| ReplicationError::BadState {
            url: url.to_owned(),
            reason: format!("sequenceNumber {sequence_text:?} is not a number"),
        })?;
    let timestamp = parse_state_timestamp(field("timestamp")?).map_err(|source| {
        ReplicationError::MalformedTimestamp {
            url: url.to_owned(),
            source,
        }
    })?;
    Ok(ReplicationState {
        sequence,
        timestamp,
    })
}

/// A replication feed.
///
/// Implementors provide raw access; the provided methods parse and validate
/// state files.
pub trait DiffSource {
    /// Base URL of the feed.
    fn base_url(&self) -> &str;

    /// Fetch the raw state file for `sequence`, or `state.txt` for `None`.
    fn fetch_state(&self, sequence: Option<u64>) -> Result<String, TransportError>;

    /// Stream the change file for `sequence` into `sink`, returning its size.
    fn download_diff(&self, sequence: u64, sink: &mut dyn Write) -> Result<u64, TransportError>;

    /// The feed's newest state.
    fn latest_state(&self) -> Result<ReplicationState, ReplicationError> {
        let body = self.fetch_state(None)?;
        parse_state(&body, &state_url(self.base_url(), None))
    }

    /// The state for `sequence`, checking the feed answered for that number.
    fn state(&self, sequence: u64) -> Result<ReplicationState, ReplicationError> {
        let url = state_url(self.base_url(), Some(sequence));
        let state = parse_state(&self.fetch_state(Some(sequence))?, &url)?;
        if state.sequence != sequence {
            return Err(ReplicationError::SequenceMismatch {
                url,
                requested: sequence,
                reported: state.sequence,
            });
        }
        Ok(state)
    }
}

impl<T: DiffSource + ?Sized> DiffSource for &T {
    fn base_url(&self) -> &str {
        (**self).base_url()
    }

    fn fetch_state(&self, sequence: Option<u64>) -> Result<String, TransportError> {
        (**self).fetch_state(sequence)
    }

    fn download_diff(&self, sequence: u64, sink: &mut dyn Write) -> Result<u64, TransportError> {
        (**self).download_diff(sequence, sink)
    }
}

#[cfg(test)]
#[expect(clippy::expect_used, reason = "tests fail fast on invalid fixtures")]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use test_support::StaticDiffSource;

    const URL: &str = "https://example.org/day/state.txt";

    #[rstest]
    fn parses_escaped_state_file() {
        let body = "#Thu Jan 02 00:00:00 UTC 2020\nsequenceNumber=5001\ntimestamp=2020-01-02T00\\:00\\:00Z\n";
        let state = parse_state(body, URL).expect("state parses");
        assert_eq!(state.sequence, 5001);
        assert_eq!(
            state.timestamp,
            Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).single().expect("date")
        );
        assert_eq!(state.to_string(), "5001 [2020-01-02T00:00:00]");
    }

    #[rstest]
    #[case("timestamp=2020-01-02T00\\:00\\:00Z\n")]
    #[case("sequenceNumber=5001\n")]
    #[case("sequenceNumber=next\ntimestamp=2020-01-02T00\\:00\\:00Z\n")]
    fn missing_or_bad_keys_are_bad_state(#[case] body: &str) {
        let err = parse_state(body, URL).expect_err("incomplete state");
        assert!(matches!(err, ReplicationError::BadState { .. }));
    }

    #[rstest]
    fn bad_timestamp_is_reported() {
        let err = parse_state("sequenceNumber=1\ntimestamp=tomorrow\n", URL).expect_err("bad ts");
        assert!(matches!(err, ReplicationError::MalformedTimestamp { .. }));
    }

    #[rstest]
    #[case(5001, "https://example.org/day/000/005/001.osc.gz")]
    #[case(4_123_456, "https://example.org/day/004/123/456.osc.gz")]
    fn builds_diff_urls(#[case] sequence: u64, #[case] expected: &str) {
        assert_eq!(diff_url("https://example.org/day/", sequence), expected);
    }

    #[rstest]
    fn diff_paths_live_in_the_diffs_directory() {
        assert_eq!(
            diff_path(Utf8Path::new("/srv/diffs"), 5001),
            Utf8PathBuf::from("/srv/diffs/5001.osc.gz")
        );
    }

    #[rstest]
    fn state_request_checks_the_sequence() {
        let source = StaticDiffSource::new("https://example.org/day/")
            .with_state(5001, "2020-01-02T00:00:00")
            .with_mislabelled_state(5002, 5003, "2020-01-03T00:00:00");
        assert_eq!(source.state(5001).expect("state").sequence, 5001);
        let err = source.state(5002).expect_err("mislabelled");
        assert!(matches!(
            err,
            ReplicationError::SequenceMismatch {
                requested: 5002,
                reported: 5003,
                ..
            }
        ));
    }
}
