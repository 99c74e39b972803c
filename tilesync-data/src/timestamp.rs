//! Timestamp formats used by the manifest, ledger and replication state.
//!
//! Three textual forms coexist:
//! - manifest end dates, `2020-01-01T00:00:00`;
//! - ledger rows and snapshot names, `2020-01-01T00-00-00`;
//! - replication state files, `2020-01-01T00\:00\:00Z` with escaped colons.
//!
//! All of them are UTC.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use thiserror::Error;

const END_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const LEDGER_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";
const STATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const SECONDS_PER_DAY: i64 = 86_400;

/// A timestamp could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed timestamp {input:?}")]
pub struct TimestampError {
    /// The rejected text.
    pub input: String,
}

impl TimestampError {
    fn new(input: &str) -> Self {
        Self {
            input: input.to_owned(),
        }
    }
}

/// Parse a manifest or ledger timestamp.
///
/// Both the colon and the hyphen separated time forms are accepted; anything
/// after the first 19 characters (a trailing `Z`, fractional seconds) is
/// ignored.
///
/// # Examples
/// ```
/// use tilesync_data::timestamp::{format_end_date, parse_timestamp};
///
/// let colon = parse_timestamp("2020-01-01T06:30:00").expect("colon form");
/// let hyphen = parse_timestamp("2020-01-01T06-30-00Z").expect("hyphen form");
/// assert_eq!(colon, hyphen);
/// assert_eq!(format_end_date(colon), "2020-01-01T06:30:00");
/// ```
pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>, TimestampError> {
    let trimmed = input.trim();
    let head = trimmed.get(..19).unwrap_or(trimmed);
    [END_DATE_FORMAT, LEDGER_FORMAT]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(head, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| TimestampError::new(input))
}

/// Parse the `timestamp` value of a replication state file.
pub fn parse_state_timestamp(input: &str) -> Result<DateTime<Utc>, TimestampError> {
    let unescaped = input.trim().replace('\\', "");
    NaiveDateTime::parse_from_str(&unescaped, STATE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| TimestampError::new(input))
}

/// Format a manifest end date.
#[must_use]
pub fn format_end_date(value: DateTime<Utc>) -> String {
    value.format(END_DATE_FORMAT).to_string()
}

/// Format a ledger timestamp.
#[must_use]
pub fn format_ledger(value: DateTime<Utc>) -> String {
    value.format(LEDGER_FORMAT).to_string()
}

/// Name of the snapshot holding data up to `end`.
///
/// With `round_time` the timestamp is rounded to the nearest midnight and
/// only the date is kept. Exactly noon goes to whichever neighbouring day has
/// an even day count since the Unix epoch, matching the naming of prefixes
/// written by older tooling.
///
/// # Examples
/// ```
/// use tilesync_data::timestamp::{parse_timestamp, snapshot_filename};
///
/// let end = parse_timestamp("2020-01-03T23:59:58").expect("timestamp");
/// assert_eq!(snapshot_filename(end, true), "20200104.pbfc");
/// assert_eq!(snapshot_filename(end, false), "2020-01-03T23-59-58.pbfc");
/// ```
#[must_use]
pub fn snapshot_filename(end: DateTime<Utc>, round_time: bool) -> String {
    if round_time {
        format!("{}.pbfc", round_to_day(end).format("%Y%m%d"))
    } else {
        format!("{}.pbfc", end.format(LEDGER_FORMAT))
    }
}

fn round_to_day(value: DateTime<Utc>) -> DateTime<Utc> {
    const NOON: i64 = SECONDS_PER_DAY >> 1;
    let seconds = value.timestamp();
    let floor = seconds.div_euclid(SECONDS_PER_DAY);
    let days = match seconds.rem_euclid(SECONDS_PER_DAY).cmp(&NOON) {
        Ordering::Less => floor,
        Ordering::Greater => floor + 1,
        Ordering::Equal => floor + floor.rem_euclid(2),
    };
    DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(days)
}

/// Serde adapter storing `DateTime<Utc>` as a manifest end date.
pub mod end_date {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    /// Serialise `value` as `%Y-%m-%dT%H:%M:%S`.
    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_end_date(*value))
    }

    /// Deserialise any timestamp accepted by [`super::parse_timestamp`].
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_timestamp(&text).map_err(D::Error::custom)
    }
}
