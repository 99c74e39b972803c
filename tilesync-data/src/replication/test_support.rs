//! In-memory replication feed for tests.

use std::{
    collections::{BTreeMap, BTreeSet},
    io::Write,
    sync::{Mutex, PoisonError},
};

use super::{DiffSource, TransportError, diff_url, state_url};

/// Stub [`DiffSource`] serving canned state files and diffs.
///
/// States are registered with plain `%Y-%m-%dT%H:%M:%S` timestamps and
/// served in the escaped form real feeds use. The newest registered state is
/// the feed's `state.txt` unless [`StaticDiffSource::with_latest`] says
/// otherwise. Diffs default to a small body naming their sequence.
#[derive(Debug, Default)]
pub struct StaticDiffSource {
    base_url: String,
    states: BTreeMap<u64, String>,
    latest: Option<u64>,
    diffs: BTreeMap<u64, Vec<u8>>,
    failing: BTreeSet<u64>,
    downloads: Mutex<Vec<u64>>,
    state_requests: Mutex<Vec<Option<u64>>>,
}

impl StaticDiffSource {
    /// Empty feed at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Register the state for `sequence`.
    #[must_use]
    pub fn with_state(self, sequence: u64, timestamp: &str) -> Self {
        self.with_mislabelled_state(sequence, sequence, timestamp)
    }

    /// Register a state file for `sequence` that claims to be `reported`.
    #[must_use]
    pub fn with_mislabelled_state(mut self, sequence: u64, reported: u64, timestamp: &str) -> Self {
        self.states
            .insert(sequence, state_body(reported, timestamp));
        self
    }

    /// Register a run of daily states starting at `first`, dated from
    /// `2020-01-02` onwards.
    #[must_use]
    pub fn with_daily_states(mut self, first: u64, count: u32) -> Self {
        for offset in 0..count {
            let day = offset + 2;
            let timestamp = format!("2020-01-{day:02}T00:00:00");
            self = self.with_state(first + u64::from(offset), &timestamp);
        }
        self
    }

    /// Make `sequence` the feed's newest state.
    #[must_use]
    pub fn with_latest(mut self, sequence: u64) -> Self {
        self.latest = Some(sequence);
        self
    }

    /// Serve `body` as the diff for `sequence`.
    #[must_use]
    pub fn with_diff(mut self, sequence: u64, body: impl Into<Vec<u8>>) -> Self {
        self.diffs.insert(sequence, body.into());
        self
    }

    /// Fail every download of `sequence`.
    #[must_use]
    pub fn with_failing_download(mut self, sequence: u64) -> Self {
        self.failing.insert(sequence);
        self
    }

    /// Sequences downloaded so far, in request order.
    pub fn downloads(&self) -> Vec<u64> {
        self.downloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// State requests so far; `None` is `state.txt`.
    pub fn state_requests(&self) -> Vec<Option<u64>> {
        self.state_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn not_found(url: String) -> TransportError {
        TransportError::Http {
            url,
            status: 404,
            message: "not found".to_owned(),
        }
    }
}

fn state_body(sequence: u64, timestamp: &str) -> String {
    format!(
        "#generated\nsequenceNumber={sequence}\ntimestamp={}Z\n",
        timestamp.replace(':', "\\:")
    )
}

impl DiffSource for StaticDiffSource {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn fetch_state(&self, sequence: Option<u64>) -> Result<String, TransportError> {
        self.state_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sequence);
        sequence
            .or(self.latest)
            .or_else(|| self.states.keys().next_back().copied())
            .and_then(|key| self.states.get(&key))
            .cloned()
            .ok_or_else(|| Self::not_found(state_url(&self.base_url, sequence)))
    }

    fn download_diff(&self, sequence: u64, sink: &mut dyn Write) -> Result<u64, TransportError> {
        self.downloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sequence);
        let url = diff_url(&self.base_url, sequence);
        if self.failing.contains(&sequence) {
            return Err(TransportError::Network {
                url,
                source: std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"),
            });
        }
        let body = self
            .diffs
            .get(&sequence)
            .cloned()
            .unwrap_or_else(|| format!("diff {sequence}\n").into_bytes());
        sink.write_all(&body)
            .map_err(|source| TransportError::Network { url, source })?;
        Ok(body.len() as u64)
    }
}
