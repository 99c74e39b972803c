//! Replication feeds over HTTP.
//!
//! ```no_run
//! use tilesync_data::replication::{DiffSource, HttpDiffSource};
//!
//! let source = HttpDiffSource::new("https://planet.openstreetmap.org/replication/day/")?;
//! let latest = source.latest_state()?;
//! log::info!("newest state: {latest}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::{
    fmt,
    future::Future,
    io::{self, Write},
    panic, thread,
    time::Duration,
};

use reqwest::{Client, Response};
use tokio::runtime::{Builder, Handle, Runtime};

use super::{DiffSource, TransportError, diff_url, state_url};

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("tilesync/", env!("CARGO_PKG_VERSION"));

/// Bound on connecting, and on the whole exchange for state files. Diff
/// bodies may be large, so their transfer is not bounded.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure to set up an [`HttpDiffSource`].
#[derive(Debug, thiserror::Error)]
pub enum HttpSourceError {
    /// The `reqwest` client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    /// The runtime driving requests could not be started.
    #[error("failed to start the request runtime: {0}")]
    Runtime(#[source] io::Error),
}

/// A replication feed reached over HTTP.
///
/// Requests run on a private current-thread runtime. When the caller is
/// already inside a Tokio runtime, each request is driven from a scoped
/// thread instead, so the caller's executor is never re-entered.
pub struct HttpDiffSource {
    base_url: String,
    client: Client,
    runtime: Runtime,
}

impl fmt::Debug for HttpDiffSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpDiffSource")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpDiffSource {
    /// Source reading the feed rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`HttpSourceError`] when the client or runtime cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, HttpSourceError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(HttpSourceError::Client)?;
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(HttpSourceError::Runtime)?;
        Ok(Self {
            base_url: base_url.into(),
            client,
            runtime,
        })
    }

    fn drive<F>(&self, future: F) -> F::Output
    where
        F: Future + Send,
        F::Output: Send,
    {
        if Handle::try_current().is_err() {
            return self.runtime.block_on(future);
        }
        thread::scope(|scope| {
            scope
                .spawn(|| self.runtime.block_on(future))
                .join()
                .unwrap_or_else(|payload| panic::resume_unwind(payload))
        })
    }

    fn get(&self, url: &str, timeout: Option<Duration>) -> Result<Response, TransportError> {
        let mut request = self.client.get(url);
        if let Some(limit) = timeout {
            request = request.timeout(limit);
        }
        self.drive(request.send())
            .and_then(Response::error_for_status)
            .map_err(transport(url))
    }
}

impl DiffSource for HttpDiffSource {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn fetch_state(&self, sequence: Option<u64>) -> Result<String, TransportError> {
        let url = state_url(&self.base_url, sequence);
        log::debug!("fetching {url}");
        let response = self.get(&url, Some(REQUEST_TIMEOUT))?;
        self.drive(response.text()).map_err(transport(&url))
    }

    fn download_diff(&self, sequence: u64, sink: &mut dyn Write) -> Result<u64, TransportError> {
        let url = diff_url(&self.base_url, sequence);
        log::debug!("downloading {url}");
        let mut response = self.get(&url, None)?;
        let mut written = 0_u64;
        while let Some(chunk) = self.drive(response.chunk()).map_err(transport(&url))? {
            sink.write_all(&chunk)
                .map_err(|source| TransportError::Network {
                    url: url.clone(),
                    source,
                })?;
            written += chunk.len() as u64;
        }
        Ok(written)
    }
}

/// Map a `reqwest` failure on `url` to a [`TransportError`].
fn transport(url: &str) -> impl Fn(reqwest::Error) -> TransportError + '_ {
    move |error| {
        error.status().map_or_else(
            || {
                let kind = if error.is_timeout() {
                    io::ErrorKind::TimedOut
                } else {
                    io::ErrorKind::Other
                };
                TransportError::Network {
                    url: url.to_owned(),
                    source: io::Error::new(kind, error),
                }
            },
            |status| TransportError::Http {
                url: url.to_owned(),
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_owned(),
            },
        )
    }
}

#[cfg(test)]
#[expect(clippy::expect_used, reason = "tests fail fast on invalid fixtures")]
mod tests {
    use super::*;
    use rstest::rstest;

    // Port 9 on loopback is the discard service and is normally closed.
    const CLOSED: &str = "http://127.0.0.1:9/";

    #[rstest]
    fn source_reports_base_url() {
        let source = HttpDiffSource::new("https://example.org/day/").expect("source builds");
        assert_eq!(source.base_url(), "https://example.org/day/");
        assert!(format!("{source:?}").contains("example.org/day"));
    }

    #[rstest]
    fn unreachable_feed_is_a_network_error() {
        let source = HttpDiffSource::new(CLOSED).expect("source builds");
        let err = source.fetch_state(None).expect_err("nothing listens there");
        assert!(matches!(err, TransportError::Network { ref url, .. } if url.ends_with("/state.txt")));
    }

    #[rstest]
    fn failed_download_writes_nothing() {
        let source = HttpDiffSource::new(CLOSED).expect("source builds");
        let mut sink = Vec::new();
        let err = source
            .download_diff(5_001_234, &mut sink)
            .expect_err("nothing listens there");
        assert!(matches!(err, TransportError::Network { ref url, .. } if url.ends_with("005/001/234.osc.gz")));
        assert!(sink.is_empty());
    }

    #[rstest]
    fn requests_work_from_inside_a_runtime() {
        let source = HttpDiffSource::new(CLOSED).expect("source builds");
        let outer = Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime builds");
        let result = outer.block_on(async { source.fetch_state(Some(1)) });
        assert!(matches!(result, Err(TransportError::Network { .. })));
    }
}
