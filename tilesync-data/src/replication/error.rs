//! Errors raised while talking to a replication feed.

use std::io;

use thiserror::Error;

use crate::timestamp::TimestampError;

/// Transport-level errors encountered while issuing HTTP requests.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The server returned an HTTP error status.
    #[error("request to {url} failed with status {status}: {message}")]
    Http {
        /// Fully qualified request URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Short error description supplied by the server.
        message: String,
    },
    /// The request failed due to an I/O error.
    #[error("network error contacting {url}: {source}")]
    Network {
        /// Fully qualified request URL.
        url: String,
        /// I/O error reported by the transport.
        source: io::Error,
    },
}

/// Errors raised while reading replication state or diffs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReplicationError {
    /// A state file lacked a required key or held an unusable value.
    #[error("bad replication state at {url}: {reason}")]
    BadState {
        /// State file URL.
        url: String,
        /// What was missing or unusable.
        reason: String,
    },
    /// The feed answered a request for one sequence with another.
    #[error("requested state {requested} from {url} but received {reported}")]
    SequenceMismatch {
        /// State file URL.
        url: String,
        /// Sequence asked for.
        requested: u64,
        /// Sequence the file declared.
        reported: u64,
    },
    /// The state timestamp could not be parsed.
    #[error("bad timestamp in {url}: {source}")]
    MalformedTimestamp {
        /// State file URL.
        url: String,
        /// Parse failure.
        #[source]
        source: TimestampError,
    },
    /// The request itself failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
