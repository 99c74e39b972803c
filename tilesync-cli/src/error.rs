//! Error types emitted by the tilesync CLI.
//!
//! Keep this error type reasonably small, as every command returns
//! `Result<_, CliError>`.

use std::sync::Arc;

use camino::Utf8PathBuf;
use thiserror::Error;
use tilesync_core::{BoundingBoxError, PolygonError};
use tilesync_data::{HttpSourceError, SyncError, TileIndexError, TimestampError};

/// Exit status for handled outcomes such as "nothing to do".
pub const EXIT_HANDLED: i32 = 1;
/// Exit status for every other failure.
pub const EXIT_FAILURE: i32 = 2;

/// Errors emitted by the tilesync CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (pass it on the command line or set {env})")]
    MissingArgument {
        /// Option name as written on the command line.
        field: &'static str,
        /// Environment variable that can supply it.
        env: &'static str,
    },
    /// A timestamp argument could not be parsed.
    #[error("invalid {field}: {source}")]
    InvalidTimestamp {
        /// Option holding the timestamp.
        field: &'static str,
        /// Parse failure.
        #[source]
        source: TimestampError,
    },
    /// `--bbox` was not `minlon,minlat,maxlon,maxlat`.
    #[error("invalid --bbox: {0}")]
    InvalidBoundingBox(#[source] BoundingBoxError),
    /// The `--poly` file could not be read or is not a polygon.
    #[error("invalid polygon file {path}: {source}")]
    InvalidPolygon {
        /// The `.poly` file.
        path: Utf8PathBuf,
        /// Read or parse failure.
        #[source]
        source: PolygonError,
    },
    /// Constructing the replication feed client failed.
    #[error("failed to build feed client for {base_url:?}: {source}")]
    BuildDiffSource {
        /// Feed the client was for.
        base_url: String,
        /// Setup failure.
        #[source]
        source: HttpSourceError,
    },
    /// The feed has nothing newer than the prefix.
    #[error("no new diffs after sequence {last_sequence}")]
    NoNewDiffs {
        /// Sequence the prefix is already current to.
        last_sequence: u64,
    },
    /// Updating, initialising or rolling back the prefix failed.
    #[error(transparent)]
    Sync(#[from] SyncError),
    /// Resolving tiles failed.
    #[error(transparent)]
    TileIndex(#[from] TileIndexError),
    /// Writing command output failed.
    #[error("failed to write output: {0}")]
    WriteOutput(#[source] std::io::Error),
}

impl CliError {
    /// Process exit status for this error.
    ///
    /// A prefix without settings and an update with nothing to apply are
    /// handled outcomes; everything else is a failure.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::NoNewDiffs { .. } => EXIT_HANDLED,
            Self::Sync(err) if err.is_config_missing() => EXIT_HANDLED,
            _ => EXIT_FAILURE,
        }
    }
}
