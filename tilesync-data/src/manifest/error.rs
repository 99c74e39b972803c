//! Errors raised while reading or writing manifest files.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors produced by [`super::ManifestStore`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ManifestError {
    /// No settings file exists for the prefix.
    #[error("no settings file at {path}")]
    ConfigMissing {
        /// Expected `settings.json`.
        path: Utf8PathBuf,
    },
    /// No manifest exists for the prefix.
    #[error("no manifest at {path}")]
    ManifestMissing {
        /// Expected `filelist.json`.
        path: Utf8PathBuf,
    },
    /// The manifest exists but lists no snapshots.
    #[error("manifest {path} lists no snapshots")]
    Empty {
        /// The empty manifest.
        path: Utf8PathBuf,
    },
    /// Reading or writing a file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File being read or written.
        path: Utf8PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// A file held invalid JSON.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// File being read.
        path: Utf8PathBuf,
        /// JSON error with line and column.
        #[source]
        source: serde_json::Error,
    },
    /// Serialising a document failed.
    #[error("failed to serialise {path}: {source}")]
    Serialise {
        /// File that would have been written.
        path: Utf8PathBuf,
        /// Serialiser failure.
        #[source]
        source: serde_json::Error,
    },
}
