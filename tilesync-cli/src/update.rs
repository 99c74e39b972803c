//! `update` and `droplast` command implementations.

use std::io::Write;

use camino::Utf8PathBuf;
use clap::Parser;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use tilesync_core::{ElementStore, LogProgress};
use tilesync_data::{
    DiffSource, HttpDiffSource, ManifestStore, ProcessElementStore, ReplicationSync, SyncError,
    UpdateOptions, UpdateOutcome, drop_last,
};

use crate::{ARG_ENGINE, ARG_PREFIX, CliError, ENV_ENGINE, ENV_UPDATE_PREFIX};

/// CLI arguments for the `update` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Fetch the replication diffs published since the newest \
                 snapshot of a prefix, merge them into new snapshots and \
                 record them in the prefix's manifest.",
    about = "Bring a prefix up to date with its replication feed"
)]
#[ortho_config(prefix = "TILESYNC")]
pub(crate) struct UpdateArgs {
    /// Prefix directory holding settings.json and filelist.json.
    #[arg(value_name = "prefix")]
    #[serde(default)]
    pub(crate) prefix: Option<Utf8PathBuf>,
    /// Apply at most this many diffs.
    #[arg(value_name = "max_diffs")]
    #[serde(default)]
    pub(crate) max_diffs: Option<usize>,
    /// Apply only diffs already recorded in the state ledger.
    #[arg(long)]
    #[serde(default)]
    pub(crate) offline: bool,
    /// Element engine executable.
    #[arg(long = ARG_ENGINE, value_name = "path", env = ENV_ENGINE)]
    #[serde(default)]
    pub(crate) engine: Option<String>,
}

impl UpdateArgs {
    pub(crate) fn into_config(self) -> Result<UpdateConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        UpdateConfig::try_from(merged)
    }
}

/// Resolved `update` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UpdateConfig {
    pub(crate) prefix: Utf8PathBuf,
    pub(crate) options: UpdateOptions,
    pub(crate) engine: ProcessElementStore,
}

impl TryFrom<UpdateArgs> for UpdateConfig {
    type Error = CliError;

    fn try_from(args: UpdateArgs) -> Result<Self, Self::Error> {
        let prefix = args.prefix.ok_or(CliError::MissingArgument {
            field: ARG_PREFIX,
            env: ENV_UPDATE_PREFIX,
        })?;
        Ok(Self {
            prefix,
            options: UpdateOptions {
                max_diffs: args.max_diffs,
                offline: args.offline,
            },
            engine: args
                .engine
                .map(ProcessElementStore::new)
                .unwrap_or_default(),
        })
    }
}

pub(crate) fn run_update(config: UpdateConfig, out: &mut dyn Write) -> Result<(), CliError> {
    let settings = ManifestStore::new(config.prefix.clone())
        .load_settings()
        .map_err(SyncError::from)?;
    let source = HttpDiffSource::new(settings.diff_source_url.clone()).map_err(|source| {
        CliError::BuildDiffSource {
            base_url: settings.diff_source_url.clone(),
            source,
        }
    })?;
    update_with(&config, source, &config.engine, out)
}

/// Run an update against explicit collaborators.
pub(crate) fn update_with<S, E>(
    config: &UpdateConfig,
    source: S,
    store: E,
    out: &mut dyn Write,
) -> Result<(), CliError>
where
    S: DiffSource,
    E: ElementStore,
{
    let mut sync = ReplicationSync::new(config.prefix.clone(), source, store)
        .with_progress(std::sync::Arc::new(LogProgress));
    match sync.update(config.options)? {
        UpdateOutcome::Applied(report) => {
            writeln!(out, "{report}").map_err(CliError::WriteOutput)?;
            Ok(())
        }
        UpdateOutcome::NoNewDiffs { last_sequence } => Err(CliError::NoNewDiffs { last_sequence }),
    }
}

/// CLI arguments for the `droplast` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(about = "Remove the newest snapshot of a prefix")]
#[ortho_config(prefix = "TILESYNC")]
pub(crate) struct DroplastArgs {
    /// Prefix directory holding filelist.json.
    #[arg(value_name = "prefix")]
    #[serde(default)]
    pub(crate) prefix: Option<Utf8PathBuf>,
}

impl DroplastArgs {
    pub(crate) fn into_prefix(self) -> Result<Utf8PathBuf, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        merged.prefix.ok_or(CliError::MissingArgument {
            field: ARG_PREFIX,
            env: crate::ENV_DROPLAST_PREFIX,
        })
    }
}

pub(crate) fn run_droplast(prefix: &Utf8PathBuf, out: &mut dyn Write) -> Result<(), CliError> {
    let dropped = drop_last(&ManifestStore::new(prefix.clone()))?;
    writeln!(out, "dropped {dropped}").map_err(CliError::WriteOutput)
}
