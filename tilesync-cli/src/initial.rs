//! `initial` command implementation.

use std::io::Write;

use camino::Utf8PathBuf;
use clap::Parser;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use tilesync_core::ElementStore;
use tilesync_data::{
    InitialSnapshot, ManifestStore, ProcessElementStore, initialise, timestamp::parse_timestamp,
};

use crate::{ARG_ENGINE, CliError, ENV_ENGINE};

const ENV_PREFIX: &str = "TILESYNC_CMDS_INITIAL_PREFIX";
const ENV_ORIG_FILE: &str = "TILESYNC_CMDS_INITIAL_ORIG_FILE";
const ENV_END_TIMESTAMP: &str = "TILESYNC_CMDS_INITIAL_END_TIMESTAMP";
const ENV_DIFFS_DIR: &str = "TILESYNC_CMDS_INITIAL_DIFFS_DIR";
const ENV_INITIAL_STATE: &str = "TILESYNC_CMDS_INITIAL_INITIAL_STATE";

/// CLI arguments for the `initial` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Start a prefix from an existing snapshot. Writes \
                 settings.json from the arguments and any key=value \
                 overrides (roundtime, sourceprfx, allowmissingusers, \
                 mergeoscfiles), indexes the snapshot and records it as the \
                 first manifest entry.",
    about = "Initialise a prefix from a snapshot"
)]
#[ortho_config(prefix = "TILESYNC")]
pub(crate) struct InitialArgs {
    /// Prefix directory to initialise.
    #[arg(value_name = "prefix")]
    #[serde(default)]
    pub(crate) prefix: Option<Utf8PathBuf>,
    /// Snapshot file name inside the prefix.
    #[arg(value_name = "orig_file")]
    #[serde(default)]
    pub(crate) orig_file: Option<String>,
    /// Timestamp of the newest data in the snapshot.
    #[arg(value_name = "end_timestamp")]
    #[serde(default)]
    pub(crate) end_timestamp: Option<String>,
    /// Directory for downloaded diffs.
    #[arg(value_name = "diffs_dir")]
    #[serde(default)]
    pub(crate) diffs_dir: Option<Utf8PathBuf>,
    /// Replication sequence the snapshot is current to.
    #[arg(value_name = "initial_state")]
    #[serde(default)]
    pub(crate) initial_state: Option<u64>,
    /// Settings overrides as key=value.
    #[arg(value_name = "key=value")]
    #[serde(default)]
    pub(crate) overrides: Vec<String>,
    /// Element engine executable.
    #[arg(long = ARG_ENGINE, value_name = "path", env = ENV_ENGINE)]
    #[serde(default)]
    pub(crate) engine: Option<String>,
}

impl InitialArgs {
    pub(crate) fn into_config(self) -> Result<InitialConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        InitialConfig::try_from(merged)
    }
}

/// Resolved `initial` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InitialConfig {
    pub(crate) prefix: Utf8PathBuf,
    pub(crate) snapshot: InitialSnapshot,
    pub(crate) engine: ProcessElementStore,
}

fn required<T>(value: Option<T>, field: &'static str, env: &'static str) -> Result<T, CliError> {
    value.ok_or(CliError::MissingArgument { field, env })
}

impl TryFrom<InitialArgs> for InitialConfig {
    type Error = CliError;

    fn try_from(args: InitialArgs) -> Result<Self, Self::Error> {
        let prefix = required(args.prefix, "prefix", ENV_PREFIX)?;
        let filename = required(args.orig_file, "orig_file", ENV_ORIG_FILE)?;
        let end_timestamp = required(args.end_timestamp, "end_timestamp", ENV_END_TIMESTAMP)?;
        let diffs_location = required(args.diffs_dir, "diffs_dir", ENV_DIFFS_DIR)?;
        let initial_sequence = required(args.initial_state, "initial_state", ENV_INITIAL_STATE)?;
        let end_date =
            parse_timestamp(&end_timestamp).map_err(|source| CliError::InvalidTimestamp {
                field: "end_timestamp",
                source,
            })?;
        Ok(Self {
            prefix,
            snapshot: InitialSnapshot {
                filename,
                end_date,
                diffs_location,
                initial_sequence,
                overrides: args.overrides,
            },
            engine: args
                .engine
                .map(ProcessElementStore::new)
                .unwrap_or_default(),
        })
    }
}

pub(crate) fn run_initial(config: InitialConfig, out: &mut dyn Write) -> Result<(), CliError> {
    initial_with(&config, &config.engine, out)
}

pub(crate) fn initial_with<E: ElementStore>(
    config: &InitialConfig,
    store: E,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let entry = initialise(&ManifestStore::new(config.prefix.clone()), &store, &config.snapshot)?;
    writeln!(out, "initialised {} with {entry}", config.prefix).map_err(CliError::WriteOutput)
}
