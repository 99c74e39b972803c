//! Command-line interface for keeping tile snapshots in sync.
#![forbid(unsafe_code)]

use std::{ffi::OsString, io::Write};

use clap::{Parser, Subcommand};

mod error;
mod initial;
mod tiles;
mod update;

pub use error::{CliError, EXIT_FAILURE, EXIT_HANDLED};

use initial::{InitialArgs, run_initial};
use tiles::{TilesArgs, run_tiles};
use update::{DroplastArgs, UpdateArgs, run_droplast, run_update};

pub(crate) const ARG_PREFIX: &str = "prefix";
pub(crate) const ARG_ENGINE: &str = "engine";
pub(crate) const ENV_ENGINE: &str = "TILESYNC_ENGINE";
pub(crate) const ENV_UPDATE_PREFIX: &str = "TILESYNC_CMDS_UPDATE_PREFIX";
pub(crate) const ENV_DROPLAST_PREFIX: &str = "TILESYNC_CMDS_DROPLAST_PREFIX";

/// Run the tilesync CLI with the current process arguments and environment.
pub fn run() -> Result<(), CliError> {
    run_with(std::env::args_os(), &mut std::io::stdout().lock())
}

/// Run the CLI with explicit arguments, writing command output to `out`.
pub fn run_with<I, T>(args: I, out: &mut dyn Write) -> Result<(), CliError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::try_parse_from(args).map_err(CliError::ArgumentParsing)?;
    match cli.command {
        Command::Initial(args) => run_initial(args.into_config()?, out),
        Command::Update(args) => run_update(args.into_config()?, out),
        Command::Droplast(args) => run_droplast(&args.into_prefix()?, out),
        Command::Tiles(args) => run_tiles(args.into_config()?, out),
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "tilesync",
    about = "Keep tile-partitioned OpenStreetMap snapshots in sync with a replication feed",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Initialise a prefix from an existing snapshot.
    Initial(InitialArgs),
    /// Fetch and merge new replication diffs.
    Update(UpdateArgs),
    /// Remove the newest snapshot.
    Droplast(DroplastArgs),
    /// List the tiles a region selects.
    Tiles(TilesArgs),
}

#[cfg(test)]
mod tests;
