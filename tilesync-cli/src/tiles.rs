//! `tiles` command implementation.

use std::io::Write;

use camino::Utf8PathBuf;
use clap::Parser;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use tilesync_core::{BoundingBox, ElementStore, PolygonError, PolygonFilter, Region};
use tilesync_data::{ProcessElementStore, TileIndex, timestamp::parse_timestamp};

use crate::{ARG_ENGINE, ARG_PREFIX, CliError, ENV_ENGINE};

const ENV_TILES_PATH: &str = "TILESYNC_CMDS_TILES_PATH";

/// CLI arguments for the `tiles` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "List the tiles a region selects from a snapshot file or a \
                 prefix, with the snapshot and byte offset of every block \
                 that stores each tile.",
    about = "Resolve the tiles a region selects"
)]
#[ortho_config(prefix = "TILESYNC")]
pub(crate) struct TilesArgs {
    /// Snapshot file or prefix directory.
    #[arg(value_name = "path")]
    #[serde(default)]
    pub(crate) path: Option<Utf8PathBuf>,
    /// Region as minlon,minlat,maxlon,maxlat in degrees.
    #[arg(long, value_name = "box", conflicts_with = "poly")]
    #[serde(default)]
    pub(crate) bbox: Option<String>,
    /// Region as a .poly file.
    #[arg(long, value_name = "file")]
    #[serde(default)]
    pub(crate) poly: Option<Utf8PathBuf>,
    /// Ignore snapshots ending after this timestamp.
    #[arg(long = "as-of", value_name = "timestamp")]
    #[serde(default)]
    pub(crate) as_of: Option<String>,
    /// Element engine executable.
    #[arg(long = ARG_ENGINE, value_name = "path", env = ENV_ENGINE)]
    #[serde(default)]
    pub(crate) engine: Option<String>,
}

impl TilesArgs {
    pub(crate) fn into_config(self) -> Result<TilesConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        TilesConfig::try_from(merged)
    }
}

/// Resolved `tiles` command configuration.
#[derive(Debug, Clone)]
pub(crate) struct TilesConfig {
    pub(crate) path: Utf8PathBuf,
    pub(crate) region: Region,
    pub(crate) as_of: Option<chrono::DateTime<chrono::Utc>>,
    pub(crate) engine: ProcessElementStore,
}

impl TryFrom<TilesArgs> for TilesConfig {
    type Error = CliError;

    fn try_from(args: TilesArgs) -> Result<Self, Self::Error> {
        let path = args.path.ok_or(CliError::MissingArgument {
            field: ARG_PREFIX,
            env: ENV_TILES_PATH,
        })?;
        let region = match (args.bbox, args.poly) {
            (Some(bbox), _) => Region::from(
                bbox.parse::<BoundingBox>()
                    .map_err(CliError::InvalidBoundingBox)?,
            ),
            (None, Some(poly)) => Region::from(read_polygon(poly)?),
            (None, None) => Region::Planet,
        };
        let as_of = args
            .as_of
            .map(|value| parse_timestamp(&value))
            .transpose()
            .map_err(|source| CliError::InvalidTimestamp {
                field: "as-of",
                source,
            })?;
        Ok(Self {
            path,
            region,
            as_of,
            engine: args
                .engine
                .map(ProcessElementStore::new)
                .unwrap_or_default(),
        })
    }
}

fn read_polygon(path: Utf8PathBuf) -> Result<PolygonFilter, CliError> {
    let invalid = |source| CliError::InvalidPolygon {
        path: path.clone(),
        source,
    };
    let text =
        tilesync_fs::read_to_string(&path).map_err(|source| invalid(PolygonError::Read { source }))?;
    PolygonFilter::read_poly(text.as_bytes()).map_err(invalid)
}

pub(crate) fn run_tiles(config: TilesConfig, out: &mut dyn Write) -> Result<(), CliError> {
    tiles_with(&config, &config.engine, out)
}

pub(crate) fn tiles_with<E: ElementStore>(
    config: &TilesConfig,
    store: E,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let resolved = TileIndex::new(store)
        .with_progress(std::sync::Arc::new(tilesync_core::LogProgress))
        .resolve(&config.path, &config.region, config.as_of)?;
    let mut write = |line: String| writeln!(out, "{line}").map_err(CliError::WriteOutput);
    for (index, file) in resolved.files.iter().enumerate() {
        write(format!("# {index} {file}"))?;
    }
    for (key, locations) in &resolved.locations {
        let blocks = locations
            .iter()
            .map(|location| format!("{}:{}", location.source_index, location.offset))
            .collect::<Vec<_>>()
            .join(" ");
        write(format!("{key} {blocks}"))?;
    }
    write(format!(
        "# {} tiles within {}",
        resolved.tile_count(),
        resolved.bounds
    ))
}
