//! Focused unit tests covering argument parsing and configuration.

use super::*;
use crate::{
    initial::{InitialArgs, InitialConfig},
    tiles::{TilesArgs, TilesConfig},
    update::{UpdateArgs, UpdateConfig},
};
use camino::Utf8PathBuf;
use rstest::rstest;
use tempfile::TempDir;
use tilesync_core::{BoundingBox, Region};
use tilesync_data::{ManifestError, SyncError};

fn parse(args: &[&str]) -> Command {
    Cli::try_parse_from(args)
        .unwrap_or_else(|err| panic!("failed to parse {args:?}: {err}"))
        .command
}

#[rstest]
fn parses_update_positionals_and_flags() {
    match parse(&["tilesync", "update", "/srv/planet", "5", "--offline", "--engine", "/opt/engine"]) {
        Command::Update(args) => {
            assert_eq!(args.prefix, Some(Utf8PathBuf::from("/srv/planet")));
            assert_eq!(args.max_diffs, Some(5));
            assert!(args.offline);
            assert_eq!(args.engine.as_deref(), Some("/opt/engine"));
        }
        other => panic!("expected update, got {other:?}"),
    }
}

#[rstest]
fn parses_initial_with_overrides() {
    match parse(&[
        "tilesync",
        "initial",
        "/srv/planet",
        "planet.pbf",
        "2020-01-01T00:00:00",
        "/srv/diffs",
        "5000",
        "roundtime=no",
        "mergeoscfiles=yes",
    ]) {
        Command::Initial(args) => {
            assert_eq!(args.initial_state, Some(5000));
            assert_eq!(args.overrides, vec!["roundtime=no", "mergeoscfiles=yes"]);
        }
        other => panic!("expected initial, got {other:?}"),
    }
}

#[rstest]
fn rejects_bbox_with_poly() {
    let err = Cli::try_parse_from([
        "tilesync", "tiles", "/srv/planet", "--bbox", "0,0,1,1", "--poly", "area.poly",
    ])
    .expect_err("conflicting regions");
    assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
}

#[rstest]
fn update_config_requires_prefix() {
    let err = UpdateConfig::try_from(UpdateArgs::default()).expect_err("no prefix");
    match err {
        CliError::MissingArgument { field, env } => {
            assert_eq!(field, ARG_PREFIX);
            assert_eq!(env, ENV_UPDATE_PREFIX);
        }
        other => panic!("expected MissingArgument, found {other:?}"),
    }
}

#[rstest]
fn update_config_carries_options() {
    let config = UpdateConfig::try_from(UpdateArgs {
        prefix: Some(Utf8PathBuf::from("/srv/planet")),
        max_diffs: Some(2),
        offline: true,
        engine: None,
    })
    .expect("valid update");
    assert_eq!(config.options.max_diffs, Some(2));
    assert!(config.options.offline);
    assert_eq!(config.engine, tilesync_data::ProcessElementStore::default());
}

fn initial_args(end_timestamp: &str) -> InitialArgs {
    InitialArgs {
        prefix: Some(Utf8PathBuf::from("/srv/planet")),
        orig_file: Some("planet.pbf".to_owned()),
        end_timestamp: Some(end_timestamp.to_owned()),
        diffs_dir: Some(Utf8PathBuf::from("/srv/diffs")),
        initial_state: Some(5000),
        overrides: vec!["mergeoscfiles=yes".to_owned()],
        engine: Some("/opt/engine".to_owned()),
    }
}

#[rstest]
#[case("2020-01-01T00:00:00")]
#[case("2020-01-01T00-00-00")]
fn initial_config_accepts_both_timestamp_forms(#[case] end_timestamp: &str) {
    let config = InitialConfig::try_from(initial_args(end_timestamp)).expect("valid initial");
    assert_eq!(config.snapshot.initial_sequence, 5000);
    assert_eq!(config.snapshot.overrides, vec!["mergeoscfiles=yes"]);
    assert_eq!(
        tilesync_data::timestamp::format_end_date(config.snapshot.end_date),
        "2020-01-01T00:00:00"
    );
}

#[rstest]
fn initial_config_rejects_bad_timestamp() {
    let err = InitialConfig::try_from(initial_args("yesterday")).expect_err("bad timestamp");
    assert!(matches!(
        err,
        CliError::InvalidTimestamp {
            field: "end_timestamp",
            ..
        }
    ));
}

#[rstest]
fn initial_config_reports_first_missing_field() {
    let args = InitialArgs {
        initial_state: None,
        ..initial_args("2020-01-01T00:00:00")
    };
    let err = InitialConfig::try_from(args).expect_err("no initial state");
    assert!(matches!(
        err,
        CliError::MissingArgument {
            field: "initial_state",
            ..
        }
    ));
}

fn tiles_args() -> TilesArgs {
    TilesArgs {
        path: Some(Utf8PathBuf::from("/srv/planet")),
        ..TilesArgs::default()
    }
}

#[rstest]
fn tiles_default_to_the_planet() {
    let config = TilesConfig::try_from(tiles_args()).expect("valid tiles");
    assert_eq!(config.region, Region::Planet);
}

#[rstest]
fn tiles_parse_bbox_in_degrees() {
    let config = TilesConfig::try_from(TilesArgs {
        bbox: Some("10,10,20,20".to_owned()),
        ..tiles_args()
    })
    .expect("valid bbox");
    assert_eq!(
        config.region,
        Region::Box(BoundingBox::from_degrees(10.0, 10.0, 20.0, 20.0).expect("box"))
    );
}

#[rstest]
fn tiles_reject_inverted_bbox() {
    let err = TilesConfig::try_from(TilesArgs {
        bbox: Some("20,20,10,10".to_owned()),
        ..tiles_args()
    })
    .expect_err("inverted box");
    assert!(matches!(err, CliError::InvalidBoundingBox(_)));
}

#[rstest]
fn tiles_read_poly_files() {
    let dir = TempDir::new().expect("tempdir");
    let path = Utf8PathBuf::from_path_buf(dir.path().join("area.poly")).expect("utf8 path");
    std::fs::write(&path, "area\n1\n  0 0\n  0 1\n  1 1\n  1 0\nEND\nEND\n").expect("write poly");
    let config = TilesConfig::try_from(TilesArgs {
        poly: Some(path),
        ..tiles_args()
    })
    .expect("valid poly");
    assert!(matches!(config.region, Region::Polygon(_)));
}

#[rstest]
fn tiles_report_missing_poly_file() {
    let err = TilesConfig::try_from(TilesArgs {
        poly: Some(Utf8PathBuf::from("/nonexistent/area.poly")),
        ..tiles_args()
    })
    .expect_err("no such file");
    assert!(matches!(err, CliError::InvalidPolygon { .. }));
}

#[rstest]
fn handled_outcomes_exit_with_one() {
    assert_eq!(CliError::NoNewDiffs { last_sequence: 5 }.exit_code(), EXIT_HANDLED);
    let missing = CliError::Sync(SyncError::Manifest(ManifestError::ConfigMissing {
        path: Utf8PathBuf::from("/srv/planet/settings.json"),
    }));
    assert_eq!(missing.exit_code(), EXIT_HANDLED);
}

#[rstest]
fn other_failures_exit_with_two() {
    let err = CliError::Sync(SyncError::SnapshotExists {
        filename: "20200102.pbfc".to_owned(),
    });
    assert_eq!(err.exit_code(), EXIT_FAILURE);
}

#[rstest]
fn droplast_on_missing_manifest_fails() {
    let dir = TempDir::new().expect("tempdir");
    let prefix = dir.path().to_str().expect("utf8 tempdir");
    let mut out = Vec::new();
    let err = run_with(["tilesync", "droplast", prefix], &mut out).expect_err("no manifest");
    assert!(matches!(
        err,
        CliError::Sync(SyncError::Manifest(ManifestError::ManifestMissing { .. }))
    ));
    assert_eq!(err.exit_code(), EXIT_FAILURE);
}
