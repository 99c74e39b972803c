//! [`ElementStore`] backed by an external engine executable.
//!
//! The engine speaks a small line protocol:
//!
//! - `read-index <file>` prints one `quadtree offset size` line per tile;
//! - `write-index <file>` builds the file's index and prints `tiles <n>`;
//! - `merge <prefix> <output> <start> <end> [--allow-missing-users]
//!   --input <name>... --change <path>...` prints `tiles <n>`.
//!
//! Dates are passed as `%Y-%m-%dT%H:%M:%S`. A non-zero exit status is an
//! engine failure carrying the trimmed stderr.

use std::{
    ffi::OsString,
    process::{Command, Output},
};

use camino::Utf8Path;
use tilesync_core::{
    ElementStore, ElementStoreError, MergeReport, MergeRequest, QuadtreeKey, TileIndexEntry,
};

use crate::timestamp::format_end_date;

/// Executable run when none is configured.
pub const DEFAULT_ENGINE: &str = "oqt-engine";

/// Runs the engine executable once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessElementStore {
    program: OsString,
}

impl Default for ProcessElementStore {
    fn default() -> Self {
        Self::new(DEFAULT_ENGINE)
    }
}

impl ProcessElementStore {
    /// Store running `program`, looked up on `PATH` when not a path.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// The configured executable.
    #[must_use]
    pub fn program(&self) -> &std::ffi::OsStr {
        &self.program
    }

    fn run(&self, args: &[String]) -> Result<String, ElementStoreError> {
        log::debug!("running {} {}", self.program.to_string_lossy(), args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|source| ElementStoreError::Engine {
                message: format!(
                    "cannot run {}: {source}",
                    self.program.to_string_lossy()
                ),
            })?;
        check_status(&output, args.first().map_or("", String::as_str))?;
        String::from_utf8(output.stdout).map_err(|_| ElementStoreError::Engine {
            message: "engine output is not UTF-8".to_owned(),
        })
    }
}

impl ElementStore for ProcessElementStore {
    fn read_tile_index(&self, path: &Utf8Path) -> Result<Vec<TileIndexEntry>, ElementStoreError> {
        let stdout = self.run(&["read-index".to_owned(), path.to_string()])?;
        let entries = parse_index(&stdout)?;
        if entries.is_empty() {
            return Err(ElementStoreError::MissingIndex {
                path: path.to_owned(),
            });
        }
        Ok(entries)
    }

    fn write_tile_index(&self, path: &Utf8Path) -> Result<u64, ElementStoreError> {
        let stdout = self.run(&["write-index".to_owned(), path.to_string()])?;
        parse_tile_count(&stdout)
    }

    fn merge_changes(&self, request: &MergeRequest) -> Result<MergeReport, ElementStoreError> {
        let stdout = self.run(&merge_args(request))?;
        Ok(MergeReport {
            tiles: parse_tile_count(&stdout)?,
        })
    }
}

fn merge_args(request: &MergeRequest) -> Vec<String> {
    let mut args = vec![
        "merge".to_owned(),
        request.prefix.to_string(),
        request.output.clone(),
        format_end_date(request.start),
        format_end_date(request.end),
    ];
    if request.allow_missing_users {
        args.push("--allow-missing-users".to_owned());
    }
    for input in &request.inputs {
        args.extend(["--input".to_owned(), input.clone()]);
    }
    for change in &request.changes {
        args.extend(["--change".to_owned(), change.to_string()]);
    }
    args
}

fn check_status(output: &Output, command: &str) -> Result<(), ElementStoreError> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(ElementStoreError::Engine {
        message: format!("{command} exited with {}: {}", output.status, stderr.trim()),
    })
}

fn parse_index(stdout: &str) -> Result<Vec<TileIndexEntry>, ElementStoreError> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let malformed = || ElementStoreError::Engine {
                message: format!("malformed index line {line:?}"),
            };
            let mut fields = line.split_whitespace();
            let mut next = || fields.next().ok_or_else(malformed);
            let key = next()?.parse::<i64>().map_err(|_| malformed())?;
            let offset = next()?.parse::<u64>().map_err(|_| malformed())?;
            let size = next()?.parse::<u64>().map_err(|_| malformed())?;
            Ok(TileIndexEntry {
                key: QuadtreeKey(key),
                offset,
                size,
            })
        })
        .collect()
}

fn parse_tile_count(stdout: &str) -> Result<u64, ElementStoreError> {
    stdout
        .lines()
        .filter_map(|line| line.trim().strip_prefix("tiles "))
        .next_back()
        .and_then(|count| count.trim().parse().ok())
        .ok_or_else(|| ElementStoreError::Engine {
            message: format!("expected `tiles <n>` in engine output, got {:?}", stdout.trim()),
        })
}

#[cfg(test)]
#[expect(clippy::expect_used, reason = "tests fail fast on invalid fixtures")]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;

    fn request() -> MergeRequest {
        MergeRequest {
            prefix: Utf8PathBuf::from("/data/planet"),
            inputs: vec!["planet.pbf".to_owned(), "20200102.pbfc".to_owned()],
            changes: vec![Utf8PathBuf::from("/data/diffs/5002.osc.gz")],
            start: Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).single().expect("date"),
            end: Utc.with_ymd_and_hms(2020, 1, 3, 0, 0, 0).single().expect("date"),
            output: "20200103.pbfc".to_owned(),
            allow_missing_users: true,
        }
    }

    #[rstest]
    fn merge_arguments_follow_the_protocol() {
        assert_eq!(
            merge_args(&request()),
            vec![
                "merge",
                "/data/planet",
                "20200103.pbfc",
                "2020-01-02T00:00:00",
                "2020-01-03T00:00:00",
                "--allow-missing-users",
                "--input",
                "planet.pbf",
                "--input",
                "20200102.pbfc",
                "--change",
                "/data/diffs/5002.osc.gz",
            ]
        );
    }

    #[rstest]
    fn parses_index_lines() {
        let entries = parse_index("0 0 120\n\n2305843009213693953 120 64\n").expect("parses");
        assert_eq!(
            entries,
            vec![
                TileIndexEntry { key: QuadtreeKey::ROOT, offset: 0, size: 120 },
                TileIndexEntry {
                    key: QuadtreeKey(2_305_843_009_213_693_953),
                    offset: 120,
                    size: 64
                },
            ]
        );
    }

    #[rstest]
    #[case("0 0\n")]
    #[case("A 0 1\n")]
    #[case("0 -1 1\n")]
    fn rejects_malformed_index_lines(#[case] stdout: &str) {
        assert!(matches!(
            parse_index(stdout),
            Err(ElementStoreError::Engine { .. })
        ));
    }

    #[rstest]
    #[case("tiles 42\n", Some(42))]
    #[case("merging\ntiles 7\n", Some(7))]
    #[case("done\n", None)]
    fn reads_tile_count(#[case] stdout: &str, #[case] expected: Option<u64>) {
        assert_eq!(parse_tile_count(stdout).ok(), expected);
    }

    #[rstest]
    fn missing_executable_is_an_engine_error() {
        let store = ProcessElementStore::new("/nonexistent/tilesync-engine");
        let err = store
            .write_tile_index(Utf8Path::new("planet.pbf"))
            .expect_err("cannot spawn");
        assert!(matches!(err, ElementStoreError::Engine { .. }));
    }

    #[cfg(unix)]
    #[rstest]
    fn runs_a_script_engine() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("engine.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\ncase \"$1\" in\n  read-index) echo \"0 0 10\" ;;\n  write-index) echo \"tiles 3\" ;;\n  *) echo \"bad $1\" >&2; exit 2 ;;\nesac\n",
        )
        .expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("chmod");

        let store = ProcessElementStore::new(script.as_os_str());
        let path = Utf8Path::new("planet.pbf");
        assert_eq!(store.write_tile_index(path).expect("write-index"), 3);
        assert_eq!(store.read_tile_index(path).expect("read-index").len(), 1);
        let err = store.merge_changes(&request()).expect_err("merge rejected");
        assert!(
            matches!(err, ElementStoreError::Engine { ref message } if message.contains("bad merge"))
        );
    }
}
