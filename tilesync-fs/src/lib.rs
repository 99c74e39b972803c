//! Shared filesystem helpers built on `cap-std` and `camino`.
//!
//! Every helper opens the parent directory of its target with ambient
//! authority and performs the operation relative to that handle. Writes that
//! must never be observed half-finished go through [`AtomicFile`], which
//! writes a hidden temporary sibling and renames it into place on commit.
#![forbid(unsafe_code)]

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8};
use std::io::{self, Write};
use std::path::Component;

/// Resolve an ambient directory for the given path and return the directory with the file name.
pub fn open_dir_and_file(path: &Utf8Path) -> io::Result<(fs_utf8::Dir, String)> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::other(format!("{path} should include a file name")))?
        .to_string();
    let dir = fs_utf8::Dir::open_ambient_dir(parent, ambient_authority())?;
    Ok((dir, file_name))
}

/// Ensure the parent directory for `path` exists, handling absolute paths safely for cap-std.
pub fn ensure_parent_dir(path: &Utf8Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => ensure_dir(parent),
        None => Ok(()),
    }
}

/// Create `path` and any missing ancestors.
pub fn ensure_dir(path: &Utf8Path) -> io::Result<()> {
    if path.as_str().is_empty() || path == Utf8Path::new("/") {
        return Ok(());
    }
    let (base_dir, relative) = base_dir_and_relative(path)?;
    if relative.as_os_str().is_empty() {
        return Ok(());
    }
    base_dir.create_dir_all(&relative)
}

/// Return whether a path exists and is a regular file.
///
/// A missing file or parent directory yields `Ok(false)`.
pub fn file_is_file(path: &Utf8Path) -> io::Result<bool> {
    let (dir, name) = match open_dir_and_file(path) {
        Ok(found) => found,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    match dir.metadata(name.as_str()) {
        Ok(meta) => Ok(meta.is_file()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Size of the file at `path` in bytes.
pub fn file_size(path: &Utf8Path) -> io::Result<u64> {
    let (dir, name) = open_dir_and_file(path)?;
    dir.metadata(name.as_str()).map(|meta| meta.len())
}

/// Read the whole file at `path` as UTF-8 text.
pub fn read_to_string(path: &Utf8Path) -> io::Result<String> {
    let (dir, name) = open_dir_and_file(path)?;
    dir.read_to_string(name.as_str())
}

/// Delete the file at `path`, returning whether it existed.
pub fn remove_file(path: &Utf8Path) -> io::Result<bool> {
    let (dir, name) = match open_dir_and_file(path) {
        Ok(found) => found,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    match dir.remove_file(name.as_str()) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Replace the contents of `path` with `contents` atomically.
pub fn write_atomic(path: &Utf8Path, contents: &[u8]) -> io::Result<()> {
    let mut file = AtomicFile::create(path)?;
    file.write_all(contents)?;
    file.commit()
}

/// Append `contents` to `path`, creating the file and its parents.
pub fn append(path: &Utf8Path, contents: &[u8]) -> io::Result<()> {
    ensure_parent_dir(path)?;
    let (dir, name) = open_dir_and_file(path)?;
    let mut options = cap_std::fs::OpenOptions::new();
    options.append(true).create(true);
    let mut file = dir.open_with(name.as_str(), &options)?;
    file.write_all(contents)?;
    file.sync_data()
}

/// A file that only appears under its final name once committed.
///
/// Dropping an uncommitted `AtomicFile` removes the temporary file.
#[derive(Debug)]
pub struct AtomicFile {
    dir: fs_utf8::Dir,
    temp_name: String,
    final_name: String,
    file: Option<fs_utf8::File>,
}

impl AtomicFile {
    /// Start writing a replacement for `path`, creating parent directories.
    pub fn create(path: &Utf8Path) -> io::Result<Self> {
        ensure_parent_dir(path)?;
        let (dir, final_name) = open_dir_and_file(path)?;
        let temp_name = format!(".{final_name}.partial");
        let file = dir.create(temp_name.as_str())?;
        Ok(Self {
            dir,
            temp_name,
            final_name,
            file: Some(file),
        })
    }

    /// Flush, sync and rename the temporary file over the target.
    pub fn commit(mut self) -> io::Result<()> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| io::Error::other("atomic file already committed"))?;
        file.flush()?;
        file.sync_all()?;
        drop(file);
        self.dir.rename(
            self.temp_name.as_str(),
            &self.dir,
            self.final_name.as_str(),
        )
    }

    fn file(&mut self) -> io::Result<&mut fs_utf8::File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("atomic file already committed"))
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file()?.flush()
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if self.file.take().is_some()
            && let Err(err) = self.dir.remove_file(self.temp_name.as_str())
        {
            log::warn!("failed to remove temporary file {}: {err}", self.temp_name);
        }
    }
}

/// Split an absolute or relative path into an ambient base directory and a relative suffix.
pub fn base_dir_and_relative(parent: &Utf8Path) -> io::Result<(fs_utf8::Dir, Utf8PathBuf)> {
    let std_parent = parent.as_std_path();

    let (base, relative) = match std_parent.components().next() {
        // Windows absolute path with a drive or UNC prefix.
        Some(Component::Prefix(prefix)) => {
            let prefix_str = prefix
                .as_os_str()
                .to_str()
                .ok_or_else(|| io::Error::other("non-UTF-8 path prefix"))?;

            let base = Utf8PathBuf::from(prefix_str).join(std::path::MAIN_SEPARATOR.to_string());
            let relative = std_parent
                .strip_prefix(base.as_std_path())
                .or_else(|_| std_parent.strip_prefix(prefix.as_os_str()))
                .map_err(|_| io::Error::other("failed to strip prefix from parent path"))?
                .to_path_buf();
            (base, relative)
        }
        // Unix-style absolute path.
        Some(Component::RootDir) => {
            let base = Utf8PathBuf::from(std::path::MAIN_SEPARATOR.to_string());
            let relative = std_parent
                .strip_prefix(base.as_std_path())
                .map_err(|_| io::Error::other("failed to strip root from absolute path"))?
                .to_path_buf();
            (base, relative)
        }
        // Relative path: resolve from the current directory.
        _ => (Utf8PathBuf::from("."), std_parent.to_path_buf()),
    };

    let dir = fs_utf8::Dir::open_ambient_dir(&base, ambient_authority())?;
    let utf8_relative = Utf8PathBuf::from_path_buf(relative)
        .map_err(|_| io::Error::other("non-UTF-8 parent path"))?;

    Ok((dir, utf8_relative))
}

#[cfg(test)]
#[expect(clippy::expect_used, reason = "tests fail fast on invalid fixtures")]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn workspace() -> (TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 tempdir");
        (dir, root)
    }

    #[rstest]
    fn atomic_write_creates_parents_and_replaces(workspace: (TempDir, Utf8PathBuf)) {
        let (_guard, root) = workspace;
        let target = root.join("nested/deeper/settings.json");
        write_atomic(&target, b"first").expect("first write");
        write_atomic(&target, b"second").expect("second write");
        assert_eq!(read_to_string(&target).expect("read back"), "second");
        assert!(!file_is_file(&root.join("nested/deeper/.settings.json.partial")).expect("stat"));
    }

    #[rstest]
    fn dropped_atomic_file_leaves_no_trace(workspace: (TempDir, Utf8PathBuf)) {
        let (_guard, root) = workspace;
        let target = root.join("5001.osc.gz");
        {
            let mut file = AtomicFile::create(&target).expect("create");
            file.write_all(b"partial").expect("write");
        }
        assert!(!file_is_file(&target).expect("stat target"));
        assert!(!file_is_file(&root.join(".5001.osc.gz.partial")).expect("stat temporary"));
    }

    #[rstest]
    fn stats_and_removes_files(workspace: (TempDir, Utf8PathBuf)) {
        let (_guard, root) = workspace;
        let target = root.join("tile.pbfc");
        assert!(!file_is_file(&target).expect("stat missing"));
        assert!(!remove_file(&target).expect("remove missing"));
        write_atomic(&target, b"12345").expect("write");
        assert!(file_is_file(&target).expect("stat present"));
        assert_eq!(file_size(&target).expect("size"), 5);
        assert!(remove_file(&target).expect("remove present"));
        assert!(!file_is_file(&target).expect("stat removed"));
    }

    #[rstest]
    fn append_extends_existing_content(workspace: (TempDir, Utf8PathBuf)) {
        let (_guard, root) = workspace;
        let target = root.join("diffs/state.csv");
        append(&target, b"5001,a\n").expect("first append");
        append(&target, b"5002,b\n").expect("second append");
        assert_eq!(read_to_string(&target).expect("read"), "5001,a\n5002,b\n");
    }

    #[rstest]
    fn missing_parent_is_not_a_file(workspace: (TempDir, Utf8PathBuf)) {
        let (_guard, root) = workspace;
        assert!(!file_is_file(&root.join("absent/file")).expect("stat"));
    }
}
