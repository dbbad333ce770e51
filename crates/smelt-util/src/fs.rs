//! Filesystem utilities for Smelt.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::UtilError;

fn io_error(path: &Path, source: std::io::Error) -> UtilError {
    UtilError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Create `path` and any missing parents; an existing directory is fine.
///
/// # Errors
/// Returns an error if a component cannot be created.
pub fn ensure_dir(path: &Path) -> Result<(), UtilError> {
    std::fs::create_dir_all(path).map_err(|source| io_error(path, source))
}

/// Last modification time of `path`, or `None` when it does not exist.
///
/// # Errors
/// Returns an error if the path exists but its metadata cannot be read.
pub fn modified_time(path: &Path) -> Result<Option<SystemTime>, UtilError> {
    match std::fs::metadata(path) {
        Ok(meta) => meta
            .modified()
            .map(Some)
            .map_err(|source| io_error(path, source)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(io_error(path, source)),
    }
}

/// Size of the file at `path` in bytes.
///
/// # Errors
/// Returns an error if the file metadata cannot be read.
pub fn file_size(path: &Path) -> Result<u64, UtilError> {
    std::fs::metadata(path)
        .map(|meta| meta.len())
        .map_err(|source| io_error(path, source))
}

/// Read a text file, returning `None` when it does not exist.
///
/// # Errors
/// Returns an error if the file exists but cannot be read.
pub fn read_to_string_if_exists(path: &Path) -> Result<Option<String>, UtilError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(io_error(path, source)),
    }
}

/// Remove a single file. Returns whether something was removed.
///
/// # Errors
/// Returns an error if the file exists but cannot be removed.
pub fn remove_file_if_exists(path: &Path) -> Result<bool, UtilError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(io_error(path, source)),
    }
}

/// Remove a directory and all its contents. Returns whether something was removed.
///
/// # Errors
/// Returns an error if the directory exists but cannot be removed.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<bool, UtilError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(io_error(path, source)),
    }
}

/// Whether `pattern` contains glob metacharacters.
pub fn is_glob_pattern(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Expand `pattern` relative to `root` into a sorted list of root-relative paths.
///
/// A pattern without metacharacters is returned unchanged, even when the file
/// does not exist yet, so that missing sources surface as dangling dependencies
/// rather than silently disappearing.
///
/// # Errors
/// Returns an error if the pattern is malformed or a matched entry cannot be read.
pub fn expand_glob(root: &Path, pattern: &str) -> Result<Vec<PathBuf>, UtilError> {
    if !is_glob_pattern(pattern) {
        return Ok(vec![PathBuf::from(pattern)]);
    }

    let full = root.join(pattern);
    let full_str = full.to_string_lossy();
    let entries = glob::glob(&full_str).map_err(|e| UtilError::GlobPattern {
        pattern: pattern.to_owned(),
        message: e.to_string(),
    })?;

    let mut matches = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| UtilError::Io {
            path: e.path().display().to_string(),
            source: e.into_error(),
        })?;
        if path.is_file() {
            let relative = path.strip_prefix(root).map_or(path.clone(), Path::to_path_buf);
            matches.push(relative);
        }
    }
    matches.sort();
    Ok(matches)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn ensure_dir_creates_object_tree_twice() {
        let tmp = tempfile::tempdir().unwrap();
        let objects = tmp.path().join("objects/unix");
        ensure_dir(&objects).unwrap();
        ensure_dir(&objects).unwrap();
        assert!(objects.is_dir());
    }

    #[test]
    fn modified_time_absent_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(modified_time(&tmp.path().join("nope")).unwrap().is_none());
    }

    #[test]
    fn modified_time_present() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("a.txt");
        fs::write(&file, b"x").unwrap();
        assert!(modified_time(&file).unwrap().is_some());
    }

    #[test]
    fn read_to_string_if_exists_absent() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(read_to_string_if_exists(&tmp.path().join("x.d"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn remove_file_if_exists_reports_removal() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("out.o");
        fs::write(&file, b"obj").unwrap();
        assert!(remove_file_if_exists(&file).unwrap());
        assert!(!file.exists());
        assert!(!remove_file_if_exists(&file).unwrap());
    }

    #[test]
    fn remove_dir_all_if_exists_removes() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("objects");
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::write(dir.join("src").join("a.o"), b"x").unwrap();

        assert!(remove_dir_all_if_exists(&dir).unwrap());
        assert!(!dir.exists());
    }

    #[test]
    fn remove_dir_all_if_exists_absent_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!remove_dir_all_if_exists(&tmp.path().join("nonexistent")).unwrap());
    }

    #[test]
    fn expand_glob_literal_passthrough() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = expand_glob(tmp.path(), "../../src/Track.cpp").unwrap();
        assert_eq!(paths, vec![PathBuf::from("../../src/Track.cpp")]);
    }

    #[test]
    fn expand_glob_matches_sorted_relative() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("b.cpp"), b"").unwrap();
        fs::write(src.join("a.cpp"), b"").unwrap();
        fs::write(src.join("a.h"), b"").unwrap();

        let paths = expand_glob(tmp.path(), "src/*.cpp").unwrap();
        assert_eq!(
            paths,
            vec![PathBuf::from("src/a.cpp"), PathBuf::from("src/b.cpp")]
        );
    }

    #[test]
    fn expand_glob_invalid_pattern() {
        let tmp = tempfile::tempdir().unwrap();
        let result = expand_glob(tmp.path(), "src/[*.cpp");
        assert!(result.is_err());
    }
}
