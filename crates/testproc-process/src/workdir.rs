//! Project root discovery
//!
//! Harnesses usually need paths relative to the project being tested
//! (fixtures, scripts, `.env` files) regardless of which directory the test
//! binary was started from.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ProcessError, Result};

/// Maximum number of parent directories searched before giving up
pub const MAX_SEARCH_ITERATIONS: usize = 30;

/// Marker file identifying a project root
pub const DEFAULT_MARKER: &str = "Cargo.toml";

/// Nearest directory at or above the current directory containing `Cargo.toml`
pub fn project_root() -> Result<PathBuf> {
    let cwd = std::env::current_dir().map_err(ProcessError::WorkingDir)?;
    find_project_root(cwd, DEFAULT_MARKER)
}

/// Nearest directory at or above `start` containing `marker`
///
/// The marker may be a file or a directory (e.g. `.git`).
/// Symlinks in `start` are resolved first, so the returned path is canonical.
pub fn find_project_root(start: impl AsRef<Path>, marker: &str) -> Result<PathBuf> {
    let mut dir = start
        .as_ref()
        .canonicalize()
        .map_err(ProcessError::WorkingDir)?;

    for _ in 0..MAX_SEARCH_ITERATIONS {
        if dir.join(marker).exists() {
            debug!(root = %dir.display(), marker, "Found project root");
            return Ok(dir);
        }

        match dir.parent() {
            Some(parent) => dir = parent.to_path_buf(),
            None => break,
        }
    }

    Err(ProcessError::ProjectRootNotFound {
        marker: marker.to_string(),
        iterations: MAX_SEARCH_ITERATIONS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    struct CwdGuard(PathBuf);

    impl CwdGuard {
        fn enter(dir: &Path) -> Self {
            let original = std::env::current_dir().unwrap();
            std::env::set_current_dir(dir).unwrap();
            Self(original)
        }
    }

    impl Drop for CwdGuard {
        fn drop(&mut self) {
            let _ = std::env::set_current_dir(&self.0);
        }
    }

    #[test]
    fn test_finds_marker_in_start_dir() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("Cargo.toml"), "[package]\n").unwrap();

        let root = find_project_root(temp.path(), DEFAULT_MARKER).unwrap();
        assert_eq!(root, temp.path().canonicalize().unwrap());
    }

    #[test]
    fn test_finds_marker_in_parent_dir() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("Cargo.toml"), "[package]\n").unwrap();
        let nested = temp.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        let root = find_project_root(&nested, DEFAULT_MARKER).unwrap();
        assert_eq!(root, temp.path().canonicalize().unwrap());
    }

    #[test]
    fn test_custom_marker() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("go.mod"), "module test\n").unwrap();
        let nested = temp.path().join("cmd");
        fs::create_dir_all(&nested).unwrap();

        let root = find_project_root(&nested, "go.mod").unwrap();
        assert_eq!(root, temp.path().canonicalize().unwrap());
    }

    #[test]
    fn test_marker_directory_counts() {
        let temp = tempfile::tempdir().unwrap();
        let marker = "testproc-marker-dir";
        fs::create_dir_all(temp.path().join(marker)).unwrap();
        let nested = temp.path().join("src");
        fs::create_dir_all(&nested).unwrap();

        let root = find_project_root(&nested, marker).unwrap();
        assert_eq!(root, temp.path().canonicalize().unwrap());
    }

    #[test]
    fn test_gives_up_after_max_iterations() {
        let temp = tempfile::tempdir().unwrap();
        // A marker above the search limit must not be found.
        fs::write(temp.path().join("testproc.marker"), "").unwrap();
        let mut deep = temp.path().to_path_buf();
        for _ in 0..MAX_SEARCH_ITERATIONS + 5 {
            deep = deep.join("level");
        }
        fs::create_dir_all(&deep).unwrap();

        let err = find_project_root(&deep, "testproc.marker").unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("testproc.marker not found after {MAX_SEARCH_ITERATIONS} iterations")
        );
    }

    #[test]
    fn test_missing_start_dir() {
        let temp = tempfile::tempdir().unwrap();
        let err = find_project_root(temp.path().join("missing"), DEFAULT_MARKER).unwrap_err();

        assert!(matches!(err, ProcessError::WorkingDir(_)));
    }

    #[test]
    #[serial]
    fn test_project_root_from_current_dir() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("Cargo.toml"), "[package]\n").unwrap();
        let sub = temp.path().join("subdir");
        fs::create_dir_all(&sub).unwrap();

        let _cwd = CwdGuard::enter(&sub);
        let root = project_root().unwrap();

        assert_eq!(root, temp.path().canonicalize().unwrap());
    }

    #[test]
    #[serial]
    fn test_project_root_of_this_crate() {
        let root = project_root().unwrap();

        assert!(root.join("Cargo.toml").is_file());
        assert!(root.join("src").join("workdir.rs").is_file());
    }
}
