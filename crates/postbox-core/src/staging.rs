//! Per-request scratch directories.
//!
//! Every request that touches disk gets its own directory under the staging
//! root, so concurrent requests never see each other's files. The root
//! itself holds operator-provided files that attachment directives may
//! reference by name.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::{Error, Result};

/// Root under which request directories are created.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    /// Creates an area rooted at `root`. Nothing is created until [`scoped`](Self::scoped).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a fresh, uniquely named directory for one request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the root or the directory cannot be created.
    pub fn scoped(&self) -> Result<StagingDir> {
        std::fs::create_dir_all(&self.root)?;
        let dir = tempfile::Builder::new()
            .prefix("postbox-")
            .tempdir_in(&self.root)?;
        tracing::debug!(path = %dir.path().display(), "created staging directory");
        Ok(StagingDir {
            dir,
            root: self.root.clone(),
        })
    }
}

/// A request's scratch directory, removed on [`close`](Self::close) or drop.
#[derive(Debug)]
pub struct StagingDir {
    dir: TempDir,
    root: PathBuf,
}

impl StagingDir {
    /// Path of the directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Where a file called `name` is written inside this directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `name` has no usable file name.
    pub fn file_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.dir.path().join(sanitize_filename(name)?))
    }

    /// Finds a file called `name`, preferring this directory over the root.
    ///
    /// Returns the request-local path when neither exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `name` has no usable file name.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let name = sanitize_filename(name)?;
        let local = self.dir.path().join(&name);
        if local.exists() {
            return Ok(local);
        }
        let shared = self.root.join(&name);
        if shared.exists() {
            return Ok(shared);
        }
        Ok(local)
    }

    /// Removes the directory, logging instead of failing.
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove staging directory");
        }
    }
}

/// Reduces `name` to its final path component.
///
/// # Errors
///
/// Returns [`Error::Validation`] for names that are empty or only `.`/`..`.
pub fn sanitize_filename(name: &str) -> Result<String> {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if last.is_empty() || last == "." || last == ".." {
        return Err(Error::Validation(format!("invalid file name '{name}'")));
    }
    Ok(last.to_string())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_dirs_are_distinct_and_removed() {
        let root = tempfile::tempdir().unwrap();
        let area = StagingArea::new(root.path().join("staging"));
        let first = area.scoped().unwrap();
        let second = area.scoped().unwrap();
        assert_ne!(first.path(), second.path());
        assert!(first.path().starts_with(area.root()));

        let path = first.path().to_path_buf();
        std::fs::write(first.file_path("a.txt").unwrap(), b"x").unwrap();
        first.close();
        assert!(!path.exists());
        assert!(second.path().exists());
    }

    #[test]
    fn test_resolve_prefers_request_dir() {
        let root = tempfile::tempdir().unwrap();
        let area = StagingArea::new(root.path());
        std::fs::write(root.path().join("logo.png"), b"shared").unwrap();
        let dir = area.scoped().unwrap();

        assert_eq!(dir.resolve("logo.png").unwrap(), root.path().join("logo.png"));
        std::fs::write(dir.file_path("logo.png").unwrap(), b"local").unwrap();
        assert_eq!(dir.resolve("logo.png").unwrap(), dir.path().join("logo.png"));
        assert_eq!(dir.resolve("none.png").unwrap(), dir.path().join("none.png"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("C:\\tmp\\a b.pdf").unwrap(), "a b.pdf");
        assert!(sanitize_filename("..").is_err());
        assert!(sanitize_filename("dir/").is_err());
        assert!(sanitize_filename("").is_err());
    }
}
