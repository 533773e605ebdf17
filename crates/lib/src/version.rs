//! RPM-compatible versions and reproducible source archives from git history.
//!
//! The oracle turns repository state into two build inputs:
//!
//! - a version string derived from `git describe --tags` (or, for untagged
//!   history, the first-parent commit count), normalized so it is safe to
//!   embed in package file names, and
//! - a gzip-compressed tarball of the tree at a commit, rooted at a single
//!   `<repo>-<version>/` directory.
//!
//! Nothing is cached: every call queries the repository. Callers that need a
//! stable version should compute it once and reuse the string.

use std::io;
use std::path::{Path, PathBuf};

use flate2::{Compression, GzBuilder};
use thiserror::Error;
use tracing::{debug, info};

use crate::fsutil::{write_atomic, write_string_atomic};
use crate::vcs::{GitCli, Vcs, VcsError};

/// Errors that can occur while versioning or archiving a repository.
#[derive(Debug, Error)]
pub enum VersionError {
  /// None of the candidate locations holds a repository.
  #[error("not a version-controlled path: '{}'", .0.display())]
  NotAVersionControlledPath(PathBuf),

  #[error(transparent)]
  Vcs(#[from] VcsError),

  /// Writing the archive or series file failed.
  #[error("failed to write '{path}': {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// The outcome of versioning one (repository, commit-ish) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRecord {
  /// The commit the commit-ish resolved to.
  pub commit: String,
  /// `git describe --tags` output, empty when no tag reaches the commit.
  pub raw_describe: String,
  /// First-parent commit count, only computed when there is no tag.
  pub commit_count: Option<usize>,
  /// The RPM-compatible version.
  pub normalized: String,
}

/// Strip everything before the first digit and replace `-` with `+`.
///
/// `-` separates version from release in package file names, so it can never
/// appear inside a version. The function is idempotent on its own output.
///
/// ```
/// use planex_lib::version::normalize_version;
///
/// assert_eq!(normalize_version("v1.2.3-4-gabc123"), "1.2.3+4+gabc123");
/// assert_eq!(normalize_version("7"), "7");
/// ```
pub fn normalize_version(raw: &str) -> String {
  let start = raw.find(|c: char| c.is_ascii_digit()).unwrap_or(raw.len());
  raw[start..].replace('-', "+")
}

/// Locate a repository's metadata directory.
///
/// Candidates, in order: `<path>/.git`, `<path>` itself (a bare repository)
/// and `<path>.git`. The first one containing a `HEAD` file wins.
pub fn locate_git_dir(path: &Path) -> Result<PathBuf, VersionError> {
  let mut suffixed = path.as_os_str().to_owned();
  suffixed.push(".git");

  let candidates = [path.join(".git"), path.to_path_buf(), PathBuf::from(suffixed)];
  candidates
    .into_iter()
    .find(|c| c.join("HEAD").is_file())
    .ok_or_else(|| VersionError::NotAVersionControlledPath(path.to_path_buf()))
}

/// The repository's name: the final path component without a `.git` suffix.
pub fn repo_name(path: &Path) -> String {
  let name = path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();
  match name.strip_suffix(".git") {
    Some(stripped) if !stripped.is_empty() => stripped.to_string(),
    _ => name,
  }
}

/// Derives versions and archives from a [`Vcs`] backend.
#[derive(Debug, Clone, Default)]
pub struct VersionOracle<V = GitCli> {
  vcs: V,
}

impl VersionOracle<GitCli> {
  /// An oracle backed by the `git` binary on `PATH`.
  pub fn git() -> Self {
    Self { vcs: GitCli::new() }
  }
}

impl<V: Vcs> VersionOracle<V> {
  pub fn new(vcs: V) -> Self {
    Self { vcs }
  }

  /// Version the repository at `repo` as of `commitish`.
  ///
  /// # Errors
  ///
  /// Returns [`VersionError::NotAVersionControlledPath`] if `repo` is not a
  /// repository, or a backend error if `commitish` cannot be resolved.
  pub fn describe(&self, repo: &Path, commitish: &str) -> Result<VersionRecord, VersionError> {
    let git_dir = locate_git_dir(repo)?;
    let commit = self.vcs.rev_parse(&git_dir, commitish)?;

    let (raw_describe, commit_count, basis) = match self.vcs.describe_tags(&git_dir, &commit)? {
      Some(description) => {
        let basis = description.clone();
        (description, None, basis)
      }
      None => {
        let count = self.vcs.count_commits(&git_dir, &commit)?;
        (String::new(), Some(count), count.to_string())
      }
    };

    let normalized = normalize_version(&basis);
    debug!(repo = %repo.display(), %commitish, %commit, version = %normalized, "described commit");

    Ok(VersionRecord {
      commit,
      raw_describe,
      commit_count,
      normalized,
    })
  }

  /// Write a reproducible `<repo>-<version>.tar.gz` of `commitish` into
  /// `out_dir` and return its path.
  ///
  /// The tarball holds a single top-level `<repo>-<version>/` directory and
  /// is compressed without a file name or timestamp in the gzip header, so
  /// identical trees produce identical bytes. The archive appears under its
  /// final name only once completely written.
  pub fn archive(&self, repo: &Path, commitish: &str, version: &str, out_dir: &Path) -> Result<PathBuf, VersionError> {
    let git_dir = locate_git_dir(repo)?;
    let commit = self.vcs.rev_parse(&git_dir, commitish)?;

    let prefix = format!("{}-{}", repo_name(repo), version);
    let path = out_dir.join(format!("{prefix}.tar.gz"));

    let mut streamed = Ok(());
    let written = write_atomic(&path, |w| {
      let mut encoder = GzBuilder::new().mtime(0).write(w, Compression::default());
      streamed = self.vcs.archive_tar(&git_dir, &commit, &prefix, &mut encoder);
      if streamed.is_err() {
        return Err(io::Error::other("tar stream interrupted"));
      }
      encoder.finish()?;
      Ok(())
    });
    streamed?;
    written.map_err(|source| VersionError::Write {
      path: path.clone(),
      source,
    })?;

    info!(repo = %repo.display(), %commit, archive = %path.display(), "archived source tree");
    Ok(path)
  }

  /// All tags defined in the repository.
  pub fn tags(&self, repo: &Path) -> Result<Vec<String>, VersionError> {
    let git_dir = locate_git_dir(repo)?;
    Ok(self.vcs.tags(&git_dir)?)
  }

  /// Export the commits in `start..end` as patch files in `out_dir`.
  pub fn format_patch(&self, repo: &Path, start: &str, end: &str, out_dir: &Path) -> Result<Vec<PathBuf>, VersionError> {
    let git_dir = locate_git_dir(repo)?;
    std::fs::create_dir_all(out_dir).map_err(|source| VersionError::Write {
      path: out_dir.to_path_buf(),
      source,
    })?;
    Ok(self.vcs.format_patch(&git_dir, start, end, out_dir)?)
  }
}

/// Write a quilt-style `series` file listing `patches` by file name.
pub fn write_series(out_dir: &Path, patches: &[PathBuf]) -> Result<PathBuf, VersionError> {
  let path = out_dir.join("series");
  let content: String = patches
    .iter()
    .filter_map(|p| p.file_name())
    .map(|n| format!("{}\n", n.to_string_lossy()))
    .collect();

  write_string_atomic(&path, &content).map_err(|source| VersionError::Write {
    path: path.clone(),
    source,
  })?;
  Ok(path)
}
