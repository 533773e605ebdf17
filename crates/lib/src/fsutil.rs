//! Filesystem helpers: atomic file replacement and path cleanup.
//!
//! Rewritten descriptors, link files, rule files and archives are staged in a
//! temporary file next to their destination and renamed into place only once
//! fully written. On failure the temporary file is removed and whatever was at
//! the destination before is left untouched.

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::trace;

/// Replace `path` with the bytes produced by `write`.
///
/// The parent directory is created if needed. The closure writes into the
/// staging file; if it fails, nothing is left under the final name.
pub fn write_atomic<F>(path: &Path, write: F) -> io::Result<()>
where
  F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
  let dir = match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => parent,
    _ => Path::new("."),
  };
  fs::create_dir_all(dir)?;

  let mut staged = NamedTempFile::new_in(dir)?;
  write(staged.as_file_mut())?;
  staged.as_file_mut().flush()?;
  staged.as_file().sync_all()?;

  trace!(from = %staged.path().display(), to = %path.display(), "renaming staged file into place");
  staged.persist(path).map_err(|e| e.error)?;
  Ok(())
}

/// Replace `path` with `content`.
pub fn write_string_atomic(path: &Path, content: &str) -> io::Result<()> {
  write_atomic(path, |w| w.write_all(content.as_bytes()))
}

/// Drop `.` components so `./SRPMS/x` and `SRPMS/x` render identically.
pub fn clean_path(path: impl AsRef<Path>) -> PathBuf {
  let cleaned: PathBuf = path
    .as_ref()
    .components()
    .filter(|c| !matches!(c, Component::CurDir))
    .collect();

  if cleaned.as_os_str().is_empty() {
    PathBuf::from(".")
  } else {
    cleaned
  }
}
