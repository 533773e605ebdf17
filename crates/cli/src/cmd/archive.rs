//! Implementation of the `planex archive` command.

use std::path::Path;

use anyhow::{Context, Result};

use planex_lib::version::VersionOracle;

/// Archive `commitish` into `out_dir`, naming it after the repository and
/// `version` (derived from history when not given). Prints the archive path.
pub fn cmd_archive(repo: &Path, commitish: &str, version: Option<&str>, out_dir: &Path) -> Result<()> {
  let oracle = VersionOracle::git();

  let version = match version {
    Some(version) => version.to_string(),
    None => {
      oracle
        .describe(repo, commitish)
        .with_context(|| format!("Failed to describe {} in {}", commitish, repo.display()))?
        .normalized
    }
  };

  let path = oracle
    .archive(repo, commitish, &version, out_dir)
    .with_context(|| format!("Failed to archive {}", repo.display()))?;

  println!("{}", path.display());
  Ok(())
}
