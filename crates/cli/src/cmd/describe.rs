//! Implementation of the `planex describe` and `planex tags` commands.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use planex_lib::version::VersionOracle;

/// Print the normalized version of `commitish`.
pub fn cmd_describe(repo: &Path, commitish: &str) -> Result<()> {
  let record = VersionOracle::git()
    .describe(repo, commitish)
    .with_context(|| format!("Failed to describe {} in {}", commitish, repo.display()))?;

  debug!(raw = %record.raw_describe, commits = ?record.commit_count, "version basis");
  println!("{}", record.normalized);
  Ok(())
}

/// Print every tag, one per line.
pub fn cmd_tags(repo: &Path) -> Result<()> {
  let tags = VersionOracle::git()
    .tags(repo)
    .with_context(|| format!("Failed to list tags in {}", repo.display()))?;

  for tag in tags {
    println!("{}", tag);
  }
  Ok(())
}
