//! Implementation of the `planex patches` command.

use std::path::Path;

use anyhow::{Context, Result};

use planex_lib::version::{VersionOracle, write_series};

use crate::output::print_success;

/// Export `start..end` as numbered patches and a `series` file in `out_dir`.
pub fn cmd_patches(repo: &Path, start: &str, end: &str, out_dir: &Path) -> Result<()> {
  let patches = VersionOracle::git()
    .format_patch(repo, start, end, out_dir)
    .with_context(|| format!("Failed to export {}..{} from {}", start, end, repo.display()))?;

  let series = write_series(out_dir, &patches).context("Failed to write series file")?;

  for patch in &patches {
    println!("{}", patch.display());
  }
  print_success(&format!("{} patch(es) listed in {}", patches.len(), series.display()));
  Ok(())
}
