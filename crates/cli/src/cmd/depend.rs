//! Implementation of the `planex depend` command.
//!
//! Plans a build over spec and link files and emits one
//! `target : prerequisite` line per dependency edge.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use planex_lib::config::BuildConfig;
use planex_lib::plan::plan;
use planex_lib::rules::{render, write_rules};

use crate::output::print_failures;

/// Execute the depend command.
///
/// Every input that fails to load is reported first. Rules are only emitted
/// for an incomplete input set when `keep_going` is set, and never when the
/// graph has a duplicate capability or a cycle.
pub fn cmd_depend(paths: &[PathBuf], config: &BuildConfig, output: Option<&Path>, keep_going: bool) -> Result<()> {
  let plan = match plan(paths, config) {
    Ok(plan) => plan,
    Err(err) => {
      print_failures(err.failures());
      return Err(err).context("Failed to plan build");
    }
  };

  print_failures(&plan.failures);
  if !plan.is_complete() && !keep_going {
    bail!(
      "{} input(s) could not be loaded; rerun with --keep-going to emit rules for the rest",
      plan.failures.len()
    );
  }

  match output {
    Some(path) => {
      write_rules(&plan.graph, path).with_context(|| format!("Failed to write rules: {}", path.display()))?;
    }
    None => {
      let mut stdout = std::io::stdout().lock();
      stdout
        .write_all(render(&plan.rules()).as_bytes())
        .context("Failed to write rules")?;
      stdout.flush()?;
    }
  }

  Ok(())
}
