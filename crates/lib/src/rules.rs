//! Build-rule emission.
//!
//! Each graph edge becomes one `target : prerequisite` line, in the graph's
//! edge order, with both sides rendered as file paths. The line grammar is
//! read by an external build executor on every run; changing it is a
//! breaking change.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::fsutil::write_string_atomic;
use crate::graph::DependencyGraph;

/// One `target : prerequisite` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
  pub target: PathBuf,
  pub prerequisite: PathBuf,
}

impl fmt::Display for Rule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} : {}", self.target.display(), self.prerequisite.display())
  }
}

/// One rule per edge, in edge order.
pub fn emit(graph: &DependencyGraph) -> Vec<Rule> {
  graph
    .edges()
    .map(|(target, prerequisite)| Rule {
      target: target.path.clone(),
      prerequisite: prerequisite.path.clone(),
    })
    .collect()
}

/// Render rules as newline-terminated lines.
pub fn render(rules: &[Rule]) -> String {
  rules.iter().map(|rule| format!("{rule}\n")).collect()
}

/// Write the rules for `graph` to `path`, replacing it atomically.
pub fn write_rules(graph: &DependencyGraph, path: &Path) -> io::Result<usize> {
  let rules = emit(graph);
  write_string_atomic(path, &render(&rules))?;
  info!(path = %path.display(), rules = rules.len(), "wrote build rules");
  Ok(rules.len())
}
