//! The planning pipeline: input paths to index to graph.
//!
//! Per-file problems never stop the pipeline; they are carried alongside the
//! result (or the fatal error) so a caller can report all of them at once.
//! A duplicate capability or a dependency cycle is fatal because any rules
//! derived from such a graph would be unsafe to hand to a build executor.

use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::BuildConfig;
use crate::graph::{DependencyGraph, GraphError};
use crate::index::{IndexError, PackageFailure, PackageIndex, load_inputs};
use crate::input::{InputError, expand_inputs};
use crate::rules::{Rule, emit};

/// A fatal planning error, with every per-file failure seen before it.
#[derive(Debug, Error)]
pub enum PlanError {
  #[error(transparent)]
  Input(#[from] InputError),

  #[error("{source}")]
  Index {
    #[source]
    source: IndexError,
    failures: Vec<PackageFailure>,
  },

  #[error("{source}")]
  Graph {
    #[source]
    source: GraphError,
    failures: Vec<PackageFailure>,
  },
}

impl PlanError {
  /// Per-file failures collected before the fatal error.
  pub fn failures(&self) -> &[PackageFailure] {
    match self {
      Self::Input(_) => &[],
      Self::Index { failures, .. } | Self::Graph { failures, .. } => failures,
    }
  }
}

/// A complete, acyclic build plan.
#[derive(Debug)]
pub struct Plan {
  pub index: PackageIndex,
  pub graph: DependencyGraph,
  /// Inputs that could not be loaded and are missing from the plan.
  pub failures: Vec<PackageFailure>,
}

impl Plan {
  pub fn rules(&self) -> Vec<Rule> {
    emit(&self.graph)
  }

  /// Whether every input made it into the plan.
  pub fn is_complete(&self) -> bool {
    self.failures.is_empty()
  }
}

/// Plan a build over `paths`. Directories are searched for `.spec` and
/// `.lnk` files.
pub fn plan<P: AsRef<Path>>(paths: &[P], config: &BuildConfig) -> Result<Plan, PlanError> {
  let files = expand_inputs(paths)?;
  debug!(inputs = files.len(), "planning");

  let loaded = load_inputs(&files, &config.macros());
  let failures = loaded.failures;
  for failure in &failures {
    warn!(path = %failure.path.display(), error = %failure.error, "failed to load input");
  }

  let index = match PackageIndex::from_loaded(loaded.descriptors, loaded.links, config.manifest_dir.as_deref()) {
    Ok(index) => index,
    Err(source) => return Err(PlanError::Index { source, failures }),
  };

  let graph = match DependencyGraph::build(&index) {
    Ok(graph) => graph,
    Err(source) => return Err(PlanError::Graph { source, failures }),
  };

  Ok(Plan {
    index,
    graph,
    failures,
  })
}
