//! Artifact-level dependency graph over every package in an index.
//!
//! Nodes are files: descriptors, link or manifest files, sources, patches,
//! source packages and binary packages. An edge points from a target to a
//! prerequisite that must exist and be current before the target is built.
//!
//! Edge insertion order is the emission order, so it is fixed:
//!
//! - packages in name order;
//! - for each package, the source package's prerequisites (descriptor, link,
//!   sources, patches, each in declaration order);
//! - then each remote source, depending on the descriptor it is fetched for;
//! - then each binary package in subpackage order, depending first on the
//!   source package and then on the binary packages of local providers of
//!   its `BuildRequires`, in declaration order.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};

use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use thiserror::Error;
use tracing::{debug, trace};

use crate::index::{IndexedPackage, PackageIndex};

/// Errors that invalidate the whole graph.
#[derive(Debug, Error)]
pub enum GraphError {
  /// Build requirements form a loop. `cycle` starts and ends on one node.
  #[error("dependency cycle between {}: {}", packages.join(", "), cycle.join(" -> "))]
  DependencyCycle { packages: Vec<String>, cycle: Vec<String> },
}

/// What a node in the graph is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
  Descriptor,
  Link,
  Source,
  Patch,
  SourcePackage,
  BinaryPackage,
}

/// A file the build plan refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
  pub kind: ArtifactKind,
  /// The package the artifact belongs to.
  pub package: String,
  pub path: PathBuf,
}

impl Artifact {
  fn new(kind: ArtifactKind, package: &str, path: &Path) -> Self {
    Self {
      kind,
      package: package.to_string(),
      path: path.to_path_buf(),
    }
  }
}

impl fmt::Display for Artifact {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.path.display())
  }
}

/// The full build plan as a graph of artifacts.
#[derive(Debug, Default)]
pub struct DependencyGraph {
  graph: DiGraph<Artifact, ()>,
  nodes: HashMap<PathBuf, NodeIndex>,
  seen: HashSet<(NodeIndex, NodeIndex)>,
}

impl DependencyGraph {
  /// Build the graph for every package in `index` and check it is acyclic.
  ///
  /// # Errors
  ///
  /// Returns [`GraphError::DependencyCycle`] with the full offending cycle.
  /// No partial graph is returned.
  pub fn build(index: &PackageIndex) -> Result<Self, GraphError> {
    let mut dag = Self::default();

    for package in index.packages() {
      dag.add_package(package, index);
    }

    debug!(
      nodes = dag.graph.node_count(),
      edges = dag.graph.edge_count(),
      "built dependency graph"
    );

    dag.verify_acyclic()?;
    Ok(dag)
  }

  fn add_package(&mut self, package: &IndexedPackage, index: &PackageIndex) {
    let desc = &package.descriptor;
    let name = desc.name.as_str();

    let srpm = self.node(Artifact::new(ArtifactKind::SourcePackage, name, &desc.source_rpm));

    let spec = self.node(Artifact::new(ArtifactKind::Descriptor, name, &desc.path));
    self.edge(srpm, spec);

    if let Some(link) = &package.link {
      let link = self.node(Artifact::new(ArtifactKind::Link, name, link));
      self.edge(srpm, link);
    }
    for source in &desc.sources {
      let source = self.node(Artifact::new(ArtifactKind::Source, name, &source.path));
      self.edge(srpm, source);
    }
    for patch in &desc.patches {
      let patch = self.node(Artifact::new(ArtifactKind::Patch, name, &patch.path));
      self.edge(srpm, patch);
    }

    // A changed descriptor may name a different download
    for source in desc.sources.iter().filter(|s| s.is_remote()) {
      let source = self.node(Artifact::new(ArtifactKind::Source, name, &source.path));
      self.edge(source, spec);
    }

    let providers: Vec<_> = desc
      .build_requires
      .iter()
      .filter_map(|dep| index.provider(dep).map(|p| (dep, p)))
      .filter(|(dep, p)| {
        let local = p.package != name;
        if !local {
          trace!(package = %name, requirement = %dep, "ignoring requirement on own subpackage");
        }
        local
      })
      .map(|(_, p)| p)
      .collect();

    for sub in &desc.subpackages {
      let rpm = self.node(Artifact::new(ArtifactKind::BinaryPackage, name, &sub.rpm));
      self.edge(rpm, srpm);

      for provider in &providers {
        let required = self.node(Artifact::new(
          ArtifactKind::BinaryPackage,
          &provider.package,
          &provider.rpm,
        ));
        self.edge(rpm, required);
      }
    }
  }

  /// The node for an artifact's path, created on first use.
  fn node(&mut self, artifact: Artifact) -> NodeIndex {
    if let Some(&idx) = self.nodes.get(&artifact.path) {
      return idx;
    }
    let path = artifact.path.clone();
    let idx = self.graph.add_node(artifact);
    self.nodes.insert(path, idx);
    idx
  }

  fn edge(&mut self, target: NodeIndex, prerequisite: NodeIndex) {
    if target != prerequisite && self.seen.insert((target, prerequisite)) {
      self.graph.add_edge(target, prerequisite, ());
    }
  }

  fn verify_acyclic(&self) -> Result<(), GraphError> {
    let Err(cycle) = toposort(&self.graph, None) else {
      return Ok(());
    };

    let nodes = self.find_cycle(cycle.node_id());
    let mut packages: Vec<String> = Vec::new();
    for &idx in &nodes[..nodes.len().saturating_sub(1)] {
      let package = &self.graph[idx].package;
      if !packages.contains(package) {
        packages.push(package.clone());
      }
    }

    Err(GraphError::DependencyCycle {
      packages,
      cycle: nodes.iter().map(|&idx| self.graph[idx].to_string()).collect(),
    })
  }

  /// The shortest closed walk through a strongly connected component,
  /// starting and ending on one node. Prefers the component containing
  /// `hint`.
  fn find_cycle(&self, hint: NodeIndex) -> Vec<NodeIndex> {
    let components: Vec<Vec<NodeIndex>> = tarjan_scc(&self.graph).into_iter().filter(|c| c.len() > 1).collect();
    let Some(component) = components
      .iter()
      .find(|c| c.contains(&hint))
      .or_else(|| components.first())
    else {
      return vec![hint, hint];
    };

    let start = if component.contains(&hint) {
      hint
    } else {
      component.iter().copied().min().unwrap_or(hint)
    };
    let members: HashSet<NodeIndex> = component.iter().copied().collect();

    let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut queue = VecDeque::from([start]);

    while let Some(node) = queue.pop_front() {
      for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
        if !members.contains(&next) {
          continue;
        }
        if next == start {
          let mut path = vec![node];
          let mut current = node;
          while let Some(&prev) = parent.get(&current) {
            path.push(prev);
            current = prev;
          }
          path.reverse();
          path.push(start);
          return path;
        }
        if let Entry::Vacant(slot) = parent.entry(next) {
          slot.insert(node);
          queue.push_back(next);
        }
      }
    }

    vec![start, start]
  }

  /// Every `(target, prerequisite)` pair in emission order.
  pub fn edges(&self) -> impl Iterator<Item = (&Artifact, &Artifact)> {
    self
      .graph
      .edge_references()
      .map(|e| (&self.graph[e.source()], &self.graph[e.target()]))
  }

  /// The direct prerequisites of the artifact at `path`, in emission order.
  pub fn prerequisites(&self, path: &Path) -> Vec<&Artifact> {
    let Some(&idx) = self.nodes.get(path) else {
      return Vec::new();
    };
    let mut edges: Vec<_> = self.graph.edges_directed(idx, Direction::Outgoing).collect();
    edges.sort_by_key(|e| e.id());
    edges.into_iter().map(|e| &self.graph[e.target()]).collect()
  }

  pub fn artifact(&self, path: &Path) -> Option<&Artifact> {
    self.nodes.get(path).map(|&idx| &self.graph[idx])
  }

  pub fn node_count(&self) -> usize {
    self.graph.node_count()
  }

  pub fn edge_count(&self) -> usize {
    self.graph.edge_count()
  }
}
