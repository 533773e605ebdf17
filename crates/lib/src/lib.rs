//! planex-lib: build-plan compiler for interdependent RPM packages
//!
//! This crate turns a set of package descriptors (spec files) into a
//! cycle-free, artifact-level build plan:
//! - `PackageDescriptor`: a macro-resolved spec file
//! - `VersionOracle`: versions and source archives derived from git history
//! - `SourceLinkResolver`: repository/ref hints resolved to download URLs
//! - `PackageIndex`: descriptors by name and capabilities by provider
//! - `DependencyGraph`: every artifact and what it needs before it is built
//! - `rules`: the graph as `target : prerequisite` lines for a build executor

pub mod config;
pub mod descriptor;
pub mod fsutil;
pub mod graph;
pub mod index;
pub mod input;
pub mod link;
pub mod macros;
pub mod mounts;
pub mod plan;
pub mod rules;
pub mod vcs;
pub mod version;
