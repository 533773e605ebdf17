//! Host paths a build sandbox must see.
//!
//! Developer builds run inside a container with each package's checkout
//! mounted where the package build tool unpacks its sources. The container
//! itself is managed elsewhere; this module only computes the mappings.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::config::BuildConfig;
use crate::descriptor::PackageDescriptor;

/// Directory the package build tool unpacks sources into, inside the sandbox.
pub const CONTAINER_BUILD_DIR: &str = "/build/rpmbuild/BUILD";

/// One host directory mounted into the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMap {
  pub host: PathBuf,
  pub container: PathBuf,
}

impl PathMap {
  /// The mapping as a `host:container` volume argument.
  pub fn volume(&self) -> String {
    format!("{}:{}", self.host.display(), self.container.display())
  }
}

impl fmt::Display for PathMap {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} -> {}", self.host.display(), self.container.display())
  }
}

/// Map `<repos_dir>/<name>` to `<build dir>/<name>-<version>` per package.
///
/// Host directories that exist are canonicalized; missing ones are kept as
/// configured so the caller can report them.
pub fn container_path_maps<'a>(
  descriptors: impl IntoIterator<Item = &'a PackageDescriptor>,
  config: &BuildConfig,
) -> Vec<PathMap> {
  descriptors
    .into_iter()
    .map(|desc| {
      let host = resolve_host(&config.repos_dir.join(&desc.name));
      let container = Path::new(CONTAINER_BUILD_DIR).join(format!("{}-{}", desc.name, desc.version));
      trace!(package = %desc.name, host = %host.display(), container = %container.display(), "path map");
      PathMap { host, container }
    })
    .collect()
}

fn resolve_host(path: &Path) -> PathBuf {
  dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::TempDir;

  fn descriptor(text: &str) -> PackageDescriptor {
    let config = BuildConfig::default();
    PackageDescriptor::parse(Path::new("x.spec"), text, &config.macros()).unwrap()
  }

  #[test]
  fn maps_checkout_to_build_dir() {
    let desc = descriptor("Name: xenopsd\nVersion: 0.12.1\nRelease: 1\n");
    let config = BuildConfig {
      repos_dir: PathBuf::from("does-not-exist/myrepos"),
      ..Default::default()
    };

    let maps = container_path_maps([&desc], &config);
    assert_eq!(
      maps,
      vec![PathMap {
        host: PathBuf::from("does-not-exist/myrepos/xenopsd"),
        container: PathBuf::from("/build/rpmbuild/BUILD/xenopsd-0.12.1"),
      }]
    );
    assert_eq!(
      maps[0].volume(),
      "does-not-exist/myrepos/xenopsd:/build/rpmbuild/BUILD/xenopsd-0.12.1"
    );
  }

  #[test]
  fn existing_checkout_is_canonicalized() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("myrepos/xenopsd")).unwrap();
    let desc = descriptor("Name: xenopsd\nVersion: 1\nRelease: 1\n");
    let config = BuildConfig {
      repos_dir: temp.path().join("myrepos/../myrepos"),
      ..Default::default()
    };

    let maps = container_path_maps([&desc], &config);
    assert!(maps[0].host.is_absolute());
    assert_eq!(
      maps[0].host,
      dunce::canonicalize(temp.path().join("myrepos/xenopsd")).unwrap()
    );
  }
}
