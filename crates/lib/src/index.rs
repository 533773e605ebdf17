//! Package index: every local descriptor by name, and every capability by the
//! package that provides it.
//!
//! Loading and indexing are separate steps. [`load_inputs`] parses each input
//! file independently and collects per-file failures instead of stopping at
//! the first one. [`PackageIndex::from_loaded`] then aggregates whatever did
//! parse; a capability claimed by two packages invalidates the whole index.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::descriptor::PackageDescriptor;
use crate::input::{InputError, ParsedInput, parse_input};
use crate::link::{LinkError, LinkRecord};
use crate::macros::MacroEnv;

/// Errors that invalidate the whole index.
#[derive(Debug, Error)]
pub enum IndexError {
  /// Two local packages claim the same capability.
  #[error("capability '{capability}' is provided by both '{first}' and '{second}'")]
  DuplicateProvides {
    capability: String,
    first: String,
    second: String,
  },

  /// Two descriptors declare the same package name.
  #[error("package '{name}' is declared by both '{first}' and '{second}'")]
  DuplicatePackage {
    name: String,
    first: PathBuf,
    second: PathBuf,
  },
}

/// An input file that could not be loaded. Other packages are unaffected.
#[derive(Debug, Error)]
#[error("{path}: {error}")]
pub struct PackageFailure {
  pub path: PathBuf,
  pub error: InputError,
}

/// The outcome of parsing a set of input files.
#[derive(Debug, Default)]
pub struct LoadedInputs {
  pub descriptors: Vec<PackageDescriptor>,
  pub links: Vec<LinkRecord>,
  pub failures: Vec<PackageFailure>,
}

/// Parse every input file, collecting failures per file.
pub fn load_inputs<P: AsRef<Path>>(paths: &[P], macros: &MacroEnv) -> LoadedInputs {
  let mut loaded = LoadedInputs::default();

  for path in paths {
    let path = path.as_ref();
    match parse_input(path, macros) {
      Ok(ParsedInput::Descriptor(descriptor)) => loaded.descriptors.push(*descriptor),
      Ok(ParsedInput::Link(record)) if record.link.repo_name().is_none() => {
        loaded.failures.push(PackageFailure {
          path: path.to_path_buf(),
          error: LinkError::MissingRepo(Some(path.to_path_buf())).into(),
        });
      }
      Ok(ParsedInput::Link(record)) => loaded.links.push(record),
      Err(error) => {
        debug!(path = %path.display(), %error, "failed to load input");
        loaded.failures.push(PackageFailure {
          path: path.to_path_buf(),
          error,
        });
      }
    }
  }

  loaded
}

/// A descriptor plus the link or manifest file it was declared with.
#[derive(Debug, Clone)]
pub struct IndexedPackage {
  pub descriptor: PackageDescriptor,
  /// A `.lnk` file named after the package, or its manifest.
  pub link: Option<PathBuf>,
}

/// The artifact that satisfies a capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provider {
  /// Owning package name.
  pub package: String,
  /// The subpackage carrying the capability.
  pub subpackage: String,
  /// The subpackage's binary package.
  pub rpm: PathBuf,
}

/// Name- and capability-keyed view over a set of descriptors.
#[derive(Debug, Clone, Default)]
pub struct PackageIndex {
  by_name: BTreeMap<String, IndexedPackage>,
  provides: BTreeMap<String, Provider>,
}

impl PackageIndex {
  /// Parse and index `paths` in one go, dropping per-file failures after
  /// logging them. Use [`load_inputs`] and [`from_loaded`](Self::from_loaded)
  /// to keep the failures.
  pub fn build<P: AsRef<Path>>(paths: &[P], macros: &MacroEnv) -> Result<Self, IndexError> {
    let loaded = load_inputs(paths, macros);
    for failure in &loaded.failures {
      warn!(path = %failure.path.display(), error = %failure.error, "skipping input");
    }
    Self::from_loaded(loaded.descriptors, loaded.links, None)
  }

  /// Index parsed descriptors.
  ///
  /// A link file is attached to the descriptor whose name matches its file
  /// stem. Packages without one get `<manifest_dir>/<name>.json` instead, if
  /// that file exists.
  ///
  /// # Errors
  ///
  /// Returns [`IndexError::DuplicateProvides`] if two packages claim one
  /// capability, naming both, and [`IndexError::DuplicatePackage`] if two
  /// descriptors share a name.
  pub fn from_loaded(
    descriptors: Vec<PackageDescriptor>,
    links: Vec<LinkRecord>,
    manifest_dir: Option<&Path>,
  ) -> Result<Self, IndexError> {
    let mut by_name: BTreeMap<String, IndexedPackage> = BTreeMap::new();

    for descriptor in descriptors {
      match by_name.entry(descriptor.name.clone()) {
        Entry::Occupied(existing) => {
          return Err(IndexError::DuplicatePackage {
            name: descriptor.name,
            first: existing.get().descriptor.path.clone(),
            second: descriptor.path,
          });
        }
        Entry::Vacant(slot) => {
          slot.insert(IndexedPackage { descriptor, link: None });
        }
      }
    }

    for record in links {
      let owner = record.package().and_then(|name| by_name.get_mut(name));
      match owner {
        Some(package) => package.link = Some(record.path),
        None => warn!(link = %record.path.display(), "link file has no matching descriptor"),
      }
    }

    if let Some(dir) = manifest_dir {
      for (name, package) in by_name.iter_mut().filter(|(_, p)| p.link.is_none()) {
        let manifest = dir.join(format!("{name}.json"));
        if manifest.is_file() {
          package.link = Some(manifest);
        }
      }
    }

    let mut provides: BTreeMap<String, Provider> = BTreeMap::new();
    for (name, package) in &by_name {
      for sub in &package.descriptor.subpackages {
        for capability in sub.capabilities() {
          match provides.get(capability) {
            Some(existing) if existing.package != *name => {
              return Err(IndexError::DuplicateProvides {
                capability: capability.to_string(),
                first: existing.package.clone(),
                second: name.clone(),
              });
            }
            Some(_) => {}
            None => {
              provides.insert(
                capability.to_string(),
                Provider {
                  package: name.clone(),
                  subpackage: sub.name.clone(),
                  rpm: sub.rpm.clone(),
                },
              );
            }
          }
        }
      }
    }

    debug!(packages = by_name.len(), capabilities = provides.len(), "built package index");
    Ok(Self { by_name, provides })
  }

  pub fn get(&self, name: &str) -> Option<&IndexedPackage> {
    self.by_name.get(name)
  }

  /// Packages in name order.
  pub fn packages(&self) -> impl Iterator<Item = &IndexedPackage> {
    self.by_name.values()
  }

  /// The local provider of a capability, if any.
  pub fn provider(&self, capability: &str) -> Option<&Provider> {
    self.provides.get(capability)
  }

  pub fn len(&self) -> usize {
    self.by_name.len()
  }

  pub fn is_empty(&self) -> bool {
    self.by_name.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::TempDir;
  use tracing_test::traced_test;

  fn macros() -> MacroEnv {
    [
      ("_topdir", "."),
      ("_sourcedir", "%{_topdir}/SOURCES"),
      ("_srcrpmdir", "%{_topdir}/SRPMS"),
      ("_rpmdir", "%{_topdir}/RPMS"),
      ("_arch", "x86_64"),
    ]
    .into_iter()
    .collect()
  }

  fn descriptor(path: &str, text: &str) -> PackageDescriptor {
    PackageDescriptor::parse(Path::new(path), text, &macros()).unwrap()
  }

  #[test]
  fn indexes_names_and_capabilities() {
    let bar = descriptor(
      "SPECS/bar.spec",
      "Name: bar\nVersion: 2.0\nRelease: 3\n%package devel\nProvides: devel-lib\n",
    );
    let index = PackageIndex::from_loaded(vec![bar], vec![], None).unwrap();

    assert_eq!(index.len(), 1);
    assert!(index.get("bar").is_some());
    assert_eq!(index.provider("bar").unwrap().subpackage, "bar");

    let provider = index.provider("devel-lib").unwrap();
    assert_eq!(provider.package, "bar");
    assert_eq!(provider.subpackage, "bar-devel");
    assert_eq!(provider.rpm, PathBuf::from("RPMS/x86_64/bar-devel-2.0-3.x86_64.rpm"));
    assert!(index.provider("ocaml").is_none());
  }

  #[test]
  fn duplicate_provides_names_both_packages() {
    let a = descriptor("a.spec", "Name: a\nVersion: 1\nRelease: 1\nProvides: shared\n");
    let b = descriptor("b.spec", "Name: b\nVersion: 1\nRelease: 1\nProvides: shared\n");

    let err = PackageIndex::from_loaded(vec![b, a], vec![], None).unwrap_err();
    match err {
      IndexError::DuplicateProvides {
        capability,
        first,
        second,
      } => {
        assert_eq!(capability, "shared");
        assert_eq!(first, "a");
        assert_eq!(second, "b");
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn duplicate_package_name() {
    let a = descriptor("a.spec", "Name: same\nVersion: 1\nRelease: 1\n");
    let b = descriptor("b.spec", "Name: same\nVersion: 2\nRelease: 1\n");

    let err = PackageIndex::from_loaded(vec![a, b], vec![], None).unwrap_err();
    assert!(matches!(err, IndexError::DuplicatePackage { ref name, .. } if name == "same"));
  }

  #[test]
  fn links_and_manifests_attach_by_name() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("MANIFESTS")).unwrap();
    fs::write(temp.path().join("MANIFESTS/bar.json"), "{}").unwrap();
    fs::write(temp.path().join("MANIFESTS/foo.json"), "{}").unwrap();

    let foo = descriptor("SPECS/foo.spec", "Name: foo\nVersion: 1\nRelease: 1\n");
    let bar = descriptor("SPECS/bar.spec", "Name: bar\nVersion: 1\nRelease: 1\n");
    let baz = descriptor("SPECS/baz.spec", "Name: baz\nVersion: 1\nRelease: 1\n");
    let link = LinkRecord::parse(Path::new("SPECS/foo.lnk"), r#"{"repo": "foo"}"#).unwrap();

    let index =
      PackageIndex::from_loaded(vec![foo, bar, baz], vec![link], Some(&temp.path().join("MANIFESTS"))).unwrap();

    // The link file wins over a manifest
    assert_eq!(index.get("foo").unwrap().link, Some(PathBuf::from("SPECS/foo.lnk")));
    assert_eq!(
      index.get("bar").unwrap().link,
      Some(temp.path().join("MANIFESTS/bar.json"))
    );
    assert_eq!(index.get("baz").unwrap().link, None);
  }

  #[test]
  #[traced_test]
  fn orphan_link_is_reported() {
    let link = LinkRecord::parse(Path::new("SPECS/ghost.lnk"), r#"{"repo": "ghost"}"#).unwrap();
    let index = PackageIndex::from_loaded(vec![], vec![link], None).unwrap();

    assert!(index.is_empty());
    assert!(logs_contain("link file has no matching descriptor"));
  }

  #[test]
  fn load_collects_every_failure() {
    let temp = TempDir::new().unwrap();
    let good = temp.path().join("good.spec");
    let bad = temp.path().join("bad.spec");
    let broken_link = temp.path().join("broken.lnk");
    let unknown = temp.path().join("notes.txt");
    fs::write(&good, "Name: good\nVersion: 1\nRelease: 1\n").unwrap();
    fs::write(&bad, "Name: bad\nVersion: %{nope}\nRelease: 1\n").unwrap();
    fs::write(&broken_link, "not json").unwrap();
    fs::write(&unknown, "").unwrap();

    let loaded = load_inputs(&[&good, &bad, &broken_link, &unknown], &macros());

    assert_eq!(loaded.descriptors.len(), 1);
    assert_eq!(loaded.descriptors[0].name, "good");
    let failed: Vec<_> = loaded.failures.iter().map(|f| f.path.clone()).collect();
    assert_eq!(failed, vec![bad, broken_link, unknown]);
    assert!(matches!(loaded.failures[0].error, InputError::Descriptor(_)));
    assert!(matches!(loaded.failures[1].error, InputError::Link(LinkError::Json { .. })));
    assert!(matches!(loaded.failures[2].error, InputError::UnsupportedFileType(_)));
  }
}
