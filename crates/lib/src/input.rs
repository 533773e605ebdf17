//! Input files, dispatched once on extension.
//!
//! A `.spec` file becomes a [`PackageDescriptor`], a `.lnk` file a
//! [`LinkRecord`]. Anything past this boundary works on [`ParsedInput`] and
//! never looks at file names again.

use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

use crate::descriptor::{DescriptorError, PackageDescriptor};
use crate::link::{LinkError, LinkRecord};
use crate::macros::MacroEnv;

pub const SPEC_EXTENSION: &str = "spec";
pub const LINK_EXTENSION: &str = "lnk";

/// Errors that can occur while reading an input file.
#[derive(Debug, Error)]
pub enum InputError {
  #[error("unsupported file type: '{0}'")]
  UnsupportedFileType(PathBuf),

  #[error("failed to walk '{path}': {message}")]
  Walk { path: PathBuf, message: String },

  #[error(transparent)]
  Descriptor(#[from] DescriptorError),

  #[error(transparent)]
  Link(#[from] LinkError),
}

/// The kind of an input file, by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
  Descriptor,
  Link,
}

impl InputKind {
  pub fn of(path: &Path) -> Option<Self> {
    match path.extension()?.to_str()? {
      SPEC_EXTENSION => Some(Self::Descriptor),
      LINK_EXTENSION => Some(Self::Link),
      _ => None,
    }
  }
}

/// A parsed input file.
#[derive(Debug, Clone)]
pub enum ParsedInput {
  Descriptor(Box<PackageDescriptor>),
  Link(LinkRecord),
}

impl ParsedInput {
  pub fn path(&self) -> &Path {
    match self {
      Self::Descriptor(d) => &d.path,
      Self::Link(l) => &l.path,
    }
  }
}

/// Parse one input file, choosing the parser by extension.
pub fn parse_input(path: &Path, macros: &MacroEnv) -> Result<ParsedInput, InputError> {
  match InputKind::of(path) {
    Some(InputKind::Descriptor) => Ok(ParsedInput::Descriptor(Box::new(PackageDescriptor::from_file(
      path, macros,
    )?))),
    Some(InputKind::Link) => Ok(ParsedInput::Link(LinkRecord::from_file(path)?)),
    None => Err(InputError::UnsupportedFileType(path.to_path_buf())),
  }
}

/// Expand directories into the `.spec` and `.lnk` files beneath them.
///
/// Files given directly are kept as-is, whatever their extension, so that an
/// unsupported file is reported rather than silently skipped. Directory
/// contents are sorted by file name.
pub fn expand_inputs<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<PathBuf>, InputError> {
  let mut files = Vec::new();

  for path in paths {
    let path = path.as_ref();
    if !path.is_dir() {
      files.push(path.to_path_buf());
      continue;
    }

    for entry in WalkDir::new(path).sort_by_file_name() {
      let entry = entry.map_err(|e| InputError::Walk {
        path: path.to_path_buf(),
        message: e.to_string(),
      })?;
      if entry.file_type().is_file() && InputKind::of(entry.path()).is_some() {
        files.push(entry.into_path());
      }
    }
  }

  Ok(files)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::TempDir;

  #[test]
  fn dispatch_by_extension() {
    let temp = TempDir::new().unwrap();
    let spec = temp.path().join("foo.spec");
    let link = temp.path().join("foo.lnk");
    fs::write(&spec, "Name: foo\nVersion: 1\nRelease: 1\n").unwrap();
    fs::write(&link, r#"{"repo": "foo"}"#).unwrap();

    let env: MacroEnv = [("_topdir", "."), ("_sourcedir", "SOURCES"), ("_srcrpmdir", "SRPMS")]
      .into_iter()
      .chain([("_rpmdir", "RPMS"), ("_arch", "x86_64")])
      .collect();

    match parse_input(&spec, &env).unwrap() {
      ParsedInput::Descriptor(d) => assert_eq!(d.name, "foo"),
      other => panic!("expected descriptor, got {other:?}"),
    }
    match parse_input(&link, &env).unwrap() {
      ParsedInput::Link(l) => assert_eq!(l.link.repo.as_deref(), Some("foo")),
      other => panic!("expected link, got {other:?}"),
    }
  }

  #[test]
  fn unsupported_extension() {
    let result = parse_input(Path::new("README.md"), &MacroEnv::new());
    assert!(matches!(result, Err(InputError::UnsupportedFileType(_))));
  }

  #[test]
  fn expand_directories_sorted() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("SPECS/nested")).unwrap();
    fs::write(temp.path().join("SPECS/b.spec"), "").unwrap();
    fs::write(temp.path().join("SPECS/a.lnk"), "").unwrap();
    fs::write(temp.path().join("SPECS/notes.txt"), "").unwrap();
    fs::write(temp.path().join("SPECS/nested/c.spec"), "").unwrap();
    let extra = temp.path().join("extra.txt");

    let files = expand_inputs(&[temp.path().join("SPECS"), extra.clone()]).unwrap();
    assert_eq!(
      files,
      vec![
        temp.path().join("SPECS/a.lnk"),
        temp.path().join("SPECS/b.spec"),
        temp.path().join("SPECS/nested/c.spec"),
        extra,
      ]
    );
  }
}
