//! Package descriptors: the parsed, macro-resolved form of one spec file.
//!
//! A descriptor is produced from raw spec text plus a caller [`MacroEnv`] and
//! is immutable afterwards. Parsing the same file with a different macro set
//! (for example a different `%{dist}`) yields an independent descriptor.
//!
//! Parsing happens in two passes:
//!
//! 1. A line scan collects raw tag values, `%define`/`%global` bodies and
//!    `%package` declarations without expanding anything.
//! 2. The caller macros, the descriptor's own definitions and the identity
//!    tags (`name`, `version`, `release`, `epoch`) are layered into one
//!    environment and every field is expanded against it.
//!
//! Because expansion only starts once every definition is known, the result
//! does not depend on where in the file a macro was defined.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::fsutil::clean_path;
use crate::macros::{MacroEnv, MacroError};

/// Section headers that end a preamble. Their bodies are not interpreted.
const SECTIONS: &[&str] = &[
  "description",
  "prep",
  "build",
  "install",
  "check",
  "clean",
  "files",
  "changelog",
  "pre",
  "post",
  "preun",
  "postun",
  "pretrans",
  "posttrans",
  "verifyscript",
  "triggerin",
  "triggerun",
  "triggerpostun",
  "triggerprein",
  "filetriggerin",
  "filetriggerun",
  "transfiletriggerin",
  "transfiletriggerun",
];

/// Conditional directives. Both branches are read.
const CONDITIONALS: &[&str] = &["if", "ifarch", "ifnarch", "ifos", "ifnos", "elif", "else", "endif"];

/// Version comparison operators that may follow a dependency name.
const OPERATORS: &[&str] = &["<", "<=", "=", "==", ">=", ">"];

/// Errors that can occur while parsing a descriptor.
#[derive(Debug, Error)]
pub enum DescriptorError {
  /// The descriptor is unparseable or a field could not be resolved.
  #[error("malformed descriptor: {field}{}: {reason}", line.map(|l| format!(" (line {l})")).unwrap_or_default())]
  Malformed {
    field: String,
    line: Option<usize>,
    reason: String,
  },

  /// A macro referenced itself while resolving a field.
  #[error("cyclic macro in {field}: {}", chain.join(" -> "))]
  CyclicMacro { field: String, chain: Vec<String> },

  /// The descriptor file could not be read.
  #[error("failed to read descriptor '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl DescriptorError {
  fn malformed(field: &str, line: Option<usize>, reason: impl Into<String>) -> Self {
    Self::Malformed {
      field: field.to_string(),
      line,
      reason: reason.into(),
    }
  }

  fn from_macro(field: &str, line: Option<usize>, err: MacroError) -> Self {
    match err {
      MacroError::Cyclic { chain } => Self::CyclicMacro {
        field: field.to_string(),
        chain,
      },
      other => Self::malformed(field, line, other.to_string()),
    }
  }
}

/// A source archive declared by `Source`/`SourceN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
  /// The number in `SourceN` (0 for a bare `Source`).
  pub index: u32,
  /// Resolved URL or local path as written.
  pub location: String,
  /// File name the source is stored under.
  pub filename: String,
  /// Resolved path inside the source directory.
  pub path: PathBuf,
}

impl Source {
  /// Whether the source is fetched over the network.
  pub fn is_remote(&self) -> bool {
    self.location.contains("://")
  }
}

/// A patch declared by `Patch`/`PatchN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
  pub index: u32,
  pub location: String,
  pub path: PathBuf,
}

/// One installable artifact produced from the descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subpackage {
  /// Full package name (`foo`, `foo-devel`, ...).
  pub name: String,
  /// Explicit `Provides` capability names.
  pub provides: Vec<String>,
  /// Architecture of the binary package.
  pub arch: String,
  /// Resolved path of the binary package.
  pub rpm: PathBuf,
}

impl Subpackage {
  /// Every capability this subpackage satisfies: its own name, then its
  /// explicit provides.
  pub fn capabilities(&self) -> impl Iterator<Item = &str> {
    std::iter::once(self.name.as_str()).chain(self.provides.iter().map(String::as_str))
  }
}

/// A fully macro-resolved package descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDescriptor {
  /// Path of the descriptor file.
  pub path: PathBuf,
  pub name: String,
  pub version: String,
  pub release: String,
  pub epoch: Option<String>,
  /// Sources in declaration order.
  pub sources: Vec<Source>,
  /// Patches in declaration order.
  pub patches: Vec<Patch>,
  /// Build dependency names in declaration order, without duplicates.
  pub build_requires: Vec<String>,
  /// Packages that produce a binary package: the main package first, then
  /// each `%package` in declaration order. When the descriptor has `%files`
  /// sections, packages without one are left out.
  pub subpackages: Vec<Subpackage>,
  /// Resolved path of the source package.
  pub source_rpm: PathBuf,
  /// The environment every field was resolved against.
  pub macros: MacroEnv,
}

/// A raw `Tag: value` occurrence.
#[derive(Debug, Clone)]
struct RawTag {
  line: usize,
  index: u32,
  value: String,
}

#[derive(Debug, Default)]
struct RawSubpackage {
  line: usize,
  /// Unexpanded full name (`%{name}-devel` or the `-n` name)
  name: String,
  provides: Vec<RawTag>,
  arch: Option<RawTag>,
}

#[derive(Debug, Default)]
struct RawDescriptor {
  name: Option<RawTag>,
  version: Option<RawTag>,
  release: Option<RawTag>,
  epoch: Option<RawTag>,
  sources: Vec<RawTag>,
  patches: Vec<RawTag>,
  build_requires: Vec<RawTag>,
  defines: Vec<(String, String)>,
  /// Index 0 is the main package
  packages: Vec<RawSubpackage>,
  /// Unexpanded package names of `%files` sections
  files: Vec<RawTag>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
  Preamble(usize),
  Section,
}

impl PackageDescriptor {
  /// Read and parse a descriptor file.
  pub fn from_file(path: &Path, macros: &MacroEnv) -> Result<Self, DescriptorError> {
    let text = fs::read_to_string(path).map_err(|source| DescriptorError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::parse(path, &text, macros)
  }

  /// Parse descriptor text. Pure: no filesystem access.
  ///
  /// # Errors
  ///
  /// Returns [`DescriptorError::Malformed`] if a required field is missing,
  /// a tag has no value, or a macro cannot be resolved, and
  /// [`DescriptorError::CyclicMacro`] if resolution loops.
  pub fn parse(path: &Path, text: &str, macros: &MacroEnv) -> Result<Self, DescriptorError> {
    let raw = scan(text)?;

    let mut env = macros.clone();
    for (name, body) in &raw.defines {
      env.define(name.as_str(), body.as_str());
    }

    let name_tag = raw
      .name
      .as_ref()
      .ok_or_else(|| DescriptorError::malformed("Name", None, "missing"))?;
    let version_tag = raw
      .version
      .as_ref()
      .ok_or_else(|| DescriptorError::malformed("Version", None, "missing"))?;
    let release_tag = raw
      .release
      .as_ref()
      .ok_or_else(|| DescriptorError::malformed("Release", None, "missing"))?;

    env.define("name", name_tag.value.as_str());
    env.define("version", version_tag.value.as_str());
    env.define("release", release_tag.value.as_str());
    if let Some(epoch) = &raw.epoch {
      env.define("epoch", epoch.value.as_str());
    }

    let name = expand_identity(&env, "Name", name_tag)?;
    let version = expand_identity(&env, "Version", version_tag)?;
    let release = expand_identity(&env, "Release", release_tag)?;
    let epoch = raw
      .epoch
      .as_ref()
      .map(|tag| expand_identity(&env, "Epoch", tag))
      .transpose()?;

    // Pin the resolved identity so later lookups never re-expand
    env.define("name", name.as_str());
    env.define("version", version.as_str());
    env.define("release", release.as_str());
    if let Some(epoch) = &epoch {
      env.define("epoch", epoch.as_str());
    }

    let source_dir = expand(&env, "_sourcedir", None, "%{_sourcedir}")?;

    let mut sources = Vec::with_capacity(raw.sources.len());
    for tag in &raw.sources {
      let field = tag_field("Source", tag.index);
      let location = expand(&env, &field, Some(tag.line), &tag.value)?;
      let filename = source_filename(&location)
        .ok_or_else(|| DescriptorError::malformed(&field, Some(tag.line), "no file name in location"))?
        .to_string();
      let path = clean_path(Path::new(&source_dir).join(&filename));
      trace!(%field, %location, path = %path.display(), "resolved source");
      sources.push(Source {
        index: tag.index,
        location,
        filename,
        path,
      });
    }

    let mut patches = Vec::with_capacity(raw.patches.len());
    for tag in &raw.patches {
      let field = tag_field("Patch", tag.index);
      let location = expand(&env, &field, Some(tag.line), &tag.value)?;
      let filename = source_filename(&location)
        .ok_or_else(|| DescriptorError::malformed(&field, Some(tag.line), "no file name in location"))?;
      let path = clean_path(Path::new(&source_dir).join(filename));
      patches.push(Patch {
        index: tag.index,
        location,
        path,
      });
    }

    let mut build_requires = Vec::new();
    for tag in &raw.build_requires {
      let value = expand(&env, "BuildRequires", Some(tag.line), &tag.value)?;
      for dep in dependency_names(&value) {
        if !build_requires.contains(&dep) {
          build_requires.push(dep);
        }
      }
    }

    let default_arch = expand(&env, "_arch", None, "%{_arch}")?;
    let rpm_dir = expand(&env, "_rpmdir", None, "%{_rpmdir}")?;
    let srpm_dir = expand(&env, "_srcrpmdir", None, "%{_srcrpmdir}")?;

    let main_arch = match raw.packages.first().and_then(|p| p.arch.as_ref()) {
      Some(tag) => expand(&env, "BuildArch", Some(tag.line), &tag.value)?,
      None => default_arch,
    };

    let mut subpackages: Vec<Subpackage> = Vec::with_capacity(raw.packages.len());
    for pkg in &raw.packages {
      let pkg_name = expand(&env, "%package", Some(pkg.line), &pkg.name)?;
      if pkg_name.is_empty() {
        return Err(DescriptorError::malformed("%package", Some(pkg.line), "empty package name"));
      }
      if subpackages.iter().any(|s| s.name == pkg_name) {
        return Err(DescriptorError::malformed(
          "%package",
          Some(pkg.line),
          format!("package '{pkg_name}' declared twice"),
        ));
      }

      let arch = match &pkg.arch {
        Some(tag) => expand(&env, "BuildArch", Some(tag.line), &tag.value)?,
        None => main_arch.clone(),
      };

      let mut provides = Vec::new();
      for tag in &pkg.provides {
        let value = expand(&env, "Provides", Some(tag.line), &tag.value)?;
        for cap in dependency_names(&value) {
          if cap != pkg_name && !provides.contains(&cap) {
            provides.push(cap);
          }
        }
      }

      let rpm = clean_path(
        Path::new(&rpm_dir)
          .join(&arch)
          .join(format!("{pkg_name}-{version}-{release}.{arch}.rpm")),
      );

      subpackages.push(Subpackage {
        name: pkg_name,
        provides,
        arch,
        rpm,
      });
    }

    if !raw.files.is_empty() {
      let mut packaged = Vec::with_capacity(raw.files.len());
      for tag in &raw.files {
        let pkg_name = expand(&env, "%files", Some(tag.line), &tag.value)?;
        if !subpackages.iter().any(|s| s.name == pkg_name) {
          warn!(package = %name, line = tag.line, files = %pkg_name, "%files section for undeclared package");
        }
        packaged.push(pkg_name);
      }
      subpackages.retain(|s| {
        let kept = packaged.contains(&s.name);
        if !kept {
          trace!(package = %name, subpackage = %s.name, "no %files section, no binary package");
        }
        kept
      });
    }

    let source_rpm = clean_path(Path::new(&srpm_dir).join(format!("{name}-{version}-{release}.src.rpm")));

    debug!(
      package = %name,
      %version,
      %release,
      sources = sources.len(),
      patches = patches.len(),
      subpackages = subpackages.len(),
      "parsed descriptor"
    );

    Ok(Self {
      path: clean_path(path),
      name,
      version,
      release,
      epoch,
      sources,
      patches,
      build_requires,
      subpackages,
      source_rpm,
      macros: env,
    })
  }

  /// The main package, unless `%files` sections leave it out.
  pub fn main_package(&self) -> Option<&Subpackage> {
    self.subpackages.first().filter(|s| s.name == self.name)
  }

  /// Resolved paths of every binary package.
  pub fn binary_rpms(&self) -> impl Iterator<Item = &Path> {
    self.subpackages.iter().map(|s| s.rpm.as_path())
  }

  /// `name-version-release`, with `epoch:` prepended when set.
  pub fn nevr(&self) -> String {
    match &self.epoch {
      Some(epoch) => format!("{}-{}:{}-{}", self.name, epoch, self.version, self.release),
      None => format!("{}-{}-{}", self.name, self.version, self.release),
    }
  }

  /// Resolve an arbitrary expression against this descriptor's macros.
  pub fn expand(&self, input: &str) -> Result<String, MacroError> {
    self.macros.expand(input)
  }
}

fn tag_field(prefix: &str, index: u32) -> String {
  format!("{prefix}{index}")
}

fn expand(env: &MacroEnv, field: &str, line: Option<usize>, value: &str) -> Result<String, DescriptorError> {
  env
    .expand(value)
    .map(|s| s.trim().to_string())
    .map_err(|e| DescriptorError::from_macro(field, line, e))
}

/// Expand an identity field; it must be non-empty and free of `-`.
fn expand_identity(env: &MacroEnv, field: &str, tag: &RawTag) -> Result<String, DescriptorError> {
  let value = expand(env, field, Some(tag.line), &tag.value)?;
  if value.is_empty() {
    return Err(DescriptorError::malformed(
      field,
      Some(tag.line),
      "empty after macro expansion",
    ));
  }
  if field != "Name" && value.contains('-') {
    return Err(DescriptorError::malformed(
      field,
      Some(tag.line),
      format!("'{value}' must not contain '-'"),
    ));
  }
  if value.chars().any(char::is_whitespace) {
    return Err(DescriptorError::malformed(
      field,
      Some(tag.line),
      format!("'{value}' must not contain whitespace"),
    ));
  }
  Ok(value)
}

/// The file name a source location is stored under.
///
/// An explicit `#/name` fragment wins; otherwise the last path segment.
pub fn source_filename(location: &str) -> Option<&str> {
  if let Some((_, name)) = location.rsplit_once("#/") {
    return Some(name).filter(|n| !n.is_empty());
  }
  location.rsplit('/').next().filter(|n| !n.is_empty())
}

/// Dependency names from a `BuildRequires`/`Provides` value.
///
/// Names are separated by commas or whitespace; version constraints such as
/// `>= 1.0` are dropped.
pub fn dependency_names(value: &str) -> Vec<String> {
  let mut names = Vec::new();
  let mut tokens = value.split(|c: char| c == ',' || c.is_whitespace()).filter(|t| !t.is_empty());

  while let Some(token) = tokens.next() {
    if OPERATORS.contains(&token) {
      // Skip the version that follows the operator
      tokens.next();
      continue;
    }
    names.push(token.to_string());
  }

  names
}

/// Split a `Tag: value` line. Tag names are alphanumeric, optionally with a
/// parenthesised qualifier such as `Requires(post)`.
fn split_tag(line: &str) -> Option<(&str, &str)> {
  let (tag, value) = line.split_once(':')?;
  let tag = tag.trim();
  let base = tag.split('(').next().unwrap_or(tag);
  if base.is_empty() || !base.chars().all(|c| c.is_ascii_alphanumeric()) {
    return None;
  }
  Some((tag, value.trim()))
}

/// Parse the numeric suffix of `SourceN`/`PatchN`.
fn numbered(tag_lower: &str, prefix: &str) -> Option<u32> {
  let rest = tag_lower.strip_prefix(prefix)?;
  if rest.is_empty() {
    Some(0)
  } else {
    rest.parse().ok()
  }
}

/// The unexpanded package name a `%files` header applies to. `-f FILE`
/// options are skipped; no name means the main package.
fn files_package(args: &[&str]) -> String {
  let mut args = args.iter();
  while let Some(arg) = args.next() {
    match *arg {
      "-n" => {
        if let Some(name) = args.next() {
          return (*name).to_string();
        }
      }
      "-f" => {
        args.next();
      }
      a if a.starts_with('-') => {}
      suffix => return format!("%{{name}}-{suffix}"),
    }
  }
  "%{name}".to_string()
}

/// First pass: collect raw values without expanding anything.
fn scan(text: &str) -> Result<RawDescriptor, DescriptorError> {
  let mut raw = RawDescriptor {
    packages: vec![RawSubpackage {
      line: 1,
      name: "%{name}".to_string(),
      ..Default::default()
    }],
    ..Default::default()
  };
  let mut state = State::Preamble(0);

  let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l));
  while let Some((line_no, line)) = lines.next() {
    let trimmed = line.trim();

    if let Some(directive) = trimmed.strip_prefix('%') {
      let keyword = directive
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default();

      match keyword {
        "define" | "global" => {
          let mut body = directive[keyword.len()..].trim().to_string();
          // Backslash continues the body on the next line
          while body.ends_with('\\') {
            body.pop();
            match lines.next() {
              Some((_, next)) => {
                body.push('\n');
                body.push_str(next.trim());
              }
              None => break,
            }
          }
          let (name, value) = body
            .split_once(char::is_whitespace)
            .map(|(n, v)| (n, v.trim()))
            .unwrap_or((body.as_str(), ""));
          let name = name.split('(').next().unwrap_or(name);
          if name.is_empty() {
            return Err(DescriptorError::malformed(
              &format!("%{keyword}"),
              Some(line_no),
              "missing macro name",
            ));
          }
          trace!(line = line_no, macro_name = name, "macro definition");
          raw.defines.push((name.to_string(), value.to_string()));
        }
        "package" => {
          let args: Vec<&str> = directive[keyword.len()..].split_whitespace().collect();
          let name = match args.as_slice() {
            ["-n", name, ..] => (*name).to_string(),
            [suffix, ..] if !suffix.starts_with('-') => format!("%{{name}}-{suffix}"),
            _ => {
              return Err(DescriptorError::malformed(
                "%package",
                Some(line_no),
                "missing package name",
              ));
            }
          };
          raw.packages.push(RawSubpackage {
            line: line_no,
            name,
            ..Default::default()
          });
          state = State::Preamble(raw.packages.len() - 1);
        }
        "files" => {
          let args: Vec<&str> = directive[keyword.len()..].split_whitespace().collect();
          raw.files.push(RawTag {
            line: line_no,
            index: 0,
            value: files_package(&args),
          });
          state = State::Section;
        }
        k if SECTIONS.contains(&k) => state = State::Section,
        k if CONDITIONALS.contains(&k) => {}
        _ => {}
      }
      continue;
    }

    let State::Preamble(pkg) = state else {
      continue;
    };

    if trimmed.is_empty() || trimmed.starts_with('#') {
      continue;
    }

    let Some((tag, value)) = split_tag(trimmed) else {
      continue;
    };
    let tag_lower = tag.to_ascii_lowercase();

    let raw_tag = |index| {
      if value.is_empty() {
        Err(DescriptorError::malformed(tag, Some(line_no), "missing value"))
      } else {
        Ok(RawTag {
          line: line_no,
          index,
          value: value.to_string(),
        })
      }
    };

    match tag_lower.as_str() {
      "provides" => raw.packages[pkg].provides.push(raw_tag(0)?),
      "buildarch" | "buildarchitectures" => raw.packages[pkg].arch = Some(raw_tag(0)?),
      // Identity and build inputs belong to the main preamble only
      _ if pkg != 0 => {}
      "name" => raw.name = Some(raw_tag(0)?),
      "version" => raw.version = Some(raw_tag(0)?),
      "release" => raw.release = Some(raw_tag(0)?),
      "epoch" => raw.epoch = Some(raw_tag(0)?),
      "buildrequires" => raw.build_requires.push(raw_tag(0)?),
      t => {
        if let Some(index) = numbered(t, "source") {
          raw.sources.push(raw_tag(index)?);
        } else if let Some(index) = numbered(t, "patch") {
          raw.patches.push(raw_tag(index)?);
        }
      }
    }
  }

  Ok(raw)
}
