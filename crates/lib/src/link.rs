//! Source links: short-hand (repository, ref) hints resolved to one canonical
//! archive-download URL.
//!
//! Hints come from two places:
//!
//! - header comments in a spec file (`#XSrepo:`, `#XStag:`, `#XSbranch:`),
//! - a standalone `.lnk` JSON file with `repo`, `tag` and `branch` keys.
//!
//! Ref precedence is the same for both: a tag always wins. Without a tag, an
//! explicit caller branch beats the hinted branch, which beats the configured
//! default branch.
//!
//! Rewriting never edits a file in place. The whole file is parsed, one field
//! is changed and the result is staged and renamed over the destination.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{BuildConfig, DEFAULT_BRANCH, DEFAULT_URL_TEMPLATE};
use crate::descriptor::source_filename;
use crate::fsutil::{write_atomic, write_string_atomic};

const REPO_HINT: &str = "#XSrepo:";
const TAG_HINT: &str = "#XStag:";
const BRANCH_HINT: &str = "#XSbranch:";

/// Errors that can occur while resolving or rewriting links.
#[derive(Debug, Error)]
pub enum LinkError {
  /// Neither the link nor its package name says which repository to use.
  #[error("no repository for link{}", .0.as_ref().map(|p| format!(" '{}'", p.display())).unwrap_or_default())]
  MissingRepo(Option<PathBuf>),

  #[error("failed to read '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse link file '{path}': {source}")]
  Json {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  /// The link file parsed but does not hold a usable record.
  #[error("invalid link file '{path}': {reason}")]
  Invalid { path: PathBuf, reason: String },

  #[error("failed to write '{path}': {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Repository and ref hints for one remote source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkDescriptor {
  /// The owning package's name, used when `repo` is absent.
  pub package: Option<String>,
  pub repo: Option<String>,
  pub tag: Option<String>,
  pub branch: Option<String>,
}

impl LinkDescriptor {
  /// The repository name, falling back to the package name.
  pub fn repo_name(&self) -> Option<&str> {
    self
      .repo
      .as_deref()
      .or(self.package.as_deref())
      .filter(|r| !r.trim().is_empty())
  }
}

/// Builds archive-download URLs from link hints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLinkResolver {
  template: String,
  default_branch: String,
}

impl Default for SourceLinkResolver {
  fn default() -> Self {
    Self::new(DEFAULT_URL_TEMPLATE, DEFAULT_BRANCH)
  }
}

impl SourceLinkResolver {
  /// A resolver over a URL template with `{repo}` and `{ref}` placeholders.
  pub fn new(template: impl Into<String>, default_branch: impl Into<String>) -> Self {
    Self {
      template: template.into(),
      default_branch: default_branch.into(),
    }
  }

  pub fn from_config(config: &BuildConfig) -> Self {
    Self::new(config.url_template.as_str(), config.default_branch.as_str())
  }

  /// The ref a link resolves to.
  pub fn select_ref<'a>(&'a self, link: &'a LinkDescriptor, branch_override: Option<&'a str>) -> &'a str {
    if let Some(tag) = link.tag.as_deref() {
      return tag;
    }
    branch_override
      .or(link.branch.as_deref())
      .unwrap_or(self.default_branch.as_str())
  }

  /// Resolve a link to its download URL.
  ///
  /// # Errors
  ///
  /// Returns [`LinkError::MissingRepo`] if neither `repo` nor the package
  /// name is known. Nothing is partially resolved.
  pub fn resolve(&self, link: &LinkDescriptor, branch_override: Option<&str>) -> Result<String, LinkError> {
    let repo = link.repo_name().ok_or(LinkError::MissingRepo(None))?;
    let reference = self.select_ref(link, branch_override);
    Ok(self.template.replace("{repo}", repo).replace("{ref}", reference))
  }

  /// Rewrite a spec file's `Source0` line to point at its resolved URL.
  ///
  /// Spec links default to repository `%{name}` and tag `v%{version}`; the
  /// macros are left for the package build tool to expand. A `#XSbranch:`
  /// hint drops the default tag so the branch is used, unless `#XStag:` is
  /// also present. The `#/<file>` fragment keeps the original file name.
  ///
  /// Every other line is copied verbatim. Returns the new URL, or `None` if
  /// the spec has no `Source0` line and was copied unchanged.
  pub fn rewrite_spec(&self, src: &Path, dest: &Path, branch_override: Option<&str>) -> Result<Option<String>, LinkError> {
    let text = fs::read_to_string(src).map_err(|source| LinkError::Read {
      path: src.to_path_buf(),
      source,
    })?;

    let (rendered, url) = self.render_spec(&text, branch_override)?;
    match &url {
      Some(url) => info!(spec = %src.display(), %url, "rewrote Source0"),
      None => warn!(spec = %src.display(), "no Source0 line; copying unchanged"),
    }

    write_string_atomic(dest, &rendered).map_err(|source| LinkError::Write {
      path: dest.to_path_buf(),
      source,
    })?;
    Ok(url)
  }

  /// Pure form of [`rewrite_spec`](Self::rewrite_spec) over spec text.
  pub fn render_spec(&self, text: &str, branch_override: Option<&str>) -> Result<(String, Option<String>), LinkError> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();

    let Some((index, (tag, value))) = lines
      .iter()
      .enumerate()
      .find_map(|(i, l)| source0_value(l).map(|found| (i, found)))
    else {
      return Ok((text.to_string(), None));
    };

    let link = spec_link(&lines[..index]);
    let filename = source_filename(value).unwrap_or(value);
    let url = self.resolve(&link, branch_override)?;

    let line = lines[index];
    let ending = &line[line.trim_end_matches(['\r', '\n']).len()..];
    let replacement = format!("{tag}: {url}#/{filename}{ending}");
    debug!(line = index + 1, %url, "replacing Source0");

    let rendered: String = lines
      .iter()
      .enumerate()
      .map(|(i, l)| if i == index { replacement.as_str() } else { *l })
      .collect();
    Ok((rendered, Some(url)))
  }

  /// Rewrite a `.lnk` file: add the resolved `URL`, drop `branch`, and keep
  /// every other key in its original order.
  pub fn rewrite_link(&self, src: &Path, dest: &Path, branch_override: Option<&str>) -> Result<String, LinkError> {
    let mut record = LinkRecord::from_file(src)?;
    let url = self
      .resolve(&record.link, branch_override)
      .map_err(|_| LinkError::MissingRepo(Some(src.to_path_buf())))?;

    record.fields.insert("URL".to_string(), Value::String(url.clone()));
    record.fields.shift_remove("branch");

    write_atomic(dest, |w| {
      let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
      let mut serializer = serde_json::Serializer::with_formatter(&mut *w, formatter);
      record.fields.serialize(&mut serializer).map_err(io::Error::other)?;
      w.write_all(b"\n")
    })
    .map_err(|source| LinkError::Write {
      path: dest.to_path_buf(),
      source,
    })?;

    info!(link = %src.display(), %url, "rewrote link");
    Ok(url)
  }
}

/// A parsed `.lnk` file.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkRecord {
  pub path: PathBuf,
  /// Hints read from the file; the package defaults to the file stem.
  pub link: LinkDescriptor,
  /// Every key of the file, in file order.
  pub fields: Map<String, Value>,
}

impl LinkRecord {
  pub fn from_file(path: &Path) -> Result<Self, LinkError> {
    let text = fs::read_to_string(path).map_err(|source| LinkError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::parse(path, &text)
  }

  pub fn parse(path: &Path, text: &str) -> Result<Self, LinkError> {
    let value: Value = serde_json::from_str(text).map_err(|source| LinkError::Json {
      path: path.to_path_buf(),
      source,
    })?;
    let Value::Object(fields) = value else {
      return Err(LinkError::Invalid {
        path: path.to_path_buf(),
        reason: "expected a JSON object".to_string(),
      });
    };

    let string_field = |key: &str| -> Result<Option<String>, LinkError> {
      match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(LinkError::Invalid {
          path: path.to_path_buf(),
          reason: format!("'{key}' must be a string, found {other}"),
        }),
      }
    };

    let link = LinkDescriptor {
      package: path.file_stem().map(|s| s.to_string_lossy().into_owned()),
      repo: string_field("repo")?,
      tag: string_field("tag")?,
      branch: string_field("branch")?,
    };

    Ok(Self {
      path: path.to_path_buf(),
      link,
      fields,
    })
  }

  /// The package this link belongs to: the file stem.
  pub fn package(&self) -> Option<&str> {
    self.link.package.as_deref()
  }
}

/// Read the `#XS` header hints from the spec lines before `Source0`. The
/// first of each wins.
fn spec_link(lines: &[&str]) -> LinkDescriptor {
  let hint = |prefix: &str| {
    lines.iter().find_map(|l| {
      l.strip_prefix(prefix)
        .and_then(|rest| rest.split_whitespace().next())
        .map(str::to_string)
    })
  };

  let repo = hint(REPO_HINT);
  let tag = hint(TAG_HINT);
  let branch = hint(BRANCH_HINT);

  let tag = match (tag, &branch) {
    (Some(tag), _) => Some(tag),
    (None, Some(_)) => None,
    (None, None) => Some("v%{version}".to_string()),
  };

  LinkDescriptor {
    package: Some("%{name}".to_string()),
    repo,
    tag,
    branch,
  }
}

/// If `line` is a `Source0:` (or bare `Source:`) tag, its spelling and value.
fn source0_value(line: &str) -> Option<(&str, &str)> {
  let (tag, value) = line.split_once(':')?;
  let tag = tag.trim();
  if !(tag.eq_ignore_ascii_case("source0") || tag.eq_ignore_ascii_case("source")) {
    return None;
  }
  let value = value.trim();
  (!value.is_empty()).then_some((tag, value))
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  const BASE: &str = "https://code.citrite.net/rest/archive/latest/projects/XS/repos";

  fn link(repo: Option<&str>, tag: Option<&str>, branch: Option<&str>) -> LinkDescriptor {
    LinkDescriptor {
      package: None,
      repo: repo.map(str::to_string),
      tag: tag.map(str::to_string),
      branch: branch.map(str::to_string),
    }
  }

  // ==========================================================================
  // Resolution
  // ==========================================================================

  #[test]
  fn tag_beats_branch() {
    let resolver = SourceLinkResolver::default();
    let url = resolver
      .resolve(&link(Some("xen-api"), Some("v1"), Some("dev")), None)
      .unwrap();
    assert_eq!(url, format!("{BASE}/xen-api/archive?at=v1&format=tar.gz"));
  }

  #[test]
  fn tag_beats_branch_override() {
    let resolver = SourceLinkResolver::default();
    let url = resolver
      .resolve(&link(Some("xen-api"), Some("v1"), Some("dev")), Some("feature"))
      .unwrap();
    assert!(url.contains("at=v1&"));
    assert!(!url.contains("dev"));
  }

  #[test]
  fn branch_precedence() {
    let resolver = SourceLinkResolver::new("{repo}@{ref}", "trunk");
    assert_eq!(resolver.resolve(&link(Some("r"), None, Some("dev")), Some("x")).unwrap(), "r@x");
    assert_eq!(resolver.resolve(&link(Some("r"), None, Some("dev")), None).unwrap(), "r@dev");
    assert_eq!(resolver.resolve(&link(Some("r"), None, None), None).unwrap(), "r@trunk");
  }

  #[test]
  fn repo_falls_back_to_package() {
    let resolver = SourceLinkResolver::new("{repo}@{ref}", "master");
    let mut l = link(None, Some("v2"), None);
    l.package = Some("ocaml-uri".to_string());
    assert_eq!(resolver.resolve(&l, None).unwrap(), "ocaml-uri@v2");
  }

  #[test]
  fn missing_repo_fails() {
    let resolver = SourceLinkResolver::default();
    let result = resolver.resolve(&link(None, Some("v1"), None), None);
    assert!(matches!(result, Err(LinkError::MissingRepo(None))));
  }

  // ==========================================================================
  // Spec rewriting
  // ==========================================================================

  const SPEC: &str = "Name: xenops\nVersion: 1.0\nRelease: 1\nSource0: https://example.com/xenops.tar.gz#/xenops-1.0.tar.gz\nSource1: extra.conf\n";

  #[test]
  fn spec_defaults_to_name_and_version_tag() {
    let resolver = SourceLinkResolver::default();
    let (out, url) = resolver.render_spec(SPEC, None).unwrap();

    let expected_url = format!("{BASE}/%{{name}}/archive?at=v%{{version}}&format=tar.gz");
    assert_eq!(url.as_deref(), Some(expected_url.as_str()));
    assert_eq!(
      out.lines().nth(3).unwrap(),
      format!("Source0: {expected_url}#/xenops-1.0.tar.gz")
    );
    assert_eq!(out.lines().count(), SPEC.lines().count());
    assert_eq!(out.lines().nth(4).unwrap(), "Source1: extra.conf");
  }

  #[test]
  fn spec_branch_hint_drops_default_tag() {
    let text = format!("#XSrepo: xen-api\n#XSbranch: team/dev\n{SPEC}");
    let resolver = SourceLinkResolver::new("{repo}@{ref}", "master");

    let (_, url) = resolver.render_spec(&text, None).unwrap();
    assert_eq!(url.as_deref(), Some("xen-api@team/dev"));

    let (_, url) = resolver.render_spec(&text, Some("hotfix")).unwrap();
    assert_eq!(url.as_deref(), Some("xen-api@hotfix"));
  }

  #[test]
  fn spec_explicit_tag_beats_branch_hint() {
    let text = format!("#XSbranch: dev\n#XStag: v1\n{SPEC}");
    let resolver = SourceLinkResolver::new("{repo}@{ref}", "master");

    let (out, url) = resolver.render_spec(&text, Some("other")).unwrap();
    assert_eq!(url.as_deref(), Some("%{name}@v1"));
    // Hint lines stay in place
    assert!(out.starts_with("#XSbranch: dev\n#XStag: v1\n"));
  }

  #[test]
  fn spec_hints_after_source0_are_ignored() {
    let text = format!("#XSrepo: xen-api\n{SPEC}%changelog\n#XSbranch: old-dev\n#XSrepo: other\n");
    let resolver = SourceLinkResolver::new("{repo}@{ref}", "master");

    let (out, url) = resolver.render_spec(&text, None).unwrap();
    assert_eq!(url.as_deref(), Some("xen-api@v%{version}"));
    assert!(out.ends_with("%changelog\n#XSbranch: old-dev\n#XSrepo: other\n"));
  }

  #[test]
  fn spec_without_fragment_uses_last_segment() {
    let text = "Name: a\nSource: https://h/p/a-1.tgz\n";
    let resolver = SourceLinkResolver::new("{repo}@{ref}", "master");
    let (out, _) = resolver.render_spec(text, None).unwrap();
    assert_eq!(out, "Name: a\nSource: %{name}@v%{version}#/a-1.tgz\n");
  }

  #[test]
  fn spec_keeps_crlf_and_missing_final_newline() {
    let text = "Source0: a/b.tgz\r\nName: x";
    let resolver = SourceLinkResolver::new("{repo}@{ref}", "master");
    let (out, _) = resolver.render_spec(text, None).unwrap();
    assert_eq!(out, "Source0: %{name}@v%{version}#/b.tgz\r\nName: x");
  }

  #[test]
  fn spec_without_source_is_copied() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("a.spec");
    let dest = temp.path().join("out/a.spec");
    fs::write(&src, "Name: a\n").unwrap();

    let url = SourceLinkResolver::default().rewrite_spec(&src, &dest, None).unwrap();
    assert_eq!(url, None);
    assert_eq!(fs::read_to_string(&dest).unwrap(), "Name: a\n");
  }

  #[test]
  fn spec_rewrite_missing_source_leaves_dest_untouched() {
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("a.spec");
    fs::write(&dest, "previous").unwrap();

    let result = SourceLinkResolver::default().rewrite_spec(&temp.path().join("missing.spec"), &dest, None);
    assert!(matches!(result, Err(LinkError::Read { .. })));
    assert_eq!(fs::read_to_string(&dest).unwrap(), "previous");
  }

  // ==========================================================================
  // Link files
  // ==========================================================================

  #[test]
  fn link_rewrite_adds_url_and_drops_branch() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("xen-api.lnk");
    let dest = temp.path().join("out.lnk");
    fs::write(
      &src,
      r#"{"repo": "xen-api", "branch": "dev", "patches": "PATCHES/xen-api"}"#,
    )
    .unwrap();

    let resolver = SourceLinkResolver::new("{repo}@{ref}", "master");
    let url = resolver.rewrite_link(&src, &dest, None).unwrap();
    assert_eq!(url, "xen-api@dev");

    let written = fs::read_to_string(&dest).unwrap();
    assert_eq!(
      written,
      "{\n    \"repo\": \"xen-api\",\n    \"patches\": \"PATCHES/xen-api\",\n    \"URL\": \"xen-api@dev\"\n}\n"
    );
  }

  #[test]
  fn link_repo_defaults_to_file_stem() {
    let record = LinkRecord::parse(Path::new("SPECS/ocaml-uri.lnk"), r#"{"tag": "v1.9"}"#).unwrap();
    assert_eq!(record.package(), Some("ocaml-uri"));

    let resolver = SourceLinkResolver::new("{repo}@{ref}", "master");
    assert_eq!(resolver.resolve(&record.link, Some("dev")).unwrap(), "ocaml-uri@v1.9");
  }

  #[test]
  fn link_rejects_non_object_and_bad_fields() {
    assert!(matches!(
      LinkRecord::parse(Path::new("a.lnk"), "[1]"),
      Err(LinkError::Invalid { .. })
    ));
    assert!(matches!(
      LinkRecord::parse(Path::new("a.lnk"), r#"{"tag": 3}"#),
      Err(LinkError::Invalid { .. })
    ));
    assert!(matches!(
      LinkRecord::parse(Path::new("a.lnk"), "{"),
      Err(LinkError::Json { .. })
    ));
  }
}
