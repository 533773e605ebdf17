//! Build configuration threaded through every planning call.
//!
//! Nothing in this crate reads the process working directory or the current
//! user implicitly. Paths and macro defaults come from a [`BuildConfig`],
//! which can be constructed in code or loaded from a TOML file:
//!
//! ```toml
//! topdir = "_build"
//! dist = ".el7"
//! arch = "x86_64"
//! manifest_dir = "MANIFESTS"
//!
//! [defines]
//! _sourcedir = "%_topdir/SOURCES/%name"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::macros::MacroEnv;

/// Archive-download URL used when no template is configured.
///
/// `{repo}` and `{ref}` are replaced by the repository name and the tag or
/// branch being fetched.
pub const DEFAULT_URL_TEMPLATE: &str =
  "https://code.citrite.net/rest/archive/latest/projects/XS/repos/{repo}/archive?at={ref}&format=tar.gz";

/// Branch used when neither a tag nor a branch hint is available.
pub const DEFAULT_BRANCH: &str = "master";

/// Architecture assumed when the host architecture is not recognised.
pub const FALLBACK_ARCH: &str = "x86_64";

/// Errors that can occur while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse config '{path}': {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("invalid define '{0}': expected NAME=VALUE")]
  InvalidDefine(String),
}

/// Explicit configuration for descriptor parsing, resolution and planning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
  /// rpmbuild top directory (`%{_topdir}`).
  pub topdir: PathBuf,

  /// Distribution tag (`%{dist}`), e.g. `.el7`.
  pub dist: String,

  /// Target architecture (`%{_arch}`).
  pub arch: String,

  /// Extra caller macros. These override the derived defaults.
  pub defines: BTreeMap<String, String>,

  /// Archive-download URL template with `{repo}` and `{ref}` placeholders.
  pub url_template: String,

  /// Branch used when a link has neither tag nor branch.
  pub default_branch: String,

  /// Directory holding `<package>.json` manifests, if any.
  pub manifest_dir: Option<PathBuf>,

  /// Host directory holding per-package source checkouts.
  pub repos_dir: PathBuf,
}

impl Default for BuildConfig {
  fn default() -> Self {
    Self {
      topdir: PathBuf::from("."),
      dist: String::new(),
      arch: host_arch().to_string(),
      defines: BTreeMap::new(),
      url_template: DEFAULT_URL_TEMPLATE.to_string(),
      default_branch: DEFAULT_BRANCH.to_string(),
      manifest_dir: None,
      repos_dir: PathBuf::from("myrepos"),
    }
  }
}

impl BuildConfig {
  /// Load a configuration file. Missing keys take their default values.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;

    toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Add a `NAME=VALUE` define, as given on a command line.
  pub fn add_define(&mut self, define: &str) -> Result<(), ConfigError> {
    let (name, value) = define
      .split_once('=')
      .filter(|(name, _)| !name.trim().is_empty())
      .ok_or_else(|| ConfigError::InvalidDefine(define.to_string()))?;
    self.defines.insert(name.trim().to_string(), value.to_string());
    Ok(())
  }

  /// The base macro environment every descriptor is parsed against.
  pub fn macros(&self) -> MacroEnv {
    let mut env = MacroEnv::new();
    env.define("_topdir", self.topdir.to_string_lossy());
    env.define("_sourcedir", "%{_topdir}/SOURCES");
    env.define("_srcrpmdir", "%{_topdir}/SRPMS");
    env.define("_rpmdir", "%{_topdir}/RPMS");
    env.define("_arch", self.arch.as_str());
    if !self.dist.is_empty() {
      env.define("dist", self.dist.as_str());
    }

    for (name, value) in &self.defines {
      env.define(name.as_str(), value.as_str());
    }

    env
  }
}

/// The host CPU architecture in rpm's spelling.
pub fn host_arch() -> &'static str {
  match std::env::consts::ARCH {
    "x86_64" => "x86_64",
    "aarch64" => "aarch64",
    "x86" => "i686",
    "powerpc64" => "ppc64",
    "s390x" => "s390x",
    _ => FALLBACK_ARCH,
  }
}
