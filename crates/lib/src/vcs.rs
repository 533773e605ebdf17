//! Version-control query surface.
//!
//! The version oracle only needs a handful of repository queries. They are
//! expressed as the [`Vcs`] trait so the oracle can be driven by the real
//! `git` binary ([`GitCli`]) or by an in-memory fake in tests.
//!
//! All calls are synchronous and carry no timeout of their own.

use std::ffi::OsStr;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use thiserror::Error;
use tracing::debug;

/// Errors raised by a version-control backend.
#[derive(Debug, Error)]
pub enum VcsError {
  /// The backend binary could not be started.
  #[error("failed to run '{program}': {source}")]
  Spawn {
    program: String,
    #[source]
    source: io::Error,
  },

  /// The command ran but reported failure.
  #[error("'{command}' failed with exit code {code:?}: {stderr}")]
  Failed {
    command: String,
    code: Option<i32>,
    stderr: String,
  },

  /// A ref could not be resolved to a commit.
  #[error("revision '{0}' not found in repository")]
  RevisionNotFound(String),

  /// The command's output could not be copied to its destination.
  #[error("failed to stream output of '{command}': {source}")]
  Stream {
    command: String,
    #[source]
    source: io::Error,
  },

  /// The command produced output that could not be interpreted.
  #[error("unexpected output from '{command}': {output}")]
  UnexpectedOutput { command: String, output: String },
}

/// Repository queries needed to version and archive sources.
///
/// Every method takes the repository's metadata directory (the `.git`
/// directory of a checkout, or a bare repository).
pub trait Vcs {
  /// Resolve a ref (branch, tag, `HEAD`, abbreviated hash) to a commit id.
  fn rev_parse(&self, git_dir: &Path, rev: &str) -> Result<String, VcsError>;

  /// Describe a commit by its nearest tag. `None` when no tag reaches it.
  fn describe_tags(&self, git_dir: &Path, commit: &str) -> Result<Option<String>, VcsError>;

  /// Number of commits on the first-parent history ending at `commit`.
  fn count_commits(&self, git_dir: &Path, commit: &str) -> Result<usize, VcsError>;

  /// Stream the repository tree at `commit` into `out` as an uncompressed
  /// tar whose entries are all rooted at `prefix/`.
  fn archive_tar(&self, git_dir: &Path, commit: &str, prefix: &str, out: &mut dyn Write) -> Result<(), VcsError>;

  /// All tag names.
  fn tags(&self, git_dir: &Path) -> Result<Vec<String>, VcsError>;

  /// Write one patch file per commit in `start..end` into `out_dir`,
  /// returning their paths in commit order.
  fn format_patch(&self, git_dir: &Path, start: &str, end: &str, out_dir: &Path) -> Result<Vec<PathBuf>, VcsError>;
}

/// [`Vcs`] backed by the `git` command-line tool.
#[derive(Debug, Clone)]
pub struct GitCli {
  program: PathBuf,
}

impl Default for GitCli {
  fn default() -> Self {
    Self {
      program: PathBuf::from("git"),
    }
  }
}

impl GitCli {
  pub fn new() -> Self {
    Self::default()
  }

  /// Use a specific `git` binary.
  pub fn with_program(program: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
    }
  }

  fn command(&self, git_dir: &Path) -> Command {
    let mut command = Command::new(&self.program);
    command.arg(format!("--git-dir={}", git_dir.display()));
    command
  }

  fn run<I, S>(&self, git_dir: &Path, args: I) -> Result<Output, VcsError>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
  {
    let mut command = self.command(git_dir);
    command.args(args);
    let rendered = render(&command);

    debug!(command = %rendered, "running git");

    command.output().map_err(|source| VcsError::Spawn {
      program: self.program.display().to_string(),
      source,
    })
  }

  /// Run and require success, returning trimmed stdout.
  fn run_checked<I, S>(&self, git_dir: &Path, args: I) -> Result<String, VcsError>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
  {
    let args: Vec<S> = args.into_iter().collect();
    let command = render(self.command(git_dir).args(&args));
    let output = self.run(git_dir, args)?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
      if !stderr.is_empty() {
        debug!(stderr = %stderr, "git stderr");
      }
      return Err(VcsError::Failed {
        command,
        code: output.status.code(),
        stderr,
      });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
  }
}

fn render(command: &Command) -> String {
  std::iter::once(command.get_program())
    .chain(command.get_args())
    .map(|s| s.to_string_lossy().into_owned())
    .collect::<Vec<_>>()
    .join(" ")
}

impl Vcs for GitCli {
  fn rev_parse(&self, git_dir: &Path, rev: &str) -> Result<String, VcsError> {
    let spec = format!("{rev}^{{commit}}");
    match self.run_checked(git_dir, ["rev-parse", "--verify", "--quiet", spec.as_str()]) {
      Ok(sha) if !sha.is_empty() => Ok(sha),
      Ok(_) | Err(VcsError::Failed { .. }) => Err(VcsError::RevisionNotFound(rev.to_string())),
      Err(e) => Err(e),
    }
  }

  fn describe_tags(&self, git_dir: &Path, commit: &str) -> Result<Option<String>, VcsError> {
    // Exit status is non-zero when no tag reaches the commit
    let output = self.run(git_dir, ["describe", "--tags", commit])?;
    let description = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if output.status.success() && !description.is_empty() {
      Ok(Some(description))
    } else {
      Ok(None)
    }
  }

  fn count_commits(&self, git_dir: &Path, commit: &str) -> Result<usize, VcsError> {
    let out = self.run_checked(git_dir, ["rev-list", "--count", "--first-parent", commit])?;
    out.parse().map_err(|_| VcsError::UnexpectedOutput {
      command: "git rev-list --count".to_string(),
      output: out,
    })
  }

  fn archive_tar(&self, git_dir: &Path, commit: &str, prefix: &str, out: &mut dyn Write) -> Result<(), VcsError> {
    let prefix_arg = format!("--prefix={prefix}/");
    let mut command = self.command(git_dir);
    command
      .args(["archive", "--format=tar", prefix_arg.as_str(), commit])
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());
    let rendered = render(&command);

    debug!(command = %rendered, "running git");

    let mut child = command.spawn().map_err(|source| VcsError::Spawn {
      program: self.program.display().to_string(),
      source,
    })?;

    let copied = match child.stdout.take() {
      Some(mut stdout) => io::copy(&mut stdout, out).map(|_| ()),
      None => Ok(()),
    };
    // Reap the child even if the copy failed; stdout is already closed
    let output = child.wait_with_output().map_err(|source| VcsError::Stream {
      command: rendered.clone(),
      source,
    })?;

    if !output.status.success() {
      return Err(VcsError::Failed {
        command: rendered,
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }
    copied.map_err(|source| VcsError::Stream {
      command: rendered,
      source,
    })
  }

  fn tags(&self, git_dir: &Path) -> Result<Vec<String>, VcsError> {
    let out = self.run_checked(git_dir, ["tag"])?;
    Ok(out.split_whitespace().map(str::to_string).collect())
  }

  fn format_patch(&self, git_dir: &Path, start: &str, end: &str, out_dir: &Path) -> Result<Vec<PathBuf>, VcsError> {
    let range = format!("{start}..{end}");
    let out = self.run_checked(
      git_dir,
      [
        OsStr::new("format-patch"),
        OsStr::new("--no-renames"),
        OsStr::new(range.as_str()),
        OsStr::new("--output-directory"),
        out_dir.as_os_str(),
      ],
    )?;
    Ok(out.lines().filter(|l| !l.is_empty()).map(PathBuf::from).collect())
  }
}
