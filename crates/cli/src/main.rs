mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use planex_lib::config::BuildConfig;

/// planex - build-plan compiler for RPM packages
#[derive(Parser)]
#[command(name = "planex")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(flatten)]
  config: ConfigArgs,

  #[command(subcommand)]
  command: Commands,
}

/// Build configuration, shared by every command.
#[derive(Args)]
struct ConfigArgs {
  /// TOML configuration file
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Define a macro (NAME=VALUE); repeatable
  #[arg(short = 'D', long = "define", global = true, value_name = "NAME=VALUE")]
  defines: Vec<String>,

  /// rpmbuild top directory
  #[arg(long, global = true)]
  topdir: Option<PathBuf>,

  /// Distribution tag, e.g. .el7
  #[arg(long, global = true)]
  dist: Option<String>,

  /// Target architecture
  #[arg(long, global = true)]
  arch: Option<String>,
}

impl ConfigArgs {
  fn load(&self) -> Result<BuildConfig> {
    let mut config = match &self.config {
      Some(path) => {
        BuildConfig::load(path).with_context(|| format!("Failed to load config: {}", path.display()))?
      }
      None => BuildConfig::default(),
    };

    if let Some(topdir) = &self.topdir {
      config.topdir = topdir.clone();
    }
    if let Some(dist) = &self.dist {
      config.dist = dist.clone();
    }
    if let Some(arch) = &self.arch {
      config.arch = arch.clone();
    }
    for define in &self.defines {
      config.add_define(define)?;
    }

    Ok(config)
  }
}

#[derive(Subcommand)]
enum Commands {
  /// Emit build rules for a set of spec and link files
  Depend {
    /// Spec/link files, or directories to search for them
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Write rules to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Emit rules even if some inputs could not be loaded
    #[arg(short, long)]
    keep_going: bool,
  },

  /// Rewrite a spec or link file with its resolved download URL
  Parse {
    /// Spec or link file
    src: PathBuf,

    /// Destination file
    dest: PathBuf,

    /// Repository branch, used when no tag is given
    #[arg(long)]
    branch: Option<String>,
  },

  /// Print the RPM-compatible version of a repository
  Describe {
    /// Repository path
    repo: PathBuf,

    /// Commit to describe
    #[arg(default_value = "HEAD")]
    commitish: String,
  },

  /// Create a reproducible source archive from a repository
  Archive {
    /// Repository path
    repo: PathBuf,

    /// Commit to archive
    #[arg(default_value = "HEAD")]
    commitish: String,

    /// Version for the archive name (default: derived from history)
    #[arg(long = "pin-version", value_name = "VERSION")]
    version: Option<String>,

    /// Output directory (default: <topdir>/SOURCES)
    #[arg(short, long)]
    out_dir: Option<PathBuf>,
  },

  /// List the tags of a repository
  Tags {
    /// Repository path
    repo: PathBuf,
  },

  /// Export commits as patches plus a series file
  Patches {
    /// Repository path
    repo: PathBuf,

    /// Exclusive start of the range
    start: String,

    /// Inclusive end of the range
    #[arg(default_value = "HEAD")]
    end: String,

    /// Output directory
    #[arg(short, long, default_value = "patches")]
    out_dir: PathBuf,
  },

  /// Print host-to-container path maps for packages
  Mounts {
    /// Spec files, or directories to search for them
    #[arg(required = true)]
    paths: Vec<PathBuf>,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let filter = if cli.verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let config = cli.config.load()?;

  match cli.command {
    Commands::Depend {
      paths,
      output,
      keep_going,
    } => cmd::cmd_depend(&paths, &config, output.as_deref(), keep_going),
    Commands::Parse { src, dest, branch } => cmd::cmd_parse(&src, &dest, branch.as_deref(), &config),
    Commands::Describe { repo, commitish } => cmd::cmd_describe(&repo, &commitish),
    Commands::Archive {
      repo,
      commitish,
      version,
      out_dir,
    } => {
      let out_dir = out_dir.unwrap_or_else(|| config.topdir.join("SOURCES"));
      cmd::cmd_archive(&repo, &commitish, version.as_deref(), &out_dir)
    }
    Commands::Tags { repo } => cmd::cmd_tags(&repo),
    Commands::Patches {
      repo,
      start,
      end,
      out_dir,
    } => cmd::cmd_patches(&repo, &start, &end, &out_dir),
    Commands::Mounts { paths } => cmd::cmd_mounts(&paths, &config),
  }
}
