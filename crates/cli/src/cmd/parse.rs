//! Implementation of the `planex parse` command.
//!
//! Rewrites a spec file's `Source0` line, or adds a `URL` to a link file,
//! so that both point at the resolved archive-download URL.

use std::path::Path;

use anyhow::{Context, Result, bail};

use planex_lib::config::BuildConfig;
use planex_lib::input::InputKind;
use planex_lib::link::SourceLinkResolver;

use crate::output::{print_success, print_warning};

pub fn cmd_parse(src: &Path, dest: &Path, branch: Option<&str>, config: &BuildConfig) -> Result<()> {
  let resolver = SourceLinkResolver::from_config(config);

  match InputKind::of(src) {
    Some(InputKind::Descriptor) => {
      let url = resolver
        .rewrite_spec(src, dest, branch)
        .with_context(|| format!("Failed to rewrite spec: {}", src.display()))?;
      match url {
        Some(url) => print_success(&format!("{} -> {}", dest.display(), url)),
        None => print_warning(&format!("{} has no Source0 line; copied unchanged", src.display())),
      }
    }
    Some(InputKind::Link) => {
      let url = resolver
        .rewrite_link(src, dest, branch)
        .with_context(|| format!("Failed to rewrite link: {}", src.display()))?;
      print_success(&format!("{} -> {}", dest.display(), url));
    }
    None => bail!("Unsupported file type: {}", src.display()),
  }

  Ok(())
}
