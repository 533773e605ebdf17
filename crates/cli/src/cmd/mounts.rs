//! Implementation of the `planex mounts` command.
//!
//! Prints one `host:container` volume per package, for starting a build
//! sandbox with each package's checkout in its unpacked source directory.

use std::path::PathBuf;

use anyhow::{Result, bail};

use planex_lib::config::BuildConfig;
use planex_lib::index::load_inputs;
use planex_lib::input::expand_inputs;
use planex_lib::mounts::container_path_maps;

use crate::output::{print_failures, print_warning};

pub fn cmd_mounts(paths: &[PathBuf], config: &BuildConfig) -> Result<()> {
  let files = expand_inputs(paths)?;
  let loaded = load_inputs(&files, &config.macros());

  print_failures(&loaded.failures);
  if loaded.descriptors.is_empty() {
    bail!("No spec files could be loaded");
  }

  for map in container_path_maps(&loaded.descriptors, config) {
    if !map.host.exists() {
      print_warning(&format!("checkout not found: {}", map.host.display()));
    }
    println!("{}", map.volume());
  }

  Ok(())
}
