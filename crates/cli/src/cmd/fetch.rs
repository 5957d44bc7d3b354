//! Implementation of the `kiln fetch` command.

use std::path::Path;

use anyhow::{Context, Result};

use kiln_lib::execute::{Host, fetch_sources};
use kiln_lib::platform::paths::download_cache_dir;

use crate::output::{print_item, print_stat, print_success, symbols};

use super::{load_recipe, runtime};

/// Download every source of a recipe into the shared cache.
pub fn cmd_fetch(recipe: &Path) -> Result<u8> {
  let spec = load_recipe(recipe)?;
  let cache_dir = download_cache_dir();

  let host = Host::system();
  let rt = runtime()?;
  let fetched = rt
    .block_on(fetch_sources(&spec, &host.downloader, &cache_dir))
    .with_context(|| format!("Fetching sources of {} failed", spec.full_name()))?;

  print_success(&format!("Fetched {} archive(s) for {}", fetched.len(), spec.full_name()));
  print_stat("Cache", &cache_dir.display().to_string());
  for archive in &fetched {
    let name = archive
      .path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default();
    let detail = match &archive.url {
      Some(url) => format!("downloaded from {}", url),
      None => "cached".to_string(),
    };
    print_item(symbols::SUCCESS, &name, Some(&detail));
  }

  Ok(0)
}
