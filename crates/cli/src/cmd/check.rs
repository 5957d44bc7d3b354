//! Implementation of the `kiln check` command.

use std::path::Path;

use anyhow::{Context, Result};

use kiln_lib::resolve::{SystemProbe, resolve};

use crate::output::{print_item, print_stat, print_success, symbols};

use super::load_recipe;

/// Validate a recipe and resolve its dependencies against the host.
pub fn cmd_check(recipe: &Path) -> Result<u8> {
  let spec = load_recipe(recipe)?;
  print_success(&format!("Recipe {} is valid", spec.full_name()));
  print_stat("Patches", &spec.patches.len().to_string());
  print_stat("Steps", &spec.steps.len().to_string());
  print_stat("Secondary builds", &spec.secondary.len().to_string());
  print_stat("Smoke checks", &spec.test.len().to_string());

  let resolution =
    resolve(&spec.dependencies, &SystemProbe).context("Dependency resolution failed, nothing would be built")?;

  if !resolution.is_empty() {
    println!();
    println!("Dependencies:");
  }
  for dep in resolution.runtime.iter().chain(&resolution.build_only) {
    let version = dep.version.as_deref().unwrap_or("unknown version");
    let scope = if dep.build_only { ", build only" } else { "" };
    let detail = format!("{} ({}{})", version, dep.location.display(), scope);
    print_item(symbols::SUCCESS, &dep.name, Some(&detail));
  }

  Ok(0)
}
