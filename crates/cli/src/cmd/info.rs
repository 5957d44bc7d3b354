//! Implementation of the `kiln info` command.

use std::path::Path;

use anyhow::Result;
use serde_json::json;

use kiln_lib::execute::render_caveats;
use kiln_lib::package::{Dependency, PackageSpec};

use crate::output::{OutputFormat, print_info, print_item, print_json, print_stat, symbols};

use super::build::kind_label;
use super::load_recipe;

/// Stands in for the prefix in caveats when none is given.
const PREFIX_PLACEHOLDER: &str = "<prefix>";

pub fn cmd_info(recipe: &Path, prefix: Option<&Path>, output: OutputFormat) -> Result<u8> {
  let spec = load_recipe(recipe)?;
  let caveats = render_caveats(&spec, prefix.unwrap_or(Path::new(PREFIX_PLACEHOLDER)));

  if output.is_json() {
    print_json(&summary(&spec, caveats.as_deref()))?;
    return Ok(0);
  }

  print_info(&spec.full_name());
  if let Some(desc) = &spec.package.desc {
    print_stat("Description", desc);
  }
  if let Some(homepage) = &spec.package.homepage {
    print_stat("Homepage", homepage);
  }
  print_stat("Source", &spec.source.url);
  if let Some(mirror) = &spec.source.mirror {
    print_stat("Mirror", mirror);
  }

  if !spec.dependencies.is_empty() {
    println!();
    println!("Dependencies:");
    for dep in &spec.dependencies {
      print_item(symbols::INFO, &dep.name, Some(&requirement(dep)));
    }
  }

  if !spec.resources.is_empty() {
    println!();
    println!("Resources:");
    for resource in &spec.resources {
      let detail = format!("{} {}", symbols::ARROW, resource.prefix_template());
      print_item(symbols::INFO, &resource.name, Some(&detail));
    }
  }

  if !spec.secondary.is_empty() {
    println!();
    println!("Secondary builds:");
    for secondary in &spec.secondary {
      let mut detail = kind_label(secondary.kind).to_string();
      if secondary.serial {
        detail.push_str(", serial");
      }
      print_item(symbols::INFO, &secondary.name, Some(&detail));
    }
  }

  if !spec.test.is_empty() {
    println!();
    println!("Smoke checks:");
    for check in &spec.test {
      let detail = check.requires.as_ref().map(|r| format!("requires {}", r));
      print_item(symbols::INFO, &check.name, detail.as_deref());
    }
  }

  if let Some(caveats) = &caveats {
    println!();
    println!("Caveats:");
    for line in caveats.trim_end().lines() {
      println!("  {}", line);
    }
  }

  Ok(0)
}

fn requirement(dep: &Dependency) -> String {
  let version = dep.version.as_deref().unwrap_or("any version");
  if dep.build_only {
    format!("{}, build only", version)
  } else {
    version.to_string()
  }
}

fn summary(spec: &PackageSpec, caveats: Option<&str>) -> serde_json::Value {
  let dependencies: Vec<_> = spec
    .dependencies
    .iter()
    .map(|d| json!({ "name": d.name, "version": d.version, "build_only": d.build_only }))
    .collect();
  let resources: Vec<_> = spec
    .resources
    .iter()
    .map(|r| json!({ "name": r.name, "url": r.source.url, "prefix": r.prefix_template() }))
    .collect();
  let secondary: Vec<_> = spec
    .secondary
    .iter()
    .map(|s| json!({ "name": s.name, "kind": s.kind, "serial": s.serial }))
    .collect();
  let checks: Vec<_> = spec
    .test
    .iter()
    .map(|c| json!({ "name": c.name, "requires": c.requires }))
    .collect();

  json!({
    "name": spec.package.name,
    "version": spec.package.version,
    "revision": spec.package.revision,
    "desc": spec.package.desc,
    "homepage": spec.package.homepage,
    "source": spec.source,
    "dependencies": dependencies,
    "resources": resources,
    "patches": spec.patches.len(),
    "steps": spec.steps.len(),
    "secondary": secondary,
    "test": checks,
    "caveats": caveats,
  })
}
