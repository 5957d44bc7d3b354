//! Dependency resolution.
//!
//! Every declared dependency is probed in order before anything is fetched
//! or built. The first unmet dependency aborts the run; there is no
//! aggregate report. Build-only dependencies are kept apart from runtime
//! ones so the install receipt lists only what the installed package needs.

pub mod probe;
pub mod version;

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::package::Dependency;

pub use probe::{HostProbe, Probed, SystemProbe};

/// Errors that can occur during dependency resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
  /// A declared dependency is absent or too old.
  #[error("missing dependency '{name}': {reason}")]
  MissingDependency { name: String, reason: String },

  /// The recipe's version requirement could not be parsed.
  #[error("invalid version requirement for '{name}': {source}")]
  InvalidRequirement {
    name: String,
    #[source]
    source: semver::Error,
  },
}

/// A dependency found on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedDependency {
  pub name: String,
  pub location: PathBuf,
  pub version: Option<String>,
  pub build_only: bool,
}

/// Outcome of resolving every declared dependency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Resolution {
  pub runtime: Vec<ResolvedDependency>,
  pub build_only: Vec<ResolvedDependency>,
}

impl Resolution {
  pub fn get(&self, name: &str) -> Option<&ResolvedDependency> {
    self.runtime.iter().chain(self.build_only.iter()).find(|d| d.name == name)
  }

  pub fn len(&self) -> usize {
    self.runtime.len() + self.build_only.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Resolve `dependencies` in order, failing on the first unmet one.
pub fn resolve(dependencies: &[Dependency], host: &impl HostProbe) -> Result<Resolution, ResolveError> {
  info!(count = dependencies.len(), "resolving dependencies");

  let mut resolution = Resolution::default();

  for dependency in dependencies {
    let resolved = resolve_one(dependency, host)?;
    debug!(
      name = %resolved.name,
      location = %resolved.location.display(),
      version = ?resolved.version,
      build_only = resolved.build_only,
      "dependency resolved"
    );

    if dependency.build_only {
      resolution.build_only.push(resolved);
    } else {
      resolution.runtime.push(resolved);
    }
  }

  Ok(resolution)
}

fn resolve_one(dependency: &Dependency, host: &impl HostProbe) -> Result<ResolvedDependency, ResolveError> {
  let missing = |reason: String| ResolveError::MissingDependency {
    name: dependency.name.clone(),
    reason,
  };

  let probed = host
    .probe(dependency)
    .ok_or_else(|| missing("not found on host".to_string()))?;

  if let Some(requirement) = &dependency.version {
    let req = version::parse_requirement(requirement).map_err(|source| ResolveError::InvalidRequirement {
      name: dependency.name.clone(),
      source,
    })?;

    match &probed.version {
      Some(found) if req.matches(found) => {}
      Some(found) => return Err(missing(format!("found {found}, requires {requirement}"))),
      None => return Err(missing(format!("version unknown, requires {requirement}"))),
    }
  }

  Ok(ResolvedDependency {
    name: dependency.name.clone(),
    location: probed.location,
    version: probed.version.map(|v| v.to_string()),
    build_only: dependency.build_only,
  })
}
