//! Placeholder values for one build scope.

use std::collections::BTreeMap;
use std::path::Path;

use crate::placeholder::{PlaceholderError, Resolver};
use crate::resolve::Resolution;

/// Values visible to placeholders in a scope: the primary build, one
/// resource, one secondary build, or the smoke checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
  pub prefix: String,
  /// Source root; absent for smoke checks, which run outside the build tree.
  pub src: Option<String>,
  pub version: String,
  /// Set only through `new`/`with_jobs` so `$${jobs}` and `MAKEFLAGS` agree.
  jobs: usize,
  jobs_text: String,
  pub resources: BTreeMap<String, String>,
  pub deps: BTreeMap<String, String>,
  pub queries: BTreeMap<String, String>,
}

impl Scope {
  pub fn new(prefix: &Path, version: &str, jobs: usize) -> Self {
    let jobs = jobs.max(1);
    Self {
      prefix: prefix.display().to_string(),
      version: version.to_string(),
      jobs,
      jobs_text: jobs.to_string(),
      ..Default::default()
    }
  }

  pub fn with_src(mut self, src: &Path) -> Self {
    self.src = Some(src.display().to_string());
    self
  }

  pub fn with_deps(mut self, resolution: &Resolution) -> Self {
    self.deps = resolution
      .runtime
      .iter()
      .chain(&resolution.build_only)
      .map(|d| (d.name.clone(), d.location.display().to_string()))
      .collect();
    self
  }

  pub fn with_resources(mut self, resources: BTreeMap<String, String>) -> Self {
    self.resources = resources;
    self
  }

  pub fn jobs(&self) -> usize {
    self.jobs
  }

  /// Same scope with a different job count.
  pub fn with_jobs(mut self, jobs: usize) -> Self {
    self.jobs = jobs.max(1);
    self.jobs_text = self.jobs.to_string();
    self
  }

  /// Same scope rooted at another prefix and source tree, as used for a resource.
  pub fn rebased(&self, prefix: &str, src: &Path) -> Self {
    Self {
      prefix: prefix.to_string(),
      src: Some(src.display().to_string()),
      ..self.clone()
    }
  }
}

impl Resolver for Scope {
  fn resolve_prefix(&self) -> Result<&str, PlaceholderError> {
    Ok(&self.prefix)
  }

  fn resolve_src(&self) -> Result<&str, PlaceholderError> {
    self.src.as_deref().ok_or(PlaceholderError::Unavailable("src"))
  }

  fn resolve_version(&self) -> Result<&str, PlaceholderError> {
    Ok(&self.version)
  }

  fn resolve_jobs(&self) -> Result<&str, PlaceholderError> {
    Ok(&self.jobs_text)
  }

  fn resolve_resource(&self, name: &str) -> Result<&str, PlaceholderError> {
    self
      .resources
      .get(name)
      .map(String::as_str)
      .ok_or_else(|| PlaceholderError::UnresolvedResource(name.to_string()))
  }

  fn resolve_dep(&self, name: &str) -> Result<&str, PlaceholderError> {
    self
      .deps
      .get(name)
      .map(String::as_str)
      .ok_or_else(|| PlaceholderError::UnresolvedDep(name.to_string()))
  }

  fn resolve_query(&self, name: &str) -> Result<&str, PlaceholderError> {
    self
      .queries
      .get(name)
      .map(String::as_str)
      .ok_or_else(|| PlaceholderError::UnresolvedQuery(name.to_string()))
  }
}
