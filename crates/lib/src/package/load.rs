//! Recipe loading and validation.
//!
//! Parsing only checks shape. Validation then rejects recipes that could
//! never run: duplicate names, malformed checksums, regexes or diffs that
//! do not parse, and placeholders pointing at resources, dependencies or queries
//! the recipe never declares.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::placeholder::{self, Placeholder};
use crate::resolve::version::parse_requirement;
use crate::util::hash::{is_sha256_hex, normalize_checksum};

use super::types::{BuildStep, InstallArtifact, Matcher, PackageSpec, PatchOperation, SourceLocation};

/// Errors that can occur while loading a recipe.
#[derive(Debug, Error)]
pub enum LoadError {
  #[error("recipe not found: {0}")]
  NotFound(PathBuf),

  #[error("failed to read recipe {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse recipe: {0}")]
  Parse(#[from] toml::de::Error),

  #[error("invalid recipe: {0}")]
  Invalid(String),
}

/// Read, parse and validate a recipe file.
pub fn load_spec(path: &Path) -> Result<PackageSpec, LoadError> {
  if !path.exists() {
    return Err(LoadError::NotFound(path.to_path_buf()));
  }

  let content = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
    path: path.to_path_buf(),
    source,
  })?;

  debug!(path = %path.display(), "loaded recipe");
  parse_spec(&content)
}

/// Parse and validate recipe text.
pub fn parse_spec(content: &str) -> Result<PackageSpec, LoadError> {
  let spec: PackageSpec = toml::from_str(content)?;
  validate(&spec)?;
  Ok(spec)
}

fn invalid(message: impl Into<String>) -> LoadError {
  LoadError::Invalid(message.into())
}

fn validate(spec: &PackageSpec) -> Result<(), LoadError> {
  if spec.package.name.trim().is_empty() {
    return Err(invalid("package name is empty"));
  }
  if spec.package.version.trim().is_empty() {
    return Err(invalid("package version is empty"));
  }

  validate_source("source", &spec.source)?;

  let names = Names::collect(spec)?;

  for dep in &spec.dependencies {
    if let Some(req) = &dep.version {
      parse_requirement(req).map_err(|e| invalid(format!("dependency '{}': {e}", dep.name)))?;
    }
  }

  for resource in &spec.resources {
    let scope = format!("resource '{}'", resource.name);
    validate_source(&scope, &resource.source)?;
    names.check_template(&scope, &resource.prefix_template())?;
    for value in resource.env.values() {
      names.check_template(&scope, value)?;
    }
    validate_patches(&scope, &resource.patches)?;
    validate_steps(&scope, &resource.steps, &names)?;
  }

  validate_patches("patches", &spec.patches)?;

  for value in spec.env.values().chain(spec.path_prepend.iter()) {
    names.check_template("env", value)?;
  }

  for query in &spec.queries {
    let scope = format!("query '{}'", query.name);
    if query.command.is_empty() {
      return Err(invalid(format!("{scope}: empty command")));
    }
    for part in query.command.parts() {
      names.check_template(&scope, part)?;
      let nested = placeholder::referenced_queries([part]).map_err(|e| invalid(format!("{scope}: {e}")))?;
      if !nested.is_empty() {
        return Err(invalid(format!("{scope}: queries cannot reference other queries")));
      }
    }
  }

  validate_steps("steps", &spec.steps, &names)?;

  for secondary in &spec.secondary {
    let scope = format!("secondary '{}'", secondary.name);
    if secondary.steps.is_empty() {
      return Err(invalid(format!("{scope}: no steps")));
    }
    validate_steps(&scope, &secondary.steps, &names)?;
    validate_artifacts(&scope, &secondary.install, &names)?;
  }

  validate_artifacts("install", &spec.install, &names)?;

  for check in &spec.test {
    let scope = format!("test '{}'", check.name);
    if check.command.is_empty() {
      return Err(invalid(format!("{scope}: empty command")));
    }
    for part in check.command.parts() {
      names.check_template(&scope, part)?;
    }
    if let Some(required) = &check.requires {
      if !names.secondary.contains(required.as_str()) {
        return Err(invalid(format!("{scope}: requires unknown secondary build '{required}'")));
      }
    }
  }

  // Caveats are shown outside any build, where only the prefix is known.
  if let Some(caveats) = &spec.caveats {
    let references = placeholder::references(caveats).map_err(|e| invalid(format!("caveats: {e}")))?;
    if references
      .iter()
      .any(|r| !matches!(r, Placeholder::Prefix | Placeholder::Version))
    {
      return Err(invalid("caveats: only $${prefix} and $${version} are available"));
    }
  }

  Ok(())
}

fn validate_source(scope: &str, source: &SourceLocation) -> Result<(), LoadError> {
  for url in source.urls() {
    if url.trim().is_empty() {
      return Err(invalid(format!("{scope}: empty url")));
    }
  }

  let checksum = normalize_checksum(&source.sha256);
  if checksum.is_empty() || !checksum.chars().all(|c| c.is_ascii_hexdigit()) {
    return Err(invalid(format!("{scope}: sha256 must be hexadecimal")));
  }
  if !is_sha256_hex(&checksum) {
    warn!(scope = %scope, "sha256 is not a full 64-character digest");
  }

  Ok(())
}

fn validate_patches(scope: &str, patches: &[PatchOperation]) -> Result<(), LoadError> {
  for (index, patch) in patches.iter().enumerate() {
    match &patch.matcher {
      Matcher::Regex(pattern) => {
        regex::Regex::new(pattern).map_err(|e| invalid(format!("{scope}: patch {index}: {e}")))?;
      }
      Matcher::Exact(find) if find.is_empty() => {
        return Err(invalid(format!("{scope}: patch {index}: empty find")));
      }
      Matcher::MakeVar(name) if name.trim().is_empty() => {
        return Err(invalid(format!("{scope}: patch {index}: empty make_var")));
      }
      Matcher::Diff { text, strip } => {
        crate::patch::diff::parse(text, *strip).map_err(|e| invalid(format!("{scope}: patch {index}: {e}")))?;
      }
      _ => {}
    }

    if let Some(file) = &patch.file {
      if Path::new(file).is_absolute() {
        return Err(invalid(format!("{scope}: patch {index}: file must be relative")));
      }
    }
  }

  Ok(())
}

fn validate_steps(scope: &str, steps: &[BuildStep], names: &Names) -> Result<(), LoadError> {
  for step in steps {
    if step.command.is_empty() {
      return Err(invalid(format!("{scope}: step with empty command")));
    }
    for template in step.template_strings() {
      names.check_template(scope, template)?;
    }
  }

  Ok(())
}

fn validate_artifacts(scope: &str, artifacts: &[InstallArtifact], names: &Names) -> Result<(), LoadError> {
  for artifact in artifacts {
    for template in artifact.template_strings() {
      names.check_template(scope, template)?;
    }
  }

  Ok(())
}

/// Declared names, used to check placeholder references.
struct Names<'a> {
  dependencies: HashSet<&'a str>,
  resources: HashSet<&'a str>,
  queries: HashSet<&'a str>,
  secondary: HashSet<&'a str>,
}

impl<'a> Names<'a> {
  fn collect(spec: &'a PackageSpec) -> Result<Self, LoadError> {
    unique("test", spec.test.iter().map(|t| t.name.as_str()))?;

    Ok(Self {
      dependencies: unique("dependency", spec.dependencies.iter().map(|d| d.name.as_str()))?,
      resources: unique("resource", spec.resources.iter().map(|r| r.name.as_str()))?,
      queries: unique("query", spec.queries.iter().map(|q| q.name.as_str()))?,
      secondary: unique("secondary build", spec.secondary.iter().map(|s| s.name.as_str()))?,
    })
  }

  fn check_template(&self, scope: &str, template: &str) -> Result<(), LoadError> {
    let references = placeholder::references(template).map_err(|e| invalid(format!("{scope}: {e}")))?;

    for reference in references {
      let (known, kind, name) = match &reference {
        Placeholder::Resource(name) => (self.resources.contains(name.as_str()), "resource", name),
        Placeholder::Dep(name) => (self.dependencies.contains(name.as_str()), "dependency", name),
        Placeholder::Query(name) => (self.queries.contains(name.as_str()), "query", name),
        _ => continue,
      };

      if !known {
        return Err(invalid(format!("{scope}: reference to undeclared {kind} '{name}'")));
      }
    }

    Ok(())
  }
}

fn unique<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> Result<HashSet<&'a str>, LoadError> {
  let mut seen = HashSet::new();
  for name in names {
    if name.trim().is_empty() {
      return Err(invalid(format!("{kind} with empty name")));
    }
    if !seen.insert(name) {
      return Err(invalid(format!("duplicate {kind} '{name}'")));
    }
  }
  Ok(seen)
}
