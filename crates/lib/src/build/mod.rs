//! Build orchestration.
//!
//! A [`Builder`] runs ordered step lists strictly one after another. Each
//! step gets its own [`Invocation`], computed fresh from the host
//! environment, the recipe's `PATH` prefix and `env`, `MAKEFLAGS` for the
//! scope's job count, and the step's own `env`, with every placeholder
//! substituted. Queries are evaluated right before the first step, install
//! list or smoke check that references them and cached for the rest of the run.
//!
//! # Submodules
//!
//! - [`context`] - placeholder values per scope
//! - [`runner`] - the process execution seam

pub mod context;
pub mod runner;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::package::{BuildStep, CommandLine, Query};
use crate::placeholder::{PlaceholderError, referenced_queries, substitute};
use crate::platform::Platform;

pub use context::Scope;
pub use runner::{Invocation, ProcessRunner, StepOutput, StepRunner, shell};

#[derive(Debug, Error)]
pub enum BuildError {
  #[error("step '{step}' failed with {status} (log: {})", log.display())]
  StepFailed { step: String, status: String, log: PathBuf },

  #[error("query '{query}' needed by step '{step}' failed: {reason}")]
  QueryFailed { query: String, step: String, reason: String },

  #[error("step '{step}': {source}")]
  Placeholder {
    step: String,
    #[source]
    source: PlaceholderError,
  },

  #[error("failed to launch step '{step}': {source}")]
  Spawn {
    step: String,
    #[source]
    source: std::io::Error,
  },

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}

impl BuildError {
  /// Name of the step the error belongs to.
  pub fn step(&self) -> Option<&str> {
    match self {
      BuildError::StepFailed { step, .. }
      | BuildError::QueryFailed { step, .. }
      | BuildError::Placeholder { step, .. }
      | BuildError::Spawn { step, .. } => Some(step),
      BuildError::Io(_) => None,
    }
  }
}

/// One step list plus the environment that applies to all of it.
#[derive(Debug, Clone, Copy)]
pub struct Sequence<'a> {
  /// Label used in logs, e.g. `primary` or `secondary swig-py`.
  pub label: &'a str,
  pub steps: &'a [BuildStep],
  /// Recipe or resource `env`, applied beneath each step's own.
  pub env: &'a BTreeMap<String, String>,
}

/// A step that ran to success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
  pub name: String,
  pub log: PathBuf,
  pub elapsed: Duration,
}

/// Runs step sequences for one pipeline invocation.
pub struct Builder<'a, R> {
  runner: &'a R,
  platform: Platform,
  host_env: BTreeMap<String, String>,
  path_prepend: &'a [String],
  queries: &'a [Query],
  evaluated: BTreeMap<String, String>,
  log_dir: PathBuf,
  logged: usize,
}

impl<'a, R: StepRunner> Builder<'a, R> {
  pub fn new(
    runner: &'a R,
    platform: Platform,
    host_env: BTreeMap<String, String>,
    path_prepend: &'a [String],
    queries: &'a [Query],
    log_dir: PathBuf,
  ) -> Self {
    Self {
      runner,
      platform,
      host_env,
      path_prepend,
      queries,
      evaluated: BTreeMap::new(),
      log_dir,
      logged: 0,
    }
  }

  /// Queries evaluated so far, by name.
  pub fn evaluated_queries(&self) -> &BTreeMap<String, String> {
    &self.evaluated
  }

  /// Run every step of `sequence` in order, stopping at the first failure.
  pub async fn run(&mut self, sequence: Sequence<'_>, scope: &mut Scope) -> Result<Vec<StepRecord>, BuildError> {
    info!(scope = %sequence.label, steps = sequence.steps.len(), jobs = scope.jobs(), "running build steps");
    let mut records = Vec::new();

    for step in sequence.steps {
      let name = step.display_name();
      if !self.platform.matches(&step.platforms) {
        debug!(step = %name, platform = %self.platform, "skipping step for other platform");
        continue;
      }

      self.prepare_queries(step, sequence.env, scope, &name).await?;
      let invocation = self.invocation(step, sequence.env, scope, &name)?;
      records.push(self.execute(invocation).await?);
    }

    Ok(records)
  }

  /// Evaluate the queries `step` (or the env beneath it) references that
  /// have not run yet, and expose all of them to `scope`.
  async fn prepare_queries(
    &mut self,
    step: &BuildStep,
    env: &BTreeMap<String, String>,
    scope: &mut Scope,
    step_name: &str,
  ) -> Result<(), BuildError> {
    let templates: Vec<&str> = step
      .template_strings()
      .into_iter()
      .chain(env.values().map(String::as_str))
      .chain(self.path_prepend.iter().map(String::as_str))
      .collect();
    self.resolve_queries(templates, scope, step_name).await
  }

  /// Make every query referenced by `templates` available in `scope`,
  /// evaluating the ones that have not run yet.
  ///
  /// Install artifacts and smoke checks use this too, since they may name a
  /// query no build step needed.
  pub async fn resolve_queries<'t>(
    &mut self,
    templates: impl IntoIterator<Item = &'t str>,
    scope: &mut Scope,
    user: &str,
  ) -> Result<(), BuildError> {
    let needed = referenced_queries(templates).map_err(|source| BuildError::Placeholder {
      step: user.to_string(),
      source,
    })?;

    for name in needed {
      if !self.evaluated.contains_key(&name) {
        let value = self.evaluate_query(&name, scope, user).await?;
        self.evaluated.insert(name.clone(), value);
      }
      if let Some(value) = self.evaluated.get(&name) {
        scope.queries.insert(name, value.clone());
      }
    }
    Ok(())
  }

  async fn evaluate_query(&self, name: &str, scope: &Scope, step_name: &str) -> Result<String, BuildError> {
    let failed = |reason: String| BuildError::QueryFailed {
      query: name.to_string(),
      step: step_name.to_string(),
      reason,
    };

    let query = self
      .queries
      .iter()
      .find(|q| q.name == name)
      .ok_or_else(|| failed("query is not declared".to_string()))?;

    // Queries see the host environment and PATH prefix, never the recipe env.
    let mut env = self.host_env.clone();
    self.prepend_path(&mut env, scope).map_err(|e| failed(e.to_string()))?;
    let (program, args) = command(&query.command, scope).map_err(|e| failed(e.to_string()))?;
    let invocation = Invocation {
      name: format!("query:{}", name),
      program,
      args,
      cwd: self.working_dir(None, scope).map_err(|e| failed(e.to_string()))?,
      env,
    };

    info!(query = %name, command = %invocation.command_line(), "evaluating query");
    let output = self
      .runner
      .run(&invocation)
      .await
      .map_err(|e| failed(e.to_string()))?;
    if !output.success() {
      return Err(failed(format!("{}: {}", output.status(), output.stderr.trim())));
    }

    let mut value = output.stdout.trim().to_string();
    if value.is_empty() {
      return Err(failed("query printed nothing".to_string()));
    }
    if let Some(join) = &query.join {
      value = Path::new(&value).join(join).display().to_string();
    }

    if query.must_exist && !Path::new(&value).exists() {
      warn!(query = %name, path = %value, "query result does not exist");
    }
    debug!(query = %name, value = %value, "query evaluated");
    Ok(value)
  }

  /// Compute the complete invocation for `step` in `scope`.
  pub fn invocation(
    &self,
    step: &BuildStep,
    env: &BTreeMap<String, String>,
    scope: &Scope,
    step_name: &str,
  ) -> Result<Invocation, BuildError> {
    let placeholder = |source| BuildError::Placeholder {
      step: step_name.to_string(),
      source,
    };

    let mut vars = self.host_env.clone();
    self.prepend_path(&mut vars, scope).map_err(placeholder)?;
    for (key, value) in env {
      vars.insert(key.clone(), substitute(value, scope).map_err(placeholder)?);
    }
    vars.insert("MAKEFLAGS".to_string(), format!("-j{}", scope.jobs()));
    for (key, value) in &step.env {
      vars.insert(key.clone(), substitute(value, scope).map_err(placeholder)?);
    }

    let (program, args) = command(&step.command, scope).map_err(placeholder)?;

    Ok(Invocation {
      name: step_name.to_string(),
      program,
      args,
      cwd: self.working_dir(step.cwd.as_deref(), scope).map_err(placeholder)?,
      env: vars,
    })
  }

  fn prepend_path(&self, vars: &mut BTreeMap<String, String>, scope: &Scope) -> Result<(), PlaceholderError> {
    if self.path_prepend.is_empty() {
      return Ok(());
    }

    let mut entries = Vec::with_capacity(self.path_prepend.len() + 1);
    for dir in self.path_prepend {
      entries.push(substitute(dir, scope)?);
    }
    if let Some(existing) = vars.get("PATH").filter(|p| !p.is_empty()) {
      entries.push(existing.clone());
    }
    vars.insert("PATH".to_string(), entries.join(PATH_SEPARATOR));
    Ok(())
  }

  fn working_dir(&self, cwd: Option<&str>, scope: &Scope) -> Result<PathBuf, PlaceholderError> {
    let base = match &scope.src {
      Some(src) => PathBuf::from(src),
      None => PathBuf::from(&scope.prefix),
    };
    match cwd {
      // An absolute cwd (e.g. under $${prefix}) replaces the base.
      Some(dir) => Ok(base.join(substitute(dir, scope)?)),
      None => Ok(base),
    }
  }

  async fn execute(&mut self, invocation: Invocation) -> Result<StepRecord, BuildError> {
    self.logged += 1;
    tokio::fs::create_dir_all(&self.log_dir).await?;
    let log = self
      .log_dir
      .join(format!("{:02}-{}.log", self.logged, log_name(&invocation.name)));

    info!(step = %invocation.name, command = %invocation.command_line(), "running step");
    let started = Instant::now();
    let output = self.runner.run(&invocation).await.map_err(|source| BuildError::Spawn {
      step: invocation.name.clone(),
      source,
    })?;
    let elapsed = started.elapsed();

    let transcript = format!(
      "$ {}\n# cwd: {}\n{}{}",
      invocation.command_line(),
      invocation.cwd.display(),
      output.stdout,
      output.stderr
    );
    tokio::fs::write(&log, transcript).await?;

    if !output.success() {
      warn!(step = %invocation.name, status = %output.status(), log = %log.display(), "step failed");
      return Err(BuildError::StepFailed {
        step: invocation.name,
        status: output.status(),
        log,
      });
    }

    debug!(step = %invocation.name, elapsed = ?elapsed, "step finished");
    Ok(StepRecord {
      name: invocation.name,
      log,
      elapsed,
    })
  }
}

#[cfg(unix)]
const PATH_SEPARATOR: &str = ":";
#[cfg(windows)]
const PATH_SEPARATOR: &str = ";";

/// Substitute placeholders in a command and split it into program and args.
pub fn command(line: &CommandLine, scope: &impl crate::placeholder::Resolver) -> Result<(String, Vec<String>), PlaceholderError> {
  match line {
    CommandLine::Args(parts) => {
      let mut resolved = Vec::with_capacity(parts.len());
      for part in parts {
        resolved.push(substitute(part, scope)?);
      }
      let mut iter = resolved.into_iter();
      let program = iter.next().unwrap_or_default();
      Ok((program, iter.collect()))
    }
    CommandLine::Shell(text) => {
      let (sh, flag) = shell();
      Ok((sh.to_string(), vec![flag.to_string(), substitute(text, scope)?]))
    }
  }
}

/// File-name-safe version of a step name.
fn log_name(name: &str) -> String {
  let cleaned: String = name
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
    .take(40)
    .collect();
  let trimmed = cleaned.trim_matches('-');
  if trimmed.is_empty() { "step".to_string() } else { trimmed.to_string() }
}
