//! Types shared by the pipeline entry points.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::build::{BuildError, ProcessRunner};
use crate::consts::EXIT_ADVISORY;
use crate::fetch::{FetchError, HttpDownloader};
use crate::install::InstallError;
use crate::package::SecondaryKind;
use crate::patch::PatchError;
use crate::placeholder::PlaceholderError;
use crate::platform::Platform;
use crate::resolve::{ResolveError, Resolution, SystemProbe};
use crate::verify::{VerifyError, VerifyReport};

/// Pipeline phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
  Resolve,
  Fetch,
  Patch,
  Resource,
  Build,
  Install,
  Verify,
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Phase::Resolve => "resolve",
      Phase::Fetch => "fetch",
      Phase::Patch => "patch",
      Phase::Resource => "resource",
      Phase::Build => "build",
      Phase::Install => "install",
      Phase::Verify => "verify",
    };
    f.write_str(name)
  }
}

/// Underlying cause of a pipeline failure.
#[derive(Debug, Error)]
pub enum PhaseError {
  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error(transparent)]
  Patch(#[from] PatchError),

  #[error(transparent)]
  Build(#[from] BuildError),

  #[error(transparent)]
  Install(#[from] InstallError),

  #[error(transparent)]
  Verify(#[from] VerifyError),

  #[error(transparent)]
  Placeholder(#[from] PlaceholderError),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}

/// A fatal failure: the phase and, where there is one, the step that failed.
#[derive(Debug, Error)]
#[error("{phase} phase failed{}: {source}", .step.as_deref().map(|s| format!(" at '{}'", s)).unwrap_or_default())]
pub struct PipelineError {
  pub phase: Phase,
  pub step: Option<String>,
  pub source: PhaseError,
}

impl PipelineError {
  pub fn new(phase: Phase, step: Option<String>, source: impl Into<PhaseError>) -> Self {
    Self {
      phase,
      step,
      source: source.into(),
    }
  }
}

/// Run configuration assembled by the caller.
#[derive(Debug, Clone)]
pub struct BuildOptions {
  pub prefix: PathBuf,
  /// Parallel job count exposed through `MAKEFLAGS` and `$${jobs}`.
  pub jobs: usize,
  /// Verified download cache. `None` keeps downloads inside the build root.
  pub cache_dir: Option<PathBuf>,
  /// Keep the temporary build root after the run.
  pub keep_build_root: bool,
  pub verify: bool,
  /// Platform that patches and steps are gated on.
  pub platform: Platform,
}

impl BuildOptions {
  pub fn new(prefix: PathBuf, platform: Platform) -> Self {
    Self {
      prefix,
      jobs: default_jobs(),
      cache_dir: Some(crate::platform::paths::download_cache_dir()),
      keep_build_root: false,
      verify: true,
      platform,
    }
  }
}

/// Number of CPUs, used as the default job count.
pub fn default_jobs() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

/// Everything the pipeline needs from the outside world.
#[derive(Debug, Clone)]
pub struct Host<P, D, R> {
  pub probe: P,
  pub downloader: D,
  pub runner: R,
  /// Environment every invocation starts from.
  pub env: BTreeMap<String, String>,
}

impl Host<SystemProbe, HttpDownloader, ProcessRunner> {
  /// The real host: `PATH` probing, HTTP downloads, spawned processes.
  pub fn system() -> Self {
    Self {
      probe: SystemProbe,
      downloader: HttpDownloader::new(),
      runner: ProcessRunner,
      env: std::env::vars().collect(),
    }
  }
}

/// Outcome of one secondary build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecondaryOutcome {
  pub name: String,
  pub kind: SecondaryKind,
  #[serde(flatten)]
  pub status: SecondaryStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SecondaryStatus {
  Built,
  Failed { reason: String },
}

/// A vendored resource installed into its own prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceOutcome {
  pub name: String,
  pub prefix: String,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
  pub package: String,
  pub prefix: PathBuf,
  pub platform: String,
  pub dependencies: Resolution,
  pub resources: Vec<ResourceOutcome>,
  pub patches_applied: usize,
  pub steps_run: usize,
  pub secondary: Vec<SecondaryOutcome>,
  pub artifacts_installed: usize,
  pub receipt: PathBuf,
  pub verification: Option<VerifyReport>,
  /// Present when the build root was kept.
  pub build_root: Option<PathBuf>,
  pub caveats: Option<String>,
  #[serde(skip)]
  pub elapsed: Duration,
}

impl RunReport {
  pub fn failed_secondaries(&self) -> impl Iterator<Item = &SecondaryOutcome> {
    self
      .secondary
      .iter()
      .filter(|s| matches!(s.status, SecondaryStatus::Failed { .. }))
  }

  /// `0` when everything succeeded, advisory when the install completed
  /// but a secondary build or a smoke check failed.
  pub fn exit_code(&self) -> i32 {
    let checks_failed = self.verification.as_ref().is_some_and(|v| v.failed() > 0);
    if self.failed_secondaries().next().is_some() || checks_failed {
      EXIT_ADVISORY
    } else {
      0
    }
  }
}
