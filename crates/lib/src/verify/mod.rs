//! Post-install smoke checks.
//!
//! Every check runs as its own process in a fresh temporary directory, with
//! `<prefix>/bin` first on `PATH`. A check that names a secondary build in
//! `requires` only runs when that build is known to have succeeded.
//! Failures are reported; nothing is rolled back.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::build::{Invocation, Scope, StepRunner, command};
use crate::package::SmokeCheck;

#[derive(Debug, Error)]
pub enum VerifyError {
  #[error("failed to create a scratch directory: {0}")]
  Scratch(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CheckStatus {
  Passed,
  Failed { reason: String },
  Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckOutcome {
  pub name: String,
  #[serde(flatten)]
  pub status: CheckStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
  pub checks: Vec<CheckOutcome>,
}

impl VerifyReport {
  fn count(&self, pred: impl Fn(&CheckStatus) -> bool) -> usize {
    self.checks.iter().filter(|c| pred(&c.status)).count()
  }

  pub fn passed(&self) -> usize {
    self.count(|s| matches!(s, CheckStatus::Passed))
  }

  pub fn failed(&self) -> usize {
    self.count(|s| matches!(s, CheckStatus::Failed { .. }))
  }

  pub fn skipped(&self) -> usize {
    self.count(|s| matches!(s, CheckStatus::Skipped { .. }))
  }

  pub fn outcome(&self, name: &str) -> Option<&CheckStatus> {
    self.checks.iter().find(|c| c.name == name).map(|c| &c.status)
  }
}

/// Run `checks` against the install described by `scope`.
///
/// `built` holds the secondary builds known to have succeeded.
pub async fn verify(
  checks: &[SmokeCheck],
  scope: &Scope,
  built: &BTreeSet<String>,
  host_env: &BTreeMap<String, String>,
  runner: &impl StepRunner,
) -> Result<VerifyReport, VerifyError> {
  let mut report = VerifyReport::default();
  let env = check_env(host_env, &scope.prefix);

  for check in checks {
    let status = match &check.requires {
      Some(required) if !built.contains(required) => {
        info!(check = %check.name, requires = %required, "skipping smoke check");
        CheckStatus::Skipped {
          reason: format!("secondary build '{}' did not succeed", required),
        }
      }
      _ => run_check(check, scope, &env, runner).await?,
    };

    if let CheckStatus::Failed { reason } = &status {
      warn!(check = %check.name, reason = %reason, "smoke check failed");
    }
    report.checks.push(CheckOutcome {
      name: check.name.clone(),
      status,
    });
  }

  info!(
    passed = report.passed(),
    failed = report.failed(),
    skipped = report.skipped(),
    "verification finished"
  );
  Ok(report)
}

async fn run_check(
  check: &SmokeCheck,
  scope: &Scope,
  env: &BTreeMap<String, String>,
  runner: &impl StepRunner,
) -> Result<CheckStatus, VerifyError> {
  let (program, args) = match command(&check.command, scope) {
    Ok(parts) => parts,
    Err(e) => return Ok(CheckStatus::Failed { reason: e.to_string() }),
  };

  let scratch = tempfile::Builder::new().prefix("kiln-test-").tempdir()?;
  let invocation = Invocation {
    name: check.name.clone(),
    program,
    args,
    cwd: scratch.path().to_path_buf(),
    env: env.clone(),
  };

  info!(check = %check.name, command = %invocation.command_line(), "running smoke check");
  let status = match runner.run(&invocation).await {
    Ok(output) if output.success() => CheckStatus::Passed,
    Ok(output) => {
      let detail = output.stderr.lines().chain(output.stdout.lines()).last().unwrap_or("").trim();
      let reason = if detail.is_empty() {
        output.status()
      } else {
        format!("{}: {}", output.status(), detail)
      };
      CheckStatus::Failed { reason }
    }
    Err(e) => CheckStatus::Failed {
      reason: format!("failed to launch: {}", e),
    },
  };
  Ok(status)
}

fn check_env(host_env: &BTreeMap<String, String>, prefix: &str) -> BTreeMap<String, String> {
  let mut env = host_env.clone();
  let bin = std::path::Path::new(prefix).join("bin").display().to_string();
  let path = match env.get("PATH").filter(|p| !p.is_empty()) {
    Some(existing) => format!("{}{}{}", bin, if cfg!(windows) { ";" } else { ":" }, existing),
    None => bin,
  };
  env.insert("PATH".to_string(), path);
  env
}
