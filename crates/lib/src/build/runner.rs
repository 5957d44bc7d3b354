//! Process execution seam.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

/// A fully resolved process launch: nothing is read from the ambient
/// environment once an invocation is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
  /// Human-readable step name, used for logs and errors.
  pub name: String,
  pub program: String,
  pub args: Vec<String>,
  pub cwd: PathBuf,
  pub env: BTreeMap<String, String>,
}

impl Invocation {
  /// The command line as a single display string.
  pub fn command_line(&self) -> String {
    std::iter::once(self.program.as_str())
      .chain(self.args.iter().map(String::as_str))
      .collect::<Vec<_>>()
      .join(" ")
  }
}

/// Result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutput {
  /// Exit code; `None` when the process was killed by a signal.
  pub code: Option<i32>,
  pub stdout: String,
  pub stderr: String,
}

impl StepOutput {
  pub fn success(&self) -> bool {
    self.code == Some(0)
  }

  /// `exit code N` or `signal`, for messages.
  pub fn status(&self) -> String {
    match self.code {
      Some(code) => format!("exit code {}", code),
      None => "termination by signal".to_string(),
    }
  }
}

/// Runs invocations. The real implementation spawns processes; tests
/// substitute recorders.
pub trait StepRunner {
  fn run(&self, invocation: &Invocation) -> impl Future<Output = std::io::Result<StepOutput>>;
}

/// Spawns each invocation with `tokio::process`, with exactly the
/// invocation's environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl StepRunner for ProcessRunner {
  async fn run(&self, invocation: &Invocation) -> std::io::Result<StepOutput> {
    debug!(
      step = %invocation.name,
      command = %invocation.command_line(),
      cwd = %invocation.cwd.display(),
      "spawning process"
    );

    let output = Command::new(&invocation.program)
      .args(&invocation.args)
      .current_dir(&invocation.cwd)
      .env_clear()
      .envs(&invocation.env)
      .stdin(Stdio::null())
      .output()
      .await?;

    Ok(StepOutput {
      code: output.status.code(),
      stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
      stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
  }
}

/// Shell program and flag used for string commands.
///
/// Always the system shell rather than `$SHELL`: interactive shells may
/// source profile files that alter the environment.
pub fn shell() -> (&'static str, &'static str) {
  #[cfg(unix)]
  {
    ("/bin/sh", "-c")
  }

  #[cfg(windows)]
  {
    ("cmd.exe", "/C")
  }
}
