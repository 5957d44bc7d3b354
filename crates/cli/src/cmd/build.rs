//! Implementation of the `kiln build` command.
//!
//! Runs the full pipeline for a recipe and prints a summary. Failed secondary
//! builds and smoke checks do not fail the command; they turn the exit code
//! advisory.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use kiln_lib::execute::{BuildOptions, Host, RunReport, SecondaryStatus, run};
use kiln_lib::package::SecondaryKind;
use kiln_lib::platform::{Os, Platform};

use crate::output::{
  OutputFormat, format_duration, print_info, print_item, print_json, print_stat, print_success, print_warning,
  symbols,
};

use super::test::print_checks;
use super::{load_recipe, runtime};

/// Flags of `kiln build`.
#[derive(Debug)]
pub struct BuildArgs {
  pub recipe: PathBuf,
  pub prefix: PathBuf,
  pub jobs: Option<usize>,
  pub verify: bool,
  pub keep_build_root: bool,
  pub platform: Option<Os>,
  pub output: OutputFormat,
}

pub fn cmd_build(args: BuildArgs) -> Result<u8> {
  let spec = load_recipe(&args.recipe)?;

  let platform = match args.platform {
    Some(os) => Platform::with_os(os),
    None => Platform::current().context("Unsupported host platform, pass --platform")?,
  };
  let prefix = std::path::absolute(&args.prefix)
    .with_context(|| format!("Invalid install prefix {}", args.prefix.display()))?;

  let mut options = BuildOptions::new(prefix, platform);
  if let Some(jobs) = args.jobs {
    options.jobs = jobs;
  }
  options.keep_build_root = args.keep_build_root;
  options.verify = args.verify;
  debug!(?options, "build options");

  let host = Host::system();
  let rt = runtime()?;
  let report = match rt.block_on(run(&spec, &options, &host)) {
    Ok(report) => report,
    Err(err) => {
      if !args.keep_build_root && !args.output.is_json() {
        print_info("Re-run with --keep-build-root to inspect the build directory");
      }
      return Err(err).with_context(|| format!("Build of {} failed", spec.full_name()));
    }
  };

  if args.output.is_json() {
    print_json(&report)?;
  } else {
    print_report(&report);
  }

  Ok(u8::try_from(report.exit_code()).unwrap_or(1))
}

fn print_report(report: &RunReport) {
  print_success(&format!(
    "Built {} in {}",
    report.package,
    format_duration(report.elapsed)
  ));
  print_stat("Prefix", &report.prefix.display().to_string());
  print_stat("Platform", &report.platform);
  print_stat(
    "Dependencies",
    &format!(
      "{} ({} build-only)",
      report.dependencies.len(),
      report.dependencies.build_only.len()
    ),
  );
  for resource in &report.resources {
    print_stat(
      "Resource",
      &format!("{} {} {}", resource.name, symbols::ARROW, resource.prefix),
    );
  }
  print_stat("Patches applied", &report.patches_applied.to_string());
  print_stat("Steps run", &report.steps_run.to_string());
  print_stat("Artifacts installed", &report.artifacts_installed.to_string());
  print_stat("Receipt", &report.receipt.display().to_string());
  if let Some(root) = &report.build_root {
    print_stat("Build root", &root.display().to_string());
  }

  if !report.secondary.is_empty() {
    println!();
    println!("Secondary builds:");
    for outcome in &report.secondary {
      let label = format!("{} ({})", outcome.name, kind_label(outcome.kind));
      match &outcome.status {
        SecondaryStatus::Built => print_item(symbols::SUCCESS, &label, None),
        SecondaryStatus::Failed { reason } => print_item(symbols::ERROR, &label, Some(reason)),
      }
    }
  }

  if let Some(verification) = &report.verification {
    println!();
    print_checks(verification);
  }

  let failed = report.failed_secondaries().count();
  if failed > 0 {
    println!();
    print_warning(&format!(
      "{} secondary build(s) failed; the primary install is complete",
      failed
    ));
  }

  if let Some(caveats) = &report.caveats {
    println!();
    println!("Caveats:");
    for line in caveats.trim_end().lines() {
      println!("  {}", line);
    }
  }
}

pub(super) fn kind_label(kind: SecondaryKind) -> &'static str {
  match kind {
    SecondaryKind::Tool => "tool",
    SecondaryKind::Binding => "binding",
  }
}
