//! The build pipeline.
//!
//! resolve → fetch → patch → resource builds → primary build → secondary
//! builds → install → receipt → verify. Fatal failures stop the run where
//! they happen; nothing already installed is rolled back.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{info, warn};

use crate::build::{BuildError, Builder, Scope, Sequence, StepRunner};
use crate::fetch::{Downloader, FetchedArchive, Fetcher, extract_archive};
use crate::install::{
  InstallRoots, Receipt, ReceiptResource, ReceiptSource, install_artifacts, read_receipt, write_receipt,
};
use crate::package::{PackageSpec, Resource, SmokeCheck, SourceLocation};
use crate::platform::{Os, Platform};
use crate::patch::apply_patches;
use crate::placeholder::substitute;
use crate::resolve::{HostProbe, Resolution, ResolveError, resolve};
use crate::verify::{VerifyReport, verify};

use super::types::{
  BuildOptions, Host, Phase, PipelineError, ResourceOutcome, RunReport, SecondaryOutcome, SecondaryStatus,
};

/// A resource after fetching: where it unpacked and where it installs.
struct StagedResource<'a> {
  resource: &'a Resource,
  archive: FetchedArchive,
  src: PathBuf,
  prefix: String,
}

/// Build, install and verify `spec`.
pub async fn run<P, D, R>(
  spec: &PackageSpec,
  options: &BuildOptions,
  host: &Host<P, D, R>,
) -> Result<RunReport, PipelineError>
where
  P: HostProbe,
  D: Downloader,
  R: StepRunner,
{
  let started = Instant::now();
  let name = spec.full_name();
  info!(package = %name, prefix = %options.prefix.display(), platform = %options.platform, "starting build");

  // Resolve
  let resolution = resolve_dependencies(spec, &host.probe)?;

  let build_root = tempfile::Builder::new()
    .prefix(&format!("kiln-{}-", name))
    .disable_cleanup(options.keep_build_root)
    .tempdir()
    .map_err(|e| PipelineError::new(Phase::Fetch, None, e))?;
  let root = build_root.path();
  info!(build_root = %root.display(), "created build root");

  let prefix = options.prefix.display().to_string();
  let base_scope = Scope::new(&options.prefix, &spec.package.version, options.jobs).with_deps(&resolution);

  // Fetch every archive before unpacking anything.
  let fetcher = Fetcher::new(&host.downloader, options.cache_dir.clone());
  let primary_archive = fetch_one(&fetcher, &spec.source, root, &spec.package.name).await?;
  let mut resource_archives = Vec::with_capacity(spec.resources.len());
  for resource in &spec.resources {
    resource_archives.push((resource, fetch_one(&fetcher, &resource.source, root, &resource.name).await?));
  }

  let src = extract_archive(&primary_archive.path, &root.join("source"))
    .await
    .map_err(|e| PipelineError::new(Phase::Fetch, Some(spec.package.name.clone()), e))?;

  let mut staged = Vec::with_capacity(resource_archives.len());
  let mut resource_prefixes = BTreeMap::new();
  for (resource, archive) in resource_archives {
    let dir = root.join("resources").join(&resource.name);
    let resource_src = extract_archive(&archive.path, &dir)
      .await
      .map_err(|e| PipelineError::new(Phase::Fetch, Some(resource.name.clone()), e))?;
    let resource_prefix = substitute(&resource.prefix_template(), &base_scope)
      .map_err(|e| PipelineError::new(Phase::Resource, Some(resource.name.clone()), e))?;
    resource_prefixes.insert(resource.name.clone(), resource_prefix.clone());
    staged.push(StagedResource {
      resource,
      archive,
      src: resource_src,
      prefix: resource_prefix,
    });
  }

  // Patch resources, then the primary tree.
  let mut patches_applied = 0;
  for item in &staged {
    let summary = apply_patches(&item.src, &item.resource.patches, &options.platform)
      .map_err(|e| PipelineError::new(Phase::Patch, Some(item.resource.name.clone()), e))?;
    patches_applied += summary.applied;
  }
  let summary = apply_patches(&src, &spec.patches, &options.platform)
    .map_err(|e| PipelineError::new(Phase::Patch, Some(spec.package.name.clone()), e))?;
  patches_applied += summary.applied;

  let primary_scope = base_scope.with_resources(resource_prefixes).with_src(&src);
  let mut builder = Builder::new(
    &host.runner,
    options.platform,
    host.env.clone(),
    &spec.path_prepend,
    &spec.queries,
    root.join("logs"),
  );
  let mut steps_run = 0;

  // Each resource completes its cycle into its own prefix before any parent step.
  let mut resources = Vec::with_capacity(staged.len());
  for item in &staged {
    let mut scope = primary_scope.rebased(&item.prefix, &item.src);
    let label = format!("resource {}", item.resource.name);
    let sequence = Sequence {
      label: &label,
      steps: &item.resource.steps,
      env: &item.resource.env,
    };
    let records = builder
      .run(sequence, &mut scope)
      .await
      .map_err(|e| build_failure(Phase::Resource, &item.resource.name, e))?;
    steps_run += records.len();
    info!(resource = %item.resource.name, prefix = %item.prefix, "resource installed");
    resources.push(ResourceOutcome {
      name: item.resource.name.clone(),
      prefix: item.prefix.clone(),
    });
  }

  // Primary build: fatal on the first failing step.
  let mut scope = primary_scope.clone();
  let sequence = Sequence {
    label: "primary",
    steps: &spec.steps,
    env: &spec.env,
  };
  let records = builder
    .run(sequence, &mut scope)
    .await
    .map_err(|e| build_failure(Phase::Build, &spec.package.name, e))?;
  steps_run += records.len();

  // Secondary builds: each independent, failures collected.
  let roots = InstallRoots {
    src: &src,
    prefix: &options.prefix,
  };
  let mut secondary = Vec::with_capacity(spec.secondary.len());
  for build in &spec.secondary {
    let jobs = if build.serial { 1 } else { options.jobs };
    let mut scope = primary_scope.clone().with_jobs(jobs);
    let label = format!("secondary {}", build.name);
    let sequence = Sequence {
      label: &label,
      steps: &build.steps,
      env: &spec.env,
    };

    let status = match builder.run(sequence, &mut scope).await {
      Ok(records) => {
        steps_run += records.len();
        let templates = build.install.iter().flat_map(|a| a.template_strings());
        let installed = match builder.resolve_queries(templates, &mut scope, &label).await {
          Ok(()) => install_artifacts(&build.install, roots, &scope).map_err(|e| e.to_string()),
          Err(e) => Err(e.to_string()),
        };
        match installed {
          Ok(_) => SecondaryStatus::Built,
          Err(reason) => SecondaryStatus::Failed { reason },
        }
      }
      Err(e) => SecondaryStatus::Failed { reason: e.to_string() },
    };

    match &status {
      SecondaryStatus::Built => info!(secondary = %build.name, "secondary build succeeded"),
      SecondaryStatus::Failed { reason } => warn!(secondary = %build.name, reason = %reason, "secondary build failed"),
    }
    secondary.push(SecondaryOutcome {
      name: build.name.clone(),
      kind: build.kind,
      status,
    });
  }

  // Top-level install artifacts are fatal.
  let mut install_scope = primary_scope.clone();
  install_scope.queries = builder.evaluated_queries().clone();
  builder
    .resolve_queries(
      spec.install.iter().flat_map(|a| a.template_strings()),
      &mut install_scope,
      "install",
    )
    .await
    .map_err(|e| PipelineError::new(Phase::Install, None, e))?;
  let artifacts_installed = install_artifacts(&spec.install, roots, &install_scope)
    .map_err(|e| PipelineError::new(Phase::Install, None, e))?;

  let built: BTreeSet<String> = secondary
    .iter()
    .filter(|s| s.status == SecondaryStatus::Built)
    .map(|s| s.name.clone())
    .collect();

  let mut receipt = Receipt::new(spec, &resolution, &options.platform.triple());
  if let Some(url) = &primary_archive.url {
    receipt.source.url = url.clone();
  }
  receipt.resources = staged
    .iter()
    .map(|item| ReceiptResource {
      name: item.resource.name.clone(),
      prefix: item.prefix.clone(),
      source: ReceiptSource {
        url: item.archive.url.clone().unwrap_or_else(|| item.resource.source.url.clone()),
        sha256: item.archive.sha256.clone(),
      },
    })
    .collect();
  receipt.secondary_built = built.iter().cloned().collect();
  receipt.secondary_failed = secondary
    .iter()
    .filter(|s| s.status != SecondaryStatus::Built)
    .map(|s| s.name.clone())
    .collect();
  let receipt_path =
    write_receipt(&options.prefix, &receipt).map_err(|e| PipelineError::new(Phase::Install, None, e))?;

  // Verify against the installed prefix, outside the build tree.
  let verification = if options.verify {
    let mut check_scope = Scope::new(&options.prefix, &spec.package.version, options.jobs)
      .with_deps(&resolution)
      .with_resources(primary_scope.resources.clone());
    check_scope.queries = builder.evaluated_queries().clone();
    resolve_check_queries(&mut builder, &spec.test, &built, &mut check_scope).await;
    Some(
      verify(&spec.test, &check_scope, &built, &host.env, &host.runner)
        .await
        .map_err(|e| PipelineError::new(Phase::Verify, None, e))?,
    )
  } else {
    None
  };

  let kept = options.keep_build_root.then(|| root.to_path_buf());
  drop(build_root);

  let report = RunReport {
    package: name,
    prefix: PathBuf::from(prefix),
    platform: options.platform.triple(),
    dependencies: resolution,
    resources,
    patches_applied,
    steps_run,
    secondary,
    artifacts_installed,
    receipt: receipt_path,
    verification,
    build_root: kept,
    caveats: render_caveats(spec, &options.prefix),
    elapsed: started.elapsed(),
  };
  info!(package = %report.package, exit_code = report.exit_code(), elapsed = ?report.elapsed, "build finished");
  Ok(report)
}

/// The recipe's caveats with `$${prefix}` and `$${version}` filled in.
pub fn render_caveats(spec: &PackageSpec, prefix: &Path) -> Option<String> {
  let caveats = spec.caveats.as_deref()?;
  let scope = Scope::new(prefix, &spec.package.version, 1);
  match substitute(caveats, &scope) {
    Ok(text) => Some(text),
    Err(e) => {
      warn!(error = %e, "leaving caveats unsubstituted");
      Some(caveats.to_string())
    }
  }
}

/// Download and verify every source of `spec` into `cache_dir`.
pub async fn fetch_sources(
  spec: &PackageSpec,
  downloader: &impl Downloader,
  cache_dir: &Path,
) -> Result<Vec<FetchedArchive>, PipelineError> {
  let fetcher = Fetcher::new(downloader, Some(cache_dir.to_path_buf()));
  let mut fetched = vec![fetch_one(&fetcher, &spec.source, cache_dir, &spec.package.name).await?];
  for resource in &spec.resources {
    fetched.push(fetch_one(&fetcher, &resource.source, cache_dir, &resource.name).await?);
  }
  Ok(fetched)
}

/// Run the smoke checks of `spec` against an existing install.
///
/// Secondary outcomes come from the install receipt; without one every
/// declared secondary build is assumed to have succeeded.
pub async fn test_install<P, D, R>(
  spec: &PackageSpec,
  prefix: &Path,
  host: &Host<P, D, R>,
) -> Result<VerifyReport, PipelineError>
where
  P: HostProbe,
  D: Downloader,
  R: StepRunner,
{
  let resolution = resolve_dependencies(spec, &host.probe)?;
  let receipt = read_receipt(prefix).map_err(|e| PipelineError::new(Phase::Verify, None, e))?;

  let built: BTreeSet<String> = match &receipt {
    Some(receipt) => receipt.secondary_built.iter().cloned().collect(),
    None => {
      warn!(prefix = %prefix.display(), "no install receipt, assuming every secondary build succeeded");
      spec.secondary.iter().map(|s| s.name.clone()).collect()
    }
  };

  let scope = Scope::new(prefix, &spec.package.version, 1).with_deps(&resolution);
  let mut resources = BTreeMap::new();
  for resource in &spec.resources {
    let resource_prefix = substitute(&resource.prefix_template(), &scope)
      .map_err(|e| PipelineError::new(Phase::Verify, Some(resource.name.clone()), e))?;
    resources.insert(resource.name.clone(), resource_prefix);
  }
  let mut scope = scope.with_resources(resources);

  // Only queries run here, so the platform gates nothing.
  let platform = Platform::current().unwrap_or_else(|| Platform::with_os(Os::Linux));
  let scratch = tempfile::Builder::new()
    .prefix("kiln-test-")
    .tempdir()
    .map_err(|e| PipelineError::new(Phase::Verify, None, e))?;
  let mut builder = Builder::new(
    &host.runner,
    platform,
    host.env.clone(),
    &spec.path_prepend,
    &spec.queries,
    scratch.path().join("logs"),
  );
  resolve_check_queries(&mut builder, &spec.test, &built, &mut scope).await;

  verify(&spec.test, &scope, &built, &host.env, &host.runner)
    .await
    .map_err(|e| PipelineError::new(Phase::Verify, None, e))
}

fn resolve_dependencies(spec: &PackageSpec, probe: &impl HostProbe) -> Result<Resolution, PipelineError> {
  resolve(&spec.dependencies, probe).map_err(|e| {
    let step = match &e {
      ResolveError::MissingDependency { name, .. } | ResolveError::InvalidRequirement { name, .. } => name.clone(),
    };
    PipelineError::new(Phase::Resolve, Some(step), e)
  })
}

async fn fetch_one<D: Downloader>(
  fetcher: &Fetcher<D>,
  source: &SourceLocation,
  work_dir: &Path,
  label: &str,
) -> Result<FetchedArchive, PipelineError> {
  fetcher
    .fetch(source, work_dir)
    .await
    .map_err(|e| PipelineError::new(Phase::Fetch, Some(label.to_string()), e))
}

/// Evaluate the queries of every check that will run. A query that fails
/// leaves its placeholder unresolved, which fails only that check.
async fn resolve_check_queries<R: StepRunner>(
  builder: &mut Builder<'_, R>,
  checks: &[SmokeCheck],
  built: &BTreeSet<String>,
  scope: &mut Scope,
) {
  for check in checks {
    if check.requires.as_ref().is_some_and(|r| !built.contains(r)) {
      continue;
    }
    if let Err(e) = builder.resolve_queries(check.command.parts(), scope, &check.name).await {
      warn!(check = %check.name, error = %e, "query for smoke check failed");
    }
  }
}

fn build_failure(phase: Phase, scope: &str, err: BuildError) -> PipelineError {
  let step = err.step().map(str::to_string).unwrap_or_else(|| scope.to_string());
  PipelineError::new(phase, Some(step), err)
}
