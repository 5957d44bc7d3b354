//! Smoke checks after install, in-run and standalone.

use kiln_lib::execute::{run, test_install};
use kiln_lib::verify::CheckStatus;

use super::common::*;

#[tokio::test]
async fn checks_of_failed_binding_are_skipped() {
  let ws = Workspace::new();
  let host = host(TableProbe::complete(), downloads(), ScriptedRunner::failing(&["swig-rb"]));

  let report = run(&recipe(), &ws.options(), &host).await.unwrap();

  let verification = report.verification.as_ref().unwrap();
  assert_eq!(verification.outcome("core"), Some(&CheckStatus::Passed));
  assert_eq!(verification.outcome("python-binding"), Some(&CheckStatus::Passed));
  assert!(matches!(verification.outcome("ruby-binding"), Some(CheckStatus::Skipped { .. })));
  assert!(host.runner.find("ruby-binding").is_none());
  assert_eq!(report.exit_code(), 2);
}

#[tokio::test]
async fn failing_check_is_advisory() {
  let ws = Workspace::new();
  let host = host(TableProbe::complete(), downloads(), ScriptedRunner::failing(&["core"]));

  let report = run(&recipe(), &ws.options(), &host).await.unwrap();

  assert_eq!(report.verification.as_ref().unwrap().failed(), 1);
  assert_eq!(report.exit_code(), 2);
}

#[tokio::test]
async fn core_check_runs_against_prefix() {
  let ws = Workspace::new();
  let host = host(TableProbe::complete(), downloads(), ScriptedRunner::default());

  run(&recipe(), &ws.options(), &host).await.unwrap();

  let core = host.runner.find("core").unwrap();
  assert_eq!(core.program, ws.prefix().join("bin/svnadmin").display().to_string());
  assert!(!core.cwd.starts_with(ws.prefix()));
}

#[tokio::test]
async fn no_verify_skips_checks() {
  let ws = Workspace::new();
  let host = host(TableProbe::complete(), downloads(), ScriptedRunner::default());
  let mut options = ws.options();
  options.verify = false;

  let report = run(&recipe(), &options, &host).await.unwrap();

  assert!(report.verification.is_none());
  assert!(host.runner.find("core").is_none());
}

#[tokio::test]
async fn standalone_test_reads_receipt() {
  let ws = Workspace::new();
  let builder = host(TableProbe::complete(), downloads(), ScriptedRunner::failing(&["swig-rb"]));
  run(&recipe(), &ws.options(), &builder).await.unwrap();

  let tester = host(TableProbe::complete(), CannedDownloader::default(), ScriptedRunner::default());
  let report = test_install(&recipe(), &ws.prefix(), &tester).await.unwrap();

  assert_eq!(report.passed(), 2);
  assert_eq!(report.skipped(), 1);
  assert!(tester.downloader.requests().is_empty());
}

#[tokio::test]
async fn standalone_test_without_receipt_runs_everything() {
  let ws = Workspace::new();
  let tester = host(TableProbe::complete(), CannedDownloader::default(), ScriptedRunner::default());

  let report = test_install(&recipe(), &ws.prefix(), &tester).await.unwrap();

  assert_eq!(report.passed(), 3);
}

const SITE_CHECK: &str = r#"
[[queries]]
name = "site"
command = ["python3", "-c", "print('lib/site')"]

[[test]]
name = "site-check"
command = ["test", "-d", "$${prefix}/$${query:site}"]
"#;

fn site_recipe() -> kiln_lib::package::PackageSpec {
  recipe_with(&kiln_lib::util::hash::hash_bytes(&svn_tarball()), SITE_CHECK)
}

#[tokio::test]
async fn check_query_is_evaluated_after_install() {
  let ws = Workspace::new();
  let host = host(
    TableProbe::complete(),
    downloads(),
    ScriptedRunner::default().printing("query:site", "lib/site\n"),
  );

  let report = run(&site_recipe(), &ws.options(), &host).await.unwrap();

  let verification = report.verification.as_ref().unwrap();
  assert_eq!(verification.outcome("site-check"), Some(&CheckStatus::Passed));
  let check = host.runner.find("site-check").unwrap();
  assert_eq!(check.args[1], format!("{}/lib/site", ws.prefix().display()));
  assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn failing_check_query_fails_only_that_check() {
  let ws = Workspace::new();
  let host = host(TableProbe::complete(), downloads(), ScriptedRunner::failing(&["query:site"]));

  let report = run(&site_recipe(), &ws.options(), &host).await.unwrap();

  let verification = report.verification.as_ref().unwrap();
  assert!(matches!(verification.outcome("site-check"), Some(CheckStatus::Failed { .. })));
  assert_eq!(verification.outcome("core"), Some(&CheckStatus::Passed));
  assert!(host.runner.find("site-check").is_none());
  assert_eq!(report.exit_code(), 2);
}

#[tokio::test]
async fn standalone_test_evaluates_check_query() {
  let ws = Workspace::new();
  let tester = host(
    TableProbe::complete(),
    CannedDownloader::default(),
    ScriptedRunner::default().printing("query:site", "lib/site\n"),
  );

  let report = test_install(&site_recipe(), &ws.prefix(), &tester).await.unwrap();

  assert!(tester.runner.find("query:site").is_some());
  let check = tester.runner.find("site-check").unwrap();
  assert_eq!(check.args[1], format!("{}/lib/site", ws.prefix().display()));
  assert_eq!(report.passed(), 4);
}
