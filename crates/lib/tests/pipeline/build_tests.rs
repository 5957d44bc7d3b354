//! Step sequencing across resources, the primary build and secondary builds.

use kiln_lib::consts::EXIT_ADVISORY;
use kiln_lib::execute::{Phase, SecondaryStatus, run};

use super::common::*;

fn position(names: &[String], name: &str) -> usize {
  names
    .iter()
    .position(|n| n == name)
    .unwrap_or_else(|| panic!("{name} never ran: {names:?}"))
}

#[tokio::test]
async fn full_run_orders_phases() {
  let ws = Workspace::new();
  let host = host(TableProbe::complete(), downloads(), ScriptedRunner::default());

  let report = run(&recipe(), &ws.options(), &host).await.unwrap();

  let names = host.runner.names();
  assert!(position(&names, "serf-install") < position(&names, "configure"));
  assert!(position(&names, "make-install") < position(&names, "swig-py"));
  assert!(position(&names, "swig-rb") < position(&names, "core"));
  assert_eq!(report.steps_run, 7);
  assert_eq!(report.patches_applied, 1);
  assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn resource_installs_into_its_own_prefix() {
  let ws = Workspace::new();
  let host = host(TableProbe::complete(), downloads(), ScriptedRunner::default());

  let report = run(&recipe(), &ws.options(), &host).await.unwrap();

  let serf_prefix = ws.prefix().join("libexec/serf").display().to_string();
  assert_eq!(report.resources[0].prefix, serf_prefix);

  let scons = host.runner.find("serf-scons").unwrap();
  assert_eq!(scons.args, vec![format!("PREFIX={}", serf_prefix)]);
  assert!(scons.cwd.ends_with("serf-1.3.9"));

  let configure = host.runner.find("configure").unwrap();
  assert!(configure.args.contains(&format!("--with-serf={}", serf_prefix)));
  assert!(configure.cwd.ends_with("subversion-1.13.0"));
}

#[tokio::test]
async fn resource_failure_blocks_parent_configure() {
  let ws = Workspace::new();
  let host = host(TableProbe::complete(), downloads(), ScriptedRunner::failing(&["serf-scons"]));

  let err = run(&recipe(), &ws.options(), &host).await.unwrap_err();

  assert_eq!(err.phase, Phase::Resource);
  assert_eq!(err.step.as_deref(), Some("serf-scons"));
  assert_eq!(host.runner.names(), vec!["serf-scons"]);
}

#[tokio::test]
async fn primary_failure_blocks_secondary_builds() {
  let ws = Workspace::new();
  let host = host(TableProbe::complete(), downloads(), ScriptedRunner::failing(&["make"]));

  let err = run(&recipe(), &ws.options(), &host).await.unwrap_err();

  assert_eq!(err.phase, Phase::Build);
  assert_eq!(err.step.as_deref(), Some("make"));
  let names = host.runner.names();
  assert!(!names.iter().any(|n| n.starts_with("swig")));
  assert!(!names.contains(&"make-install".to_string()));
}

#[tokio::test]
async fn failed_binding_is_advisory() {
  let ws = Workspace::new();
  let host = host(TableProbe::complete(), downloads(), ScriptedRunner::failing(&["swig-py"]));

  let report = run(&recipe(), &ws.options(), &host).await.unwrap();

  assert_eq!(report.secondary.len(), 2);
  assert!(matches!(report.secondary[0].status, SecondaryStatus::Failed { .. }));
  assert_eq!(report.secondary[1].status, SecondaryStatus::Built);
  assert_eq!(report.exit_code(), EXIT_ADVISORY);

  let receipt: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&report.receipt).unwrap()).unwrap();
  assert_eq!(receipt["secondary_failed"][0], "swig-py");
  assert_eq!(receipt["secondary_built"][0], "swig-rb");
}

#[tokio::test]
async fn serial_secondary_runs_single_job() {
  let ws = Workspace::new();
  let host = host(TableProbe::complete(), downloads(), ScriptedRunner::default());

  run(&recipe(), &ws.options(), &host).await.unwrap();

  assert_eq!(host.runner.find("make").unwrap().env["MAKEFLAGS"], "-j4");
  assert_eq!(host.runner.find("swig-py").unwrap().env["MAKEFLAGS"], "-j4");
  assert_eq!(host.runner.find("swig-rb").unwrap().env["MAKEFLAGS"], "-j1");
}

#[tokio::test]
async fn failed_secondary_install_marks_it_failed() {
  let ws = Workspace::new();
  let extra = r#"
[[secondary]]
name = "javahl"
kind = "binding"

[[secondary.steps]]
name = "javahl"
command = ["make", "javahl"]

[[secondary.install]]
copy = { from = "subversion/bindings/javahl/svn-javahl.jar", to = "share/java" }
"#;
  let host = host(TableProbe::complete(), downloads(), ScriptedRunner::default());
  let spec = recipe_with(&kiln_lib::util::hash::hash_bytes(&svn_tarball()), extra);

  let report = run(&spec, &ws.options(), &host).await.unwrap();

  let javahl = report.secondary.iter().find(|s| s.name == "javahl").unwrap();
  assert!(matches!(javahl.status, SecondaryStatus::Failed { ref reason } if reason.contains("copy")));
  assert_eq!(report.exit_code(), EXIT_ADVISORY);
}

#[tokio::test]
async fn top_level_install_failure_is_fatal() {
  let ws = Workspace::new();
  let extra = r#"
[[install]]
link_glob = { pattern = "lib/svn-python/*", into = "lib/python3/site-packages" }
"#;
  let host = host(TableProbe::complete(), downloads(), ScriptedRunner::default());
  let spec = recipe_with(&kiln_lib::util::hash::hash_bytes(&svn_tarball()), extra);

  let err = run(&spec, &ws.options(), &host).await.unwrap_err();

  assert_eq!(err.phase, Phase::Install);
  assert!(!exists(&ws.prefix().join("INSTALL_RECEIPT.json")));
}

#[tokio::test]
async fn kept_build_root_holds_logs() {
  let ws = Workspace::new();
  let host = host(TableProbe::complete(), downloads(), ScriptedRunner::default());
  let mut options = ws.options();
  options.keep_build_root = true;

  let report = run(&recipe(), &options, &host).await.unwrap();

  let root = report.build_root.expect("build root kept");
  assert!(root.join("logs/01-serf-scons.log").exists());
  assert!(root.join("source/subversion-1.13.0/.kiln-patched").exists());
  assert_eq!(
    std::fs::read_to_string(root.join("source/subversion-1.13.0/configure")).unwrap(),
    "#!/bin/sh\nVERSION=1.13.0\n"
  );
  std::fs::remove_dir_all(root).unwrap();
}

const SITE_QUERY: &str = r#"
[[queries]]
name = "site"
command = ["python3", "-c", "print('lib/site')"]
"#;

#[tokio::test]
async fn query_used_only_by_install_is_evaluated() {
  let ws = Workspace::new();
  let extra = format!(
    r#"{SITE_QUERY}
[[secondary]]
name = "pysite"

[[secondary.steps]]
name = "pysite"
command = ["make", "pysite"]

[[secondary.install]]
remove = {{ path = "$${{query:site}}/stale" }}

[[install]]
remove = {{ path = "$${{query:site}}/old" }}
"#
  );
  std::fs::create_dir_all(ws.prefix().join("lib/site/stale")).unwrap();
  std::fs::create_dir_all(ws.prefix().join("lib/site/old")).unwrap();
  let host = host(
    TableProbe::complete(),
    downloads(),
    ScriptedRunner::default().printing("query:site", "lib/site\n"),
  );
  let spec = recipe_with(&kiln_lib::util::hash::hash_bytes(&svn_tarball()), &extra);

  let report = run(&spec, &ws.options(), &host).await.unwrap();

  let pysite = report.secondary.iter().find(|s| s.name == "pysite").unwrap();
  assert_eq!(pysite.status, SecondaryStatus::Built);
  assert!(!exists(&ws.prefix().join("lib/site/stale")));
  assert!(!exists(&ws.prefix().join("lib/site/old")));
  let runs = host.runner.names().into_iter().filter(|n| n == "query:site").count();
  assert_eq!(runs, 1);
}

#[tokio::test]
async fn failing_install_query_fails_only_its_secondary() {
  let ws = Workspace::new();
  let extra = format!(
    r#"{SITE_QUERY}
[[secondary]]
name = "pysite"

[[secondary.steps]]
name = "pysite"
command = ["make", "pysite"]

[[secondary.install]]
remove = {{ path = "$${{query:site}}/stale" }}
"#
  );
  let host = host(TableProbe::complete(), downloads(), ScriptedRunner::failing(&["query:site"]));
  let spec = recipe_with(&kiln_lib::util::hash::hash_bytes(&svn_tarball()), &extra);

  let report = run(&spec, &ws.options(), &host).await.unwrap();

  let pysite = report.secondary.iter().find(|s| s.name == "pysite").unwrap();
  assert!(matches!(pysite.status, SecondaryStatus::Failed { ref reason } if reason.contains("site")));
  assert_eq!(report.exit_code(), EXIT_ADVISORY);
}

#[tokio::test]
async fn caveats_name_the_install_prefix() {
  let ws = Workspace::new();
  let host = host(TableProbe::complete(), downloads(), ScriptedRunner::default());
  let mut spec = recipe();
  spec.caveats = Some("svn-tools are in $${prefix}/libexec/svn-tools\n".to_string());

  let report = run(&spec, &ws.options(), &host).await.unwrap();

  let expected = format!("svn-tools are in {}/libexec/svn-tools\n", ws.prefix().display());
  assert_eq!(report.caveats.as_deref(), Some(expected.as_str()));
}
