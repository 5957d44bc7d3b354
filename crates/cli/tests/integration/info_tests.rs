//! Info and check command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn info_lists_recipe_contents() {
  let env = TestEnv::new();
  let recipe = env.default_recipe();

  env
    .kiln_cmd()
    .arg("info")
    .arg(&recipe)
    .assert()
    .success()
    .stdout(predicate::str::contains("hello-1.0"))
    .stdout(predicate::str::contains("Greets the user"))
    .stdout(predicate::str::contains("extras"))
    .stdout(predicate::str::contains("requires extras"));
}

#[test]
fn info_json_output() {
  let env = TestEnv::new();
  let recipe = env.default_recipe();

  let output = env.kiln_cmd().arg("info").arg(&recipe).arg("-o").arg("json").output().unwrap();
  assert!(output.status.success());

  let info: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(info["name"], "hello");
  assert_eq!(info["patches"], 1);
  assert_eq!(info["secondary"][0]["kind"], "tool");
  assert_eq!(info["test"][1]["requires"], "extras");
}

#[test]
fn info_fills_prefix_into_caveats() {
  let env = TestEnv::new();
  let recipe = env.default_recipe();

  env
    .kiln_cmd()
    .arg("info")
    .arg(&recipe)
    .assert()
    .success()
    .stdout(predicate::str::contains("Run <prefix>/bin/hello to be greeted."));

  env
    .kiln_cmd()
    .arg("info")
    .arg(&recipe)
    .arg("--prefix")
    .arg("/opt/hello")
    .assert()
    .success()
    .stdout(predicate::str::contains("Run /opt/hello/bin/hello to be greeted."));
}

#[test]
fn check_resolves_dependencies() {
  let env = TestEnv::new();
  let recipe = env.default_recipe();

  env
    .kiln_cmd()
    .arg("check")
    .arg(&recipe)
    .assert()
    .success()
    .stdout(predicate::str::contains("Recipe hello-1.0 is valid"))
    .stdout(predicate::str::contains("shell"));
}

#[test]
fn check_reports_missing_dependency() {
  let env = TestEnv::new();
  let recipe = env.default_recipe();
  let content = std::fs::read_to_string(&recipe)
    .unwrap()
    .replace("path = \"/bin/sh\"", "path = \"/nonexistent/kiln-ghost\"");
  std::fs::write(&recipe, content).unwrap();

  env
    .kiln_cmd()
    .arg("check")
    .arg(&recipe)
    .assert()
    .code(1)
    .stderr(predicate::str::contains("missing dependency 'shell'"));
}
