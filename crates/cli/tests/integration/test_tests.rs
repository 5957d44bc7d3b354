//! Test command integration tests.

use predicates::prelude::*;

use super::common::{RecipeOptions, TestEnv};

#[test]
fn test_passes_after_build() {
  let env = TestEnv::new();
  let recipe = env.default_recipe();
  env.build_cmd(&recipe).arg("--no-verify").assert().success();

  env
    .kiln_cmd()
    .arg("test")
    .arg(&recipe)
    .arg("--prefix")
    .arg(env.prefix())
    .assert()
    .code(0)
    .stdout(predicate::str::contains("2 passed, 0 failed, 0 skipped"));
}

#[test]
fn test_uses_receipt_to_skip_failed_secondary() {
  let env = TestEnv::new();
  let recipe = env.recipe(RecipeOptions {
    extras: "exit 3".to_string(),
    ..Default::default()
  });
  env.build_cmd(&recipe).arg("--no-verify").assert().code(2);

  env
    .kiln_cmd()
    .arg("test")
    .arg(&recipe)
    .arg("--prefix")
    .arg(env.prefix())
    .assert()
    .code(0)
    .stdout(predicate::str::contains("1 passed, 0 failed, 1 skipped"));
}

#[test]
fn test_against_empty_prefix_is_advisory() {
  let env = TestEnv::new();
  let recipe = env.default_recipe();
  std::fs::create_dir_all(env.prefix()).unwrap();

  env
    .kiln_cmd()
    .arg("test")
    .arg(&recipe)
    .arg("--prefix")
    .arg(env.prefix())
    .assert()
    .code(2)
    .stderr(predicate::str::contains("1 passed, 1 failed, 0 skipped"));
}

#[test]
fn test_json_output() {
  let env = TestEnv::new();
  let recipe = env.default_recipe();
  env.build_cmd(&recipe).assert().success();

  let output = env
    .kiln_cmd()
    .arg("test")
    .arg(&recipe)
    .arg("--prefix")
    .arg(env.prefix())
    .arg("-o")
    .arg("json")
    .output()
    .unwrap();
  assert!(output.status.success());

  let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(report["checks"][0]["name"], "greets");
  assert_eq!(report["checks"][0]["status"], "passed");
}
