//! Fetch command integration tests.

use predicates::prelude::*;

use super::common::{RecipeOptions, TestEnv};

#[test]
fn fetch_fills_the_cache() {
  let env = TestEnv::new();
  let recipe = env.default_recipe();

  env
    .kiln_cmd()
    .arg("fetch")
    .arg(&recipe)
    .assert()
    .success()
    .stdout(predicate::str::contains("Fetched 1 archive(s) for hello-1.0"))
    .stdout(predicate::str::contains("downloaded from file://"));

  let cached: Vec<_> = std::fs::read_dir(env.cache()).unwrap().map(|e| e.unwrap().file_name()).collect();
  assert_eq!(cached.len(), 1);
  assert!(cached[0].to_string_lossy().ends_with("-hello-1.0.tar.gz"));
}

#[test]
fn second_fetch_uses_cache() {
  let env = TestEnv::new();
  let recipe = env.default_recipe();

  env.kiln_cmd().arg("fetch").arg(&recipe).assert().success();
  std::fs::remove_file(&env.archive).unwrap();

  env
    .kiln_cmd()
    .arg("fetch")
    .arg(&recipe)
    .assert()
    .success()
    .stdout(predicate::str::contains("cached"));
}

#[test]
fn fetch_rejects_bad_checksum() {
  let env = TestEnv::new();
  let recipe = env.recipe(RecipeOptions {
    sha: Some("f".repeat(64)),
    ..Default::default()
  });

  env
    .kiln_cmd()
    .arg("fetch")
    .arg(&recipe)
    .assert()
    .code(1)
    .stderr(predicate::str::contains("integrity check failed"));
}

#[test]
fn build_after_fetch_works_offline() {
  let env = TestEnv::new();
  let recipe = env.default_recipe();

  env.kiln_cmd().arg("fetch").arg(&recipe).assert().success();
  std::fs::remove_file(&env.archive).unwrap();

  env.build_cmd(&recipe).assert().code(0);
}
