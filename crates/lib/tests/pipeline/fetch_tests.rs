//! Source integrity and mirror fallback.

use kiln_lib::execute::{Phase, PhaseError, fetch_sources, run};
use kiln_lib::fetch::FetchError;
use kiln_lib::util::hash::hash_bytes;

use super::common::*;

#[tokio::test]
async fn checksum_mismatch_stops_before_patching() {
  let ws = Workspace::new();
  let downloader = CannedDownloader::default()
    .serve(PRIMARY_URL, b"beefdead")
    .serve(SERF_URL, &serf_tarball());
  let host = host(TableProbe::complete(), downloader, ScriptedRunner::default());

  let err = run(&recipe_with("deadbeef", ""), &ws.options(), &host).await.unwrap_err();

  assert_eq!(err.phase, Phase::Fetch);
  match err.source {
    PhaseError::Fetch(FetchError::Integrity { expected, actual, .. }) => {
      assert_eq!(expected, "deadbeef");
      assert_eq!(actual, hash_bytes(b"beefdead"));
    }
    other => panic!("expected integrity error, got {other:?}"),
  }
  assert!(host.runner.seen().is_empty());
}

#[tokio::test]
async fn mirror_fallback_still_verifies() {
  let ws = Workspace::new();
  let downloader = CannedDownloader::default()
    .serve(MIRROR_URL, &svn_tarball())
    .serve(SERF_URL, &serf_tarball());
  let host = host(TableProbe::complete(), downloader, ScriptedRunner::default());

  let report = run(&recipe(), &ws.options(), &host).await.unwrap();

  assert_eq!(&host.downloader.requests()[..2], &[PRIMARY_URL.to_string(), MIRROR_URL.to_string()]);
  let receipt: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&report.receipt).unwrap()).unwrap();
  assert_eq!(receipt["source"]["url"], MIRROR_URL);
}

#[tokio::test]
async fn tampered_mirror_is_rejected() {
  let ws = Workspace::new();
  let downloader = CannedDownloader::default()
    .serve(MIRROR_URL, b"not the release")
    .serve(SERF_URL, &serf_tarball());
  let host = host(TableProbe::complete(), downloader, ScriptedRunner::default());

  let err = run(&recipe(), &ws.options(), &host).await.unwrap_err();

  assert!(matches!(err.source, PhaseError::Fetch(FetchError::Integrity { ref url, .. }) if url == MIRROR_URL));
  assert!(host.runner.seen().is_empty());
}

#[tokio::test]
async fn second_run_uses_verified_cache() {
  let ws = Workspace::new();
  let first = host(TableProbe::complete(), downloads(), ScriptedRunner::default());
  run(&recipe(), &ws.options(), &first).await.unwrap();

  let offline = host(TableProbe::complete(), CannedDownloader::default(), ScriptedRunner::default());
  let report = run(&recipe(), &ws.options(), &offline).await.unwrap();

  assert!(offline.downloader.requests().is_empty());
  assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn fetch_sources_fills_cache() {
  let ws = Workspace::new();
  let downloader = downloads();

  let fetched = fetch_sources(&recipe(), &downloader, &ws.cache()).await.unwrap();

  assert_eq!(fetched.len(), 2);
  assert!(fetched.iter().all(|f| f.path.starts_with(ws.cache())));
  assert_eq!(downloader.requests(), vec![PRIMARY_URL.to_string(), SERF_URL.to_string()]);
}

#[tokio::test]
async fn patch_mismatch_is_fatal_before_build() {
  let ws = Workspace::new();
  let extra = r#"
[[patches]]
file = "Makefile.in"
find = "no such text"
replace = "x"
"#;
  let host = host(TableProbe::complete(), downloads(), ScriptedRunner::default());

  let err = run(&recipe_with(&hash_bytes(&svn_tarball()), extra), &ws.options(), &host)
    .await
    .unwrap_err();

  assert_eq!(err.phase, Phase::Patch);
  assert!(err.to_string().contains("patch #2 on Makefile.in"));
  assert!(host.runner.seen().is_empty());
}
