//! `INSTALL_RECEIPT.json`: what was installed into a prefix, from where.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::InstallError;
use crate::consts::RECEIPT_FILE;
use crate::package::PackageSpec;
use crate::resolve::Resolution;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
  pub name: String,
  pub version: String,
  pub revision: u32,
  pub source: ReceiptSource,
  #[serde(default)]
  pub resources: Vec<ReceiptResource>,
  /// Runtime dependencies only; build-only ones are left out.
  #[serde(default)]
  pub runtime_dependencies: Vec<ReceiptDependency>,
  #[serde(default)]
  pub secondary_built: Vec<String>,
  #[serde(default)]
  pub secondary_failed: Vec<String>,
  pub platform: String,
  /// RFC 3339 timestamp.
  pub built_at: String,
  pub kiln_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptSource {
  pub url: String,
  pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptResource {
  pub name: String,
  pub prefix: String,
  pub source: ReceiptSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptDependency {
  pub name: String,
  pub version: Option<String>,
  pub location: PathBuf,
}

impl Receipt {
  /// Start a receipt for `spec`; secondary outcomes and resources are filled in by the caller.
  pub fn new(spec: &PackageSpec, resolution: &Resolution, platform: &str) -> Self {
    Self {
      name: spec.package.name.clone(),
      version: spec.package.version.clone(),
      revision: spec.package.revision,
      source: ReceiptSource {
        url: spec.source.url.clone(),
        sha256: spec.source.sha256.clone(),
      },
      resources: Vec::new(),
      runtime_dependencies: resolution
        .runtime
        .iter()
        .map(|d| ReceiptDependency {
          name: d.name.clone(),
          version: d.version.clone(),
          location: d.location.clone(),
        })
        .collect(),
      secondary_built: Vec::new(),
      secondary_failed: Vec::new(),
      platform: platform.to_string(),
      built_at: humantime::format_rfc3339_seconds(SystemTime::now()).to_string(),
      kiln_version: env!("CARGO_PKG_VERSION").to_string(),
    }
  }
}

/// Write `receipt` into `prefix`, returning the file's path.
pub fn write_receipt(prefix: &Path, receipt: &Receipt) -> Result<PathBuf, InstallError> {
  let path = prefix.join(RECEIPT_FILE);
  let json = serde_json::to_string_pretty(receipt).map_err(|source| InstallError::ReceiptFormat {
    path: path.clone(),
    source,
  })?;

  std::fs::create_dir_all(prefix)
    .and_then(|_| std::fs::write(&path, json + "\n"))
    .map_err(|source| InstallError::Receipt {
      path: path.clone(),
      source,
    })?;

  info!(path = %path.display(), "wrote install receipt");
  Ok(path)
}

/// Read the receipt of an existing install, if there is one.
pub fn read_receipt(prefix: &Path) -> Result<Option<Receipt>, InstallError> {
  let path = prefix.join(RECEIPT_FILE);
  let content = match std::fs::read_to_string(&path) {
    Ok(content) => content,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
    Err(source) => return Err(InstallError::Receipt { path, source }),
  };

  serde_json::from_str(&content)
    .map(Some)
    .map_err(|source| InstallError::ReceiptFormat { path, source })
}
