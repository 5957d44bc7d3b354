//! Host probing.
//!
//! A [`HostProbe`] answers "is this dependency present, where, and at what
//! version". [`SystemProbe`] asks the real host; tests substitute a fixed
//! table so resolution can be exercised without touching the machine.

use std::path::{Path, PathBuf};
use std::process::Command;

use semver::Version;
use tracing::{debug, trace};

use crate::package::{Dependency, Probe};

use super::version::sniff_version;

/// What a probe found on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probed {
  /// Location exposed to recipes as `$${dep:NAME}`.
  pub location: PathBuf,
  /// Detected version, when the probe kind reports one.
  pub version: Option<Version>,
}

/// Looks dependencies up on a host. Must not modify anything.
pub trait HostProbe {
  fn probe(&self, dependency: &Dependency) -> Option<Probed>;
}

/// Probes the machine kiln runs on.
#[derive(Debug, Clone, Default)]
pub struct SystemProbe;

impl HostProbe for SystemProbe {
  fn probe(&self, dependency: &Dependency) -> Option<Probed> {
    match &dependency.probe {
      Probe::Binary { command, version_args } => {
        let command = command.as_deref().unwrap_or(&dependency.name);
        let default_args = vec!["--version".to_string()];
        probe_binary(command, version_args.as_ref().unwrap_or(&default_args))
      }
      Probe::PkgConfig { module } => probe_pkg_config(module.as_deref().unwrap_or(&dependency.name)),
      Probe::Path { path } => {
        let path = PathBuf::from(path);
        path.exists().then_some(Probed {
          location: path,
          version: None,
        })
      }
    }
  }
}

fn probe_binary(command: &str, version_args: &[String]) -> Option<Probed> {
  let path = which::which(command).ok()?;
  debug!(command = %command, path = %path.display(), "found binary");

  let version = run_capture(&path, version_args).and_then(|output| sniff_version(&output));
  trace!(command = %command, version = ?version, "sniffed version");

  Some(Probed {
    location: install_root(&path),
    version,
  })
}

fn probe_pkg_config(module: &str) -> Option<Probed> {
  let pkg_config = which::which("pkg-config").ok()?;
  let version = run_capture(&pkg_config, &["--modversion".to_string(), module.to_string()])?;
  let prefix = run_capture(&pkg_config, &["--variable=prefix".to_string(), module.to_string()])
    .map(|p| p.trim().to_string())
    .filter(|p| !p.is_empty())
    .unwrap_or_else(|| "/".to_string());

  Some(Probed {
    location: PathBuf::from(prefix),
    version: sniff_version(&version),
  })
}

/// Run a program and return stdout followed by stderr, or `None` on failure.
///
/// Several tools (java among them) print their version on stderr.
fn run_capture(program: &Path, args: &[String]) -> Option<String> {
  let output = Command::new(program).args(args).output().ok()?;
  if !output.status.success() {
    return None;
  }

  let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
  text.push_str(&String::from_utf8_lossy(&output.stderr));
  Some(text)
}

/// `/usr/local/bin/perl` -> `/usr/local`; anything else -> its directory.
fn install_root(binary: &Path) -> PathBuf {
  let resolved = dunce::canonicalize(binary).unwrap_or_else(|_| binary.to_path_buf());
  let dir = resolved.parent().unwrap_or(Path::new("/"));

  match (dir.file_name(), dir.parent()) {
    (Some(name), Some(root)) if name == "bin" || name == "sbin" => root.to_path_buf(),
    _ => dir.to_path_buf(),
  }
}
