//! Synthetic host seams and recipe fixtures shared by the pipeline tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use flate2::Compression;
use flate2::write::GzEncoder;
use kiln_lib::build::{Invocation, StepOutput, StepRunner};
use kiln_lib::execute::{BuildOptions, Host};
use kiln_lib::fetch::Downloader;
use kiln_lib::package::{Dependency, PackageSpec, parse_spec};
use kiln_lib::platform::{Os, Platform};
use kiln_lib::resolve::{HostProbe, Probed};
use kiln_lib::util::hash::hash_bytes;
use semver::Version;
use tempfile::TempDir;

pub const PRIMARY_URL: &str = "https://downloads.example/subversion-1.13.0.tar.gz";
pub const MIRROR_URL: &str = "https://mirror.example/subversion-1.13.0.tar.gz";
pub const SERF_URL: &str = "https://downloads.example/serf-1.3.9.tar.gz";

/// Dependencies present on the synthetic host, by name.
#[derive(Default)]
pub struct TableProbe {
  found: HashMap<String, Probed>,
}

impl TableProbe {
  pub fn with(mut self, name: &str, version: &str) -> Self {
    self.found.insert(
      name.to_string(),
      Probed {
        location: PathBuf::from("/usr"),
        version: Some(Version::parse(version).unwrap()),
      },
    );
    self
  }

  /// Every dependency the fixture recipe declares.
  pub fn complete() -> Self {
    Self::default().with("scons", "3.1.2").with("sqlite", "3.31.1")
  }
}

impl HostProbe for TableProbe {
  fn probe(&self, dependency: &Dependency) -> Option<Probed> {
    self.found.get(&dependency.name).cloned()
  }
}

/// Serves canned archives and records requested URLs.
#[derive(Default)]
pub struct CannedDownloader {
  bodies: HashMap<String, Vec<u8>>,
  requests: Mutex<Vec<String>>,
}

impl CannedDownloader {
  pub fn serve(mut self, url: &str, body: &[u8]) -> Self {
    self.bodies.insert(url.to_string(), body.to_vec());
    self
  }

  pub fn requests(&self) -> Vec<String> {
    self.requests.lock().unwrap().clone()
  }
}

impl Downloader for CannedDownloader {
  async fn download(&self, url: &str) -> Result<Vec<u8>, String> {
    self.requests.lock().unwrap().push(url.to_string());
    self.bodies.get(url).cloned().ok_or_else(|| "HTTP 503 Service Unavailable".to_string())
  }
}

/// Records invocations without spawning anything. Invocations whose name
/// is in `failing` exit with status 1; those in `stdout` print canned output.
#[derive(Default)]
pub struct ScriptedRunner {
  failing: BTreeSet<String>,
  stdout: BTreeMap<String, String>,
  seen: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
  pub fn failing(names: &[&str]) -> Self {
    Self {
      failing: names.iter().map(|s| s.to_string()).collect(),
      ..Default::default()
    }
  }

  pub fn printing(mut self, name: &str, stdout: &str) -> Self {
    self.stdout.insert(name.to_string(), stdout.to_string());
    self
  }

  pub fn seen(&self) -> Vec<Invocation> {
    self.seen.lock().unwrap().clone()
  }

  pub fn names(&self) -> Vec<String> {
    self.seen().into_iter().map(|i| i.name).collect()
  }

  pub fn find(&self, name: &str) -> Option<Invocation> {
    self.seen().into_iter().find(|i| i.name == name)
  }
}

impl StepRunner for ScriptedRunner {
  async fn run(&self, invocation: &Invocation) -> std::io::Result<StepOutput> {
    self.seen.lock().unwrap().push(invocation.clone());
    let code = if self.failing.contains(&invocation.name) { 1 } else { 0 };
    Ok(StepOutput {
      code: Some(code),
      stdout: self.stdout.get(&invocation.name).cloned().unwrap_or_default(),
      stderr: if code == 0 { String::new() } else { "error: simulated failure\n".to_string() },
    })
  }
}

/// In-memory `.tar.gz` holding `files` (path, contents).
pub fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
  let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
  for (path, contents) in files {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder.append_data(&mut header, path, contents.as_bytes()).unwrap();
  }
  builder.into_inner().unwrap().finish().unwrap()
}

pub fn svn_tarball() -> Vec<u8> {
  tarball(&[
    ("subversion-1.13.0/configure", "#!/bin/sh\nVERSION=@SVN_VERSION@\n"),
    ("subversion-1.13.0/Makefile.in", "all:\n"),
  ])
}

pub fn serf_tarball() -> Vec<u8> {
  tarball(&[("serf-1.3.9/SConstruct", "env = Environment()\n")])
}

/// Downloader serving both fixture archives from their primary URLs.
pub fn downloads() -> CannedDownloader {
  CannedDownloader::default()
    .serve(PRIMARY_URL, &svn_tarball())
    .serve(SERF_URL, &serf_tarball())
}

/// Recipe modeled on the Subversion build: a vendored HTTP library,
/// two bindings (one serial), and smoke checks per binding.
pub fn recipe_with(svn_sha: &str, extra: &str) -> PackageSpec {
  let text = format!(
    r#"
[package]
name = "subversion"
version = "1.13.0"
desc = "Version control system designed to be a better CVS"

[source]
url = "{PRIMARY_URL}"
mirror = "{MIRROR_URL}"
sha256 = "{svn_sha}"

[[dependencies]]
name = "scons"
build_only = true

[[dependencies]]
name = "sqlite"
version = "3"

[[resources]]
name = "serf"

[resources.source]
url = "{SERF_URL}"
sha256 = "{serf_sha}"

[[resources.steps]]
name = "serf-scons"
command = ["scons", "PREFIX=$${{prefix}}"]

[[resources.steps]]
name = "serf-install"
command = ["scons", "install"]

[[patches]]
file = "configure"
find = "@SVN_VERSION@"
replace = "1.13.0"

[[steps]]
name = "configure"
command = ["./configure", "--prefix=$${{prefix}}", "--with-serf=$${{resource:serf}}"]

[[steps]]
name = "make"
command = ["make"]

[[steps]]
name = "make-install"
command = ["make", "install"]

[[secondary]]
name = "swig-py"

[[secondary.steps]]
name = "swig-py"
command = ["make", "swig-py"]

[[secondary]]
name = "swig-rb"
serial = true

[[secondary.steps]]
name = "swig-rb"
command = ["make", "swig-rb"]

[[test]]
name = "core"
command = ["$${{prefix}}/bin/svnadmin", "--version"]

[[test]]
name = "python-binding"
command = ["python3", "-c", "import svn.core"]
requires = "swig-py"

[[test]]
name = "ruby-binding"
command = ["ruby", "-e", "require 'svn/core'"]
requires = "swig-rb"
{extra}
"#,
    serf_sha = hash_bytes(&serf_tarball()),
  );
  parse_spec(&text).unwrap()
}

pub fn recipe() -> PackageSpec {
  recipe_with(&hash_bytes(&svn_tarball()), "")
}

/// Scratch directories for one run.
pub struct Workspace {
  pub temp: TempDir,
}

impl Workspace {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  pub fn prefix(&self) -> PathBuf {
    self.temp.path().join("prefix")
  }

  pub fn cache(&self) -> PathBuf {
    self.temp.path().join("cache")
  }

  pub fn options(&self) -> BuildOptions {
    let mut options = BuildOptions::new(self.prefix(), Platform::with_os(Os::Linux));
    options.jobs = 4;
    options.cache_dir = Some(self.cache());
    options
  }
}

pub fn host<D: Downloader>(
  probe: TableProbe,
  downloader: D,
  runner: ScriptedRunner,
) -> Host<TableProbe, D, ScriptedRunner> {
  Host {
    probe,
    downloader,
    runner,
    env: [("PATH".to_string(), "/usr/bin:/bin".to_string())].into_iter().collect::<BTreeMap<_, _>>(),
  }
}

pub fn exists(path: &Path) -> bool {
  path.symlink_metadata().is_ok()
}
