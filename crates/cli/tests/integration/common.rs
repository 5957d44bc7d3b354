//! Shared test helpers for CLI integration tests.

use std::io::Write;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

/// A shell script whose greeting is filled in by a patch.
pub const HELLO_SCRIPT: &str = "#!/bin/sh\necho '@GREETING@'\n";

/// Recipe for the `hello` package. `@URL@`, `@SHA@`, `@COMPILE@` and
/// `@EXTRAS@` are filled in by [`TestEnv::recipe`].
const HELLO_RECIPE: &str = r#"
caveats = "Run $${prefix}/bin/hello to be greeted."

[package]
name = "hello"
version = "1.0"
desc = "Greets the user"

[source]
url = "@URL@"
sha256 = "@SHA@"

[[dependencies]]
name = "shell"
probe = { kind = "path", path = "/bin/sh" }

[[patches]]
file = "hello.sh"
find = "@GREETING@"
replace = "hello from kiln"

[[steps]]
name = "compile"
command = "@COMPILE@"

[[steps]]
name = "darwin-only"
command = "exit 1"
platforms = ["darwin"]

[[steps]]
name = "install"
command = "mkdir -p $${prefix}/bin && cp bin/hello $${prefix}/bin/hello"

[[secondary]]
name = "extras"
kind = "tool"

[[secondary.steps]]
name = "extras"
command = "@EXTRAS@"

[[install]]
symlink = { target = "hello", link = "bin/hi" }

[[test]]
name = "greets"
command = "hello | grep -q 'hello from kiln'"

[[test]]
name = "extras-check"
command = "true"
requires = "extras"
"#;

pub const COMPILE_OK: &str = "mkdir -p bin && cp hello.sh bin/hello && chmod +x bin/hello";

/// Knobs for one rendering of the recipe.
pub struct RecipeOptions {
  pub sha: Option<String>,
  pub compile: String,
  pub extras: String,
}

impl Default for RecipeOptions {
  fn default() -> Self {
    Self {
      sha: None,
      compile: COMPILE_OK.to_string(),
      extras: "true".to_string(),
    }
  }
}

/// Isolated test environment.
///
/// Each test gets its own temporary directory holding the source archive,
/// the recipe, the download cache and the install prefix.
pub struct TestEnv {
  pub temp: TempDir,
  pub archive: PathBuf,
}

impl TestEnv {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("hello-1.0.tar.gz");
    write_tar_gz(&archive, &[("hello-1.0/hello.sh", HELLO_SCRIPT)]);
    Self { temp, archive }
  }

  /// Write the recipe and return its path.
  pub fn recipe(&self, options: RecipeOptions) -> PathBuf {
    let sha = options.sha.unwrap_or_else(|| sha256_file(&self.archive));
    let url = format!("file://{}", self.archive.display());
    let content = HELLO_RECIPE
      .replace("@URL@", &url)
      .replace("@SHA@", &sha)
      .replace("@COMPILE@", &options.compile)
      .replace("@EXTRAS@", &options.extras);
    let path = self.temp.path().join("recipe.toml");
    std::fs::write(&path, content).unwrap();
    path
  }

  pub fn default_recipe(&self) -> PathBuf {
    self.recipe(RecipeOptions::default())
  }

  pub fn prefix(&self) -> PathBuf {
    self.temp.path().join("prefix")
  }

  pub fn cache(&self) -> PathBuf {
    self.temp.path().join("cache")
  }

  /// Get a pre-configured Command for the kiln binary.
  ///
  /// `KILN_CACHE_DIR` points at an isolated download cache.
  pub fn kiln_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("kiln");
    cmd.env("KILN_CACHE_DIR", self.cache());
    cmd.env_remove("KILN_LOG");
    cmd
  }

  /// `kiln build <recipe> --prefix <prefix>` with the default recipe.
  pub fn build_cmd(&self, recipe: &Path) -> Command {
    let mut cmd = self.kiln_cmd();
    cmd.arg("build").arg(recipe).arg("--prefix").arg(self.prefix());
    cmd.arg("--platform").arg("linux");
    cmd
  }
}

pub fn write_tar_gz(dest: &Path, files: &[(&str, &str)]) {
  let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
  for (path, contents) in files {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder.append_data(&mut header, path, contents.as_bytes()).unwrap();
  }
  let bytes = builder.into_inner().unwrap().finish().unwrap();
  let mut file = std::fs::File::create(dest).unwrap();
  file.write_all(&bytes).unwrap();
}

pub fn sha256_file(path: &Path) -> String {
  hex::encode(Sha256::digest(std::fs::read(path).unwrap()))
}
