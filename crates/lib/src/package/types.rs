//! Recipe data model.
//!
//! A [`PackageSpec`] is deserialized once from TOML and never mutated. Every
//! list is ordered: dependencies resolve, patches apply, and steps run in
//! declaration order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::platform::os::Os;

/// Complete description of a buildable package.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageSpec {
  pub package: PackageInfo,
  pub source: SourceLocation,
  #[serde(default)]
  pub dependencies: Vec<Dependency>,
  #[serde(default)]
  pub resources: Vec<Resource>,
  #[serde(default)]
  pub patches: Vec<PatchOperation>,
  /// Base environment overlay applied to every step.
  #[serde(default)]
  pub env: BTreeMap<String, String>,
  /// Directories prepended to `PATH` for every step.
  #[serde(default)]
  pub path_prepend: Vec<String>,
  #[serde(default)]
  pub queries: Vec<Query>,
  /// Primary build steps (configure, compile, install).
  #[serde(default)]
  pub steps: Vec<BuildStep>,
  #[serde(default)]
  pub secondary: Vec<SecondaryBuild>,
  #[serde(default)]
  pub install: Vec<InstallArtifact>,
  #[serde(default)]
  pub test: Vec<SmokeCheck>,
  pub caveats: Option<String>,
}

impl PackageSpec {
  pub fn resource(&self, name: &str) -> Option<&Resource> {
    self.resources.iter().find(|r| r.name == name)
  }

  pub fn query(&self, name: &str) -> Option<&Query> {
    self.queries.iter().find(|q| q.name == name)
  }

  pub fn secondary_build(&self, name: &str) -> Option<&SecondaryBuild> {
    self.secondary.iter().find(|s| s.name == name)
  }

  /// `name-version` (with `_revision` when non-zero), used for directory names.
  pub fn full_name(&self) -> String {
    self.package.full_name()
  }
}

/// Package identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageInfo {
  pub name: String,
  pub version: String,
  #[serde(default)]
  pub revision: u32,
  pub desc: Option<String>,
  pub homepage: Option<String>,
}

impl PackageInfo {
  pub fn full_name(&self) -> String {
    if self.revision == 0 {
      format!("{}-{}", self.name, self.version)
    } else {
      format!("{}-{}_{}", self.name, self.version, self.revision)
    }
  }
}

/// Where an archive comes from and what it must hash to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceLocation {
  pub url: String,
  pub mirror: Option<String>,
  pub sha256: String,
}

impl SourceLocation {
  /// Candidate URLs in the order they are attempted.
  pub fn urls(&self) -> impl Iterator<Item = &str> {
    std::iter::once(self.url.as_str()).chain(self.mirror.as_deref())
  }
}

/// An external tool or library the build needs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Dependency {
  pub name: String,
  /// Version requirement, e.g. `">=1.8"`, `"1.8+"` or `"3"`.
  pub version: Option<String>,
  /// Needed to build only; excluded from the runtime requirements in the receipt.
  #[serde(default)]
  pub build_only: bool,
  #[serde(default)]
  pub probe: Probe,
}

/// How a dependency is looked up on the host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Probe {
  /// An executable on `PATH` (defaults to the dependency name).
  Binary {
    command: Option<String>,
    /// Arguments that print the version (defaults to `--version`).
    version_args: Option<Vec<String>>,
  },
  /// A pkg-config module (defaults to the dependency name).
  PkgConfig { module: Option<String> },
  /// A file or directory that must exist. Carries no version.
  Path { path: String },
}

impl Default for Probe {
  fn default() -> Self {
    Probe::Binary {
      command: None,
      version_args: None,
    }
  }
}

/// A vendored component built into its own prefix before the parent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Resource {
  pub name: String,
  pub source: SourceLocation,
  /// Install prefix template; defaults to `$${prefix}/libexec/<name>`.
  pub prefix: Option<String>,
  #[serde(default)]
  pub env: BTreeMap<String, String>,
  #[serde(default)]
  pub patches: Vec<PatchOperation>,
  #[serde(default)]
  pub steps: Vec<BuildStep>,
}

impl Resource {
  pub fn prefix_template(&self) -> String {
    self
      .prefix
      .clone()
      .unwrap_or_else(|| format!("$${{prefix}}/libexec/{}", self.name))
  }
}

/// A command either executed directly or handed to the shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
  /// `["make", "install"]`: program followed by arguments.
  Args(Vec<String>),
  /// `"perl -MConfig -e 'print $Config{archlib}'"`: run through the shell.
  Shell(String),
}

impl CommandLine {
  /// Every string of the command, for placeholder scanning.
  pub fn parts(&self) -> Vec<&str> {
    match self {
      CommandLine::Args(args) => args.iter().map(String::as_str).collect(),
      CommandLine::Shell(line) => vec![line.as_str()],
    }
  }

  pub fn is_empty(&self) -> bool {
    match self {
      CommandLine::Args(args) => args.first().is_none_or(|p| p.trim().is_empty()),
      CommandLine::Shell(line) => line.trim().is_empty(),
    }
  }
}

impl std::fmt::Display for CommandLine {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      CommandLine::Args(args) => write!(f, "{}", args.join(" ")),
      CommandLine::Shell(line) => write!(f, "{}", line),
    }
  }
}

/// One external process invocation. Success is a zero exit code.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildStep {
  pub name: Option<String>,
  pub command: CommandLine,
  /// Working directory relative to the source root.
  pub cwd: Option<String>,
  #[serde(default)]
  pub env: BTreeMap<String, String>,
  #[serde(default)]
  pub platforms: Vec<Os>,
}

impl BuildStep {
  pub fn display_name(&self) -> String {
    self.name.clone().unwrap_or_else(|| self.command.to_string())
  }

  /// Every string that may carry placeholders.
  pub fn template_strings(&self) -> Vec<&str> {
    let mut strings = self.command.parts();
    strings.extend(self.cwd.as_deref());
    strings.extend(self.env.values().map(String::as_str));
    strings
  }
}

/// Optional build after the primary one. Failures are collected, not fatal.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecondaryBuild {
  pub name: String,
  #[serde(default)]
  pub kind: SecondaryKind,
  /// Run with a single job; the native build tool shares state across targets.
  #[serde(default)]
  pub serial: bool,
  pub steps: Vec<BuildStep>,
  #[serde(default)]
  pub install: Vec<InstallArtifact>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecondaryKind {
  Tool,
  #[default]
  Binding,
}

/// A host query evaluated right before the first step that references it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Query {
  pub name: String,
  pub command: CommandLine,
  /// Path component appended to the trimmed output.
  pub join: Option<String>,
  /// Warn when the resulting path does not exist.
  #[serde(default)]
  pub must_exist: bool,
}

/// A post-build filesystem operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum InstallArtifact {
  /// Copy a file or directory tree.
  Copy { from: String, to: String },
  /// Create a symlink at `link` pointing to `target`.
  Symlink { target: String, link: String },
  /// Symlink every match of `pattern` into the directory `into`.
  LinkGlob { pattern: String, into: String },
  /// Remove a file or directory tree. Missing paths are ignored.
  Remove { path: String },
}

impl InstallArtifact {
  pub fn template_strings(&self) -> Vec<&str> {
    match self {
      InstallArtifact::Copy { from, to } => vec![from, to],
      InstallArtifact::Symlink { target, link } => vec![target, link],
      InstallArtifact::LinkGlob { pattern, into } => vec![pattern, into],
      InstallArtifact::Remove { path } => vec![path],
    }
  }
}

/// Post-install smoke check.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SmokeCheck {
  pub name: String,
  pub command: CommandLine,
  /// Secondary build this check exercises; skipped when that build failed.
  pub requires: Option<String>,
}

/// A textual edit applied to the source tree before the build.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawPatch")]
pub struct PatchOperation {
  /// Target file relative to the source root. `None` for unified diffs.
  pub file: Option<String>,
  pub matcher: Matcher,
  pub replace: String,
  /// Replace every occurrence instead of requiring at least one and editing the first.
  pub all: bool,
  pub platforms: Vec<Os>,
}

/// How a patch operation locates the text it replaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
  Exact(String),
  Regex(String),
  /// Inclusive 1-based line range.
  Lines { start: usize, end: usize },
  /// `NAME = value` line of a Makefile.
  MakeVar(String),
  /// Unified diff naming its own target files.
  Diff { text: String, strip: usize },
}

impl Matcher {
  pub fn kind(&self) -> &'static str {
    match self {
      Matcher::Exact(_) => "find",
      Matcher::Regex(_) => "regex",
      Matcher::Lines { .. } => "lines",
      Matcher::MakeVar(_) => "make_var",
      Matcher::Diff { .. } => "diff",
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPatch {
  file: Option<String>,
  find: Option<String>,
  regex: Option<String>,
  lines: Option<[usize; 2]>,
  make_var: Option<String>,
  diff: Option<String>,
  strip: Option<usize>,
  replace: Option<String>,
  #[serde(default)]
  all: bool,
  #[serde(default)]
  platforms: Vec<Os>,
}

impl TryFrom<RawPatch> for PatchOperation {
  type Error = String;

  fn try_from(raw: RawPatch) -> Result<Self, Self::Error> {
    let mut matchers = Vec::new();
    if let Some(find) = raw.find {
      matchers.push(Matcher::Exact(find));
    }
    if let Some(regex) = raw.regex {
      matchers.push(Matcher::Regex(regex));
    }
    if let Some([start, end]) = raw.lines {
      matchers.push(Matcher::Lines { start, end });
    }
    if let Some(name) = raw.make_var {
      matchers.push(Matcher::MakeVar(name));
    }
    if let Some(text) = raw.diff {
      matchers.push(Matcher::Diff {
        text,
        strip: raw.strip.unwrap_or(1),
      });
    }

    if matchers.len() != 1 {
      return Err(format!(
        "patch needs exactly one of find, regex, lines, make_var, diff (got {})",
        matchers.len()
      ));
    }
    let matcher = matchers.remove(0);

    let is_diff = matches!(matcher, Matcher::Diff { .. });
    if is_diff {
      if raw.file.is_some() || raw.replace.is_some() {
        return Err("diff patches name their own files and carry no replace".to_string());
      }
    } else {
      if raw.file.is_none() {
        return Err(format!("{} patch needs a file", matcher.kind()));
      }
      if raw.replace.is_none() {
        return Err(format!("{} patch needs a replace", matcher.kind()));
      }
      if raw.strip.is_some() {
        return Err("strip only applies to diff patches".to_string());
      }
    }

    if let Matcher::Lines { start, end } = matcher {
      if start == 0 || end < start {
        return Err(format!("invalid line range [{start}, {end}]"));
      }
    }

    if raw.all && !matches!(matcher, Matcher::Exact(_) | Matcher::Regex(_)) {
      return Err("all only applies to find and regex patches".to_string());
    }

    Ok(PatchOperation {
      file: raw.file,
      matcher,
      replace: raw.replace.unwrap_or_default(),
      all: raw.all,
      platforms: raw.platforms,
    })
  }
}
