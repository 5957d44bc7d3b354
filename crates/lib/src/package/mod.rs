//! Recipe model and loading.
//!
//! A recipe is a TOML document describing one package: where its source
//! comes from, what it needs on the host, how it is patched, built,
//! installed and smoke-tested.

pub mod load;
pub mod types;

pub use load::{LoadError, load_spec, parse_spec};
pub use types::{
  BuildStep, CommandLine, Dependency, InstallArtifact, Matcher, PackageInfo, PackageSpec, PatchOperation, Probe,
  Query, Resource, SecondaryBuild, SecondaryKind, SmokeCheck, SourceLocation,
};
