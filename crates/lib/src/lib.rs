//! kiln-lib: build orchestration for source packages.
//!
//! A recipe ([`package::PackageSpec`]) declares how to fetch, patch, build,
//! install and smoke-test one package. The [`execute`] module interprets it:
//! - [`resolve`]: check host dependencies before anything runs
//! - [`fetch`]: download, verify and unpack sources
//! - [`patch`]: all-or-nothing source edits
//! - [`build`]: sequential step execution with per-step environments
//! - [`install`]: artifacts and the install receipt
//! - [`verify`]: post-install smoke checks

pub mod build;
pub mod consts;
pub mod execute;
pub mod fetch;
pub mod install;
pub mod package;
pub mod patch;
pub mod placeholder;
pub mod platform;
pub mod resolve;
pub mod util;
pub mod verify;
