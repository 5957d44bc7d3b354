mod build;
mod check;
mod fetch;
mod info;

pub use build::{BuildArgs, cmd_build};
pub use check::cmd_check;
pub use fetch::cmd_fetch;
pub use info::cmd_info;
pub use test::cmd_test;

use std::path::Path;

use anyhow::{Context, Result};

use kiln_lib::package::{PackageSpec, load_spec};

/// Load and validate the recipe at `path`.
fn load_recipe(path: &Path) -> Result<PackageSpec> {
  load_spec(path).with_context(|| format!("Failed to load recipe {}", path.display()))
}

fn runtime() -> Result<tokio::runtime::Runtime> {
  tokio::runtime::Runtime::new().context("Failed to create async runtime")
}
