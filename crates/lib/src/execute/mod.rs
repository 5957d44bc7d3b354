//! Pipeline entry points.
//!
//! [`run`] drives one recipe from dependency resolution to verification.
//! [`fetch_sources`] and [`test_install`] expose the fetch and verify
//! phases on their own.

mod pipeline;
mod types;

pub use pipeline::{fetch_sources, render_caveats, run, test_install};
pub use types::{
  BuildOptions, Host, Phase, PhaseError, PipelineError, ResourceOutcome, RunReport, SecondaryOutcome, SecondaryStatus,
  default_jobs,
};
