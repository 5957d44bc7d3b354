mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kiln_lib::consts::DEFAULT_RECIPE;
use kiln_lib::platform::Os;

use output::{OutputFormat, print_error};

/// Environment variable holding the tracing filter.
const LOG_ENV: &str = "KILN_LOG";

/// kiln - build source packages from declarative recipes
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build, install and verify a recipe
  Build {
    /// Path to the recipe (default: recipe.toml)
    #[arg(default_value = DEFAULT_RECIPE)]
    recipe: PathBuf,

    /// Install prefix
    #[arg(long)]
    prefix: PathBuf,

    /// Parallel jobs passed to the build tool (default: number of CPUs)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Skip the post-install smoke checks
    #[arg(long)]
    no_verify: bool,

    /// Keep the temporary build directory for inspection
    #[arg(long)]
    keep_build_root: bool,

    /// Operating system that patches and steps are gated on (default: host)
    #[arg(long)]
    platform: Option<Os>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Validate a recipe and resolve its dependencies
  Check {
    /// Path to the recipe (default: recipe.toml)
    #[arg(default_value = DEFAULT_RECIPE)]
    recipe: PathBuf,
  },

  /// Download and verify every source into the cache
  Fetch {
    /// Path to the recipe (default: recipe.toml)
    #[arg(default_value = DEFAULT_RECIPE)]
    recipe: PathBuf,
  },

  /// Show a recipe summary and its caveats
  Info {
    /// Path to the recipe (default: recipe.toml)
    #[arg(default_value = DEFAULT_RECIPE)]
    recipe: PathBuf,

    /// Install prefix named in the caveats
    #[arg(long)]
    prefix: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Run the smoke checks against an existing install
  Test {
    /// Path to the recipe (default: recipe.toml)
    #[arg(default_value = DEFAULT_RECIPE)]
    recipe: PathBuf,

    /// Install prefix to check
    #[arg(long)]
    prefix: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let result = match cli.command {
    Commands::Build {
      recipe,
      prefix,
      jobs,
      no_verify,
      keep_build_root,
      platform,
      output,
    } => cmd::cmd_build(cmd::BuildArgs {
      recipe,
      prefix,
      jobs,
      verify: !no_verify,
      keep_build_root,
      platform,
      output,
    }),
    Commands::Check { recipe } => cmd::cmd_check(&recipe),
    Commands::Fetch { recipe } => cmd::cmd_fetch(&recipe),
    Commands::Info { recipe, prefix, output } => cmd::cmd_info(&recipe, prefix.as_deref(), output),
    Commands::Test { recipe, prefix, output } => cmd::cmd_test(&recipe, &prefix, output),
  };

  match result {
    Ok(code) => ExitCode::from(code),
    Err(err) => {
      print_error(&format!("{:#}", err));
      ExitCode::FAILURE
    }
  }
}

/// Logs go to stderr so JSON output on stdout stays parseable.
fn init_tracing(verbose: bool) {
  let filter = if verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}
