//! Crate-wide constants.

/// Application name, used for cache directories and log filters.
pub const APP_NAME: &str = "kiln";

/// Recipe file name used when none is given on the command line.
pub const DEFAULT_RECIPE: &str = "recipe.toml";

/// Marker written into a source root once its patch set has been applied.
pub const PATCHED_MARKER: &str = ".kiln-patched";

/// Receipt written into the install prefix after a successful install.
pub const RECEIPT_FILE: &str = "INSTALL_RECEIPT.json";

/// Environment variable overriding the download cache location.
pub const CACHE_DIR_ENV: &str = "KILN_CACHE_DIR";

/// Exit code for a completed install with failed secondary builds or smoke checks.
pub const EXIT_ADVISORY: i32 = 2;
