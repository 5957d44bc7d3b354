pub mod arch;
pub mod os;
pub mod paths;

pub use arch::Arch;
pub use os::Os;
use std::fmt;

/// Target platform a recipe is built for (e.g., "aarch64-darwin").
///
/// Patches and steps gate on the operating system; the architecture is only
/// recorded in the install receipt and may be unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
  pub arch: Option<Arch>,
  pub os: Os,
}

impl Platform {
  /// Create a new platform identifier
  pub fn new(arch: Option<Arch>, os: Os) -> Self {
    Self { arch, os }
  }

  /// Detect the current platform at runtime
  ///
  /// Returns `None` if the OS is not supported
  pub fn current() -> Option<Self> {
    Some(Self {
      arch: Arch::current(),
      os: Os::current()?,
    })
  }

  /// The host platform with its operating system replaced.
  pub fn with_os(os: Os) -> Self {
    Self {
      arch: Arch::current(),
      os,
    }
  }

  /// Returns the platform triple string (e.g., "aarch64-darwin")
  pub fn triple(&self) -> String {
    match self.arch {
      Some(arch) => format!("{}-{}", arch, self.os),
      None => format!("unknown-{}", self.os),
    }
  }

  /// Whether an item gated on `platforms` applies here. An empty list applies everywhere.
  pub fn matches(&self, platforms: &[Os]) -> bool {
    platforms.is_empty() || platforms.contains(&self.os)
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.triple())
  }
}
