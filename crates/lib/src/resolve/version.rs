//! Version requirement parsing and version sniffing.
//!
//! Recipes use semver requirement syntax, plus two shorthands common in
//! package recipes: `1.8+` (at least 1.8) and a bare version such as `3`
//! (same major release). Host tools print versions in many shapes, so the
//! first dotted number in their output is taken and padded to three parts.

use std::sync::LazyLock;

use regex::Regex;
use semver::{Version, VersionReq};

static VERSION_PATTERN: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(\d+)(?:\.(\d+))?(?:\.(\d+))?").expect("static pattern is valid"));

/// Parse a version requirement from a recipe.
pub fn parse_requirement(req: &str) -> Result<VersionReq, semver::Error> {
  let trimmed = req.trim();

  if let Some(minimum) = trimmed.strip_suffix('+') {
    return VersionReq::parse(&format!(">={}", minimum.trim()));
  }

  VersionReq::parse(trimmed)
}

/// Extract the first version number from tool output.
pub fn sniff_version(output: &str) -> Option<Version> {
  let captures = VERSION_PATTERN.captures(output)?;
  let part = |i: usize| -> u64 { captures.get(i).and_then(|m| m.as_str().parse().ok()).unwrap_or(0) };

  Some(Version::new(part(1), part(2), part(3)))
}
