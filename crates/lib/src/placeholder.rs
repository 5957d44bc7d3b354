//! Placeholder parsing and substitution for deferred value resolution.
//!
//! Recipe strings reference values that only exist once a run is under way:
//! the install prefix, the extracted source root, the prefix a vendored
//! resource was installed into, or the output of a host query. This module
//! parses those references and substitutes resolved values.
//!
//! # Placeholder Formats
//!
//! - `$${prefix}` - install prefix of the package (or resource) being built
//! - `$${src}` - root of the extracted source tree
//! - `$${version}` - package version
//! - `$${jobs}` - job count for the current scope
//! - `$${resource:<name>}` - install prefix of a vendored resource
//! - `$${dep:<name>}` - host location of a resolved dependency
//! - `$${query:<name>}` - output of a lazily evaluated query
//!
//! # Shell Variables
//!
//! Single `$` characters pass through unchanged, so shell variables like
//! `$HOME` and `$PATH` work naturally without any escaping.
//!
//! # Escaping
//!
//! Use `$$$` before `{` to produce a literal `$${` sequence.
//!
//! # Example
//!
//! ```
//! use kiln_lib::placeholder::{parse, Segment, Placeholder};
//!
//! let segments = parse("--with-serf=$${resource:serf}").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Literal("--with-serf=".to_string()),
//!     Segment::Placeholder(Placeholder::Resource("serf".to_string())),
//! ]);
//! ```

use thiserror::Error;

/// A parsed placeholder reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
  /// `$${prefix}`
  Prefix,

  /// `$${src}`
  Src,

  /// `$${version}`
  Version,

  /// `$${jobs}`
  Jobs,

  /// `$${resource:<name>}`
  Resource(String),

  /// `$${dep:<name>}`
  Dep(String),

  /// `$${query:<name>}`
  Query(String),
}

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  /// Literal text (no placeholders)
  Literal(String),

  /// A placeholder to be resolved
  Placeholder(Placeholder),
}

/// Errors that can occur during placeholder parsing or resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaceholderError {
  #[error("unclosed placeholder at position {0}")]
  Unclosed(usize),

  #[error("unknown placeholder type: {0}")]
  UnknownType(String),

  #[error("malformed placeholder: {0}")]
  Malformed(String),

  #[error("no value for placeholder '{0}' in this scope")]
  Unavailable(&'static str),

  #[error("unresolved resource: {0}")]
  UnresolvedResource(String),

  #[error("unresolved dependency: {0}")]
  UnresolvedDep(String),

  #[error("unresolved query: {0}")]
  UnresolvedQuery(String),
}

/// Trait for resolving placeholder values during execution.
pub trait Resolver {
  /// Install prefix of the current scope.
  fn resolve_prefix(&self) -> Result<&str, PlaceholderError>;

  /// Source root of the current scope.
  fn resolve_src(&self) -> Result<&str, PlaceholderError>;

  /// Package version.
  fn resolve_version(&self) -> Result<&str, PlaceholderError>;

  /// Job count of the current scope.
  fn resolve_jobs(&self) -> Result<&str, PlaceholderError>;

  /// Install prefix of a vendored resource.
  fn resolve_resource(&self, name: &str) -> Result<&str, PlaceholderError>;

  /// Host location of a resolved dependency.
  fn resolve_dep(&self, name: &str) -> Result<&str, PlaceholderError>;

  /// Value of an already evaluated query.
  fn resolve_query(&self, name: &str) -> Result<&str, PlaceholderError>;
}

/// Parse a string containing placeholders into segments.
///
/// # Errors
///
/// Returns an error if a placeholder is malformed (unclosed, unknown type, etc.)
pub fn parse(input: &str) -> Result<Vec<Segment>, PlaceholderError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '$' {
      literal.push(ch);
      continue;
    }

    match chars.peek() {
      Some((_, '$')) => {
        chars.next();

        match chars.peek() {
          Some((_, '$')) => {
            chars.next();

            match chars.peek() {
              Some((_, '{')) => {
                // $$${ -> literal $${
                literal.push_str("$${");
                chars.next();
              }
              _ => literal.push_str("$$$"),
            }
          }
          Some((_, '{')) => {
            chars.next();

            if !literal.is_empty() {
              segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }

            let mut content = String::new();
            let mut found_close = false;

            for (_, c) in chars.by_ref() {
              if c == '}' {
                found_close = true;
                break;
              }
              content.push(c);
            }

            if !found_close {
              return Err(PlaceholderError::Unclosed(pos));
            }

            segments.push(Segment::Placeholder(parse_placeholder_content(&content)?));
          }
          _ => literal.push_str("$$"),
        }
      }
      _ => literal.push('$'),
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

/// Parse the content inside a placeholder (everything between ${ and }).
fn parse_placeholder_content(content: &str) -> Result<Placeholder, PlaceholderError> {
  match content {
    "prefix" => return Ok(Placeholder::Prefix),
    "src" => return Ok(Placeholder::Src),
    "version" => return Ok(Placeholder::Version),
    "jobs" => return Ok(Placeholder::Jobs),
    _ => {}
  }

  let (kind, name) = content
    .split_once(':')
    .ok_or_else(|| PlaceholderError::UnknownType(content.to_string()))?;

  if name.is_empty() {
    return Err(PlaceholderError::Malformed(format!("missing name in '{content}'")));
  }

  match kind {
    "resource" => Ok(Placeholder::Resource(name.to_string())),
    "dep" => Ok(Placeholder::Dep(name.to_string())),
    "query" => Ok(Placeholder::Query(name.to_string())),
    _ => Err(PlaceholderError::UnknownType(kind.to_string())),
  }
}

/// Substitute all placeholders in a string using the provided resolver.
pub fn substitute(input: &str, resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let segments = parse(input)?;
  substitute_segments(&segments, resolver)
}

/// Substitute placeholders in pre-parsed segments.
pub fn substitute_segments(segments: &[Segment], resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let mut result = String::new();

  for segment in segments {
    match segment {
      Segment::Literal(s) => result.push_str(s),
      Segment::Placeholder(p) => {
        let value = match p {
          Placeholder::Prefix => resolver.resolve_prefix()?,
          Placeholder::Src => resolver.resolve_src()?,
          Placeholder::Version => resolver.resolve_version()?,
          Placeholder::Jobs => resolver.resolve_jobs()?,
          Placeholder::Resource(name) => resolver.resolve_resource(name)?,
          Placeholder::Dep(name) => resolver.resolve_dep(name)?,
          Placeholder::Query(name) => resolver.resolve_query(name)?,
        };
        result.push_str(value);
      }
    }
  }

  Ok(result)
}

/// Every placeholder referenced by `input`, in order of appearance.
pub fn references(input: &str) -> Result<Vec<Placeholder>, PlaceholderError> {
  Ok(
    parse(input)?
      .into_iter()
      .filter_map(|segment| match segment {
        Segment::Placeholder(p) => Some(p),
        Segment::Literal(_) => None,
      })
      .collect(),
  )
}

/// Names of the queries referenced by any of `inputs`, deduplicated, in order.
pub fn referenced_queries<'a>(inputs: impl IntoIterator<Item = &'a str>) -> Result<Vec<String>, PlaceholderError> {
  let mut names: Vec<String> = Vec::new();

  for input in inputs {
    for placeholder in references(input)? {
      if let Placeholder::Query(name) = placeholder {
        if !names.contains(&name) {
          names.push(name);
        }
      }
    }
  }

  Ok(names)
}
