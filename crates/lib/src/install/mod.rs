//! Installing artifacts into the prefix.
//!
//! Relative source paths of `copy` are taken from the source root; every
//! other relative path is taken from the install prefix. Absolute paths
//! (usually produced by `$${prefix}` or `$${query:...}`) are used as given.

pub mod receipt;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::package::InstallArtifact;
use crate::placeholder::{PlaceholderError, Resolver, substitute};

pub use receipt::{Receipt, ReceiptDependency, ReceiptResource, ReceiptSource, read_receipt, write_receipt};

#[derive(Debug, Error)]
pub enum InstallError {
  /// `index` is the artifact's 1-based position in its list.
  #[error("install #{index} ({action}) failed for {}: {reason}", path.display())]
  Artifact {
    index: usize,
    action: &'static str,
    path: PathBuf,
    reason: String,
  },

  #[error("install #{index}: {source}")]
  Placeholder {
    index: usize,
    #[source]
    source: PlaceholderError,
  },

  #[error("failed to write receipt {}: {source}", path.display())]
  Receipt {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid receipt {}: {source}", path.display())]
  ReceiptFormat {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

/// Base directories relative artifact paths resolve against.
#[derive(Debug, Clone, Copy)]
pub struct InstallRoots<'a> {
  pub src: &'a Path,
  pub prefix: &'a Path,
}

/// Perform `artifacts` in order, stopping at the first failure.
pub fn install_artifacts(
  artifacts: &[InstallArtifact],
  roots: InstallRoots<'_>,
  resolver: &impl Resolver,
) -> Result<usize, InstallError> {
  for (i, artifact) in artifacts.iter().enumerate() {
    let index = i + 1;
    let resolve = |s: &str| substitute(s, resolver).map_err(|source| InstallError::Placeholder { index, source });

    match artifact {
      InstallArtifact::Copy { from, to } => {
        let from = roots.src.join(resolve(from.as_str())?);
        let to = roots.prefix.join(resolve(to.as_str())?);
        copy(&from, &to).map_err(|e| failure(index, "copy", &from, e))?;
      }
      InstallArtifact::Symlink { target, link } => {
        let target = PathBuf::from(resolve(target.as_str())?);
        let link = roots.prefix.join(resolve(link.as_str())?);
        symlink(&target, &link).map_err(|e| failure(index, "symlink", &link, e))?;
      }
      InstallArtifact::LinkGlob { pattern, into } => {
        let pattern = roots.prefix.join(resolve(pattern.as_str())?);
        let into = roots.prefix.join(resolve(into.as_str())?);
        link_glob(&pattern, &into).map_err(|e| failure(index, "link_glob", &pattern, e))?;
      }
      InstallArtifact::Remove { path } => {
        let path = roots.prefix.join(resolve(path.as_str())?);
        remove(&path).map_err(|e| failure(index, "remove", &path, e))?;
      }
    }
  }

  if !artifacts.is_empty() {
    info!(prefix = %roots.prefix.display(), count = artifacts.len(), "installed artifacts");
  }
  Ok(artifacts.len())
}

fn failure(index: usize, action: &'static str, path: &Path, err: io::Error) -> InstallError {
  InstallError::Artifact {
    index,
    action,
    path: path.to_path_buf(),
    reason: err.to_string(),
  }
}

/// Copy a file or a directory tree. Copying into an existing directory keeps
/// the source's file name.
fn copy(from: &Path, to: &Path) -> io::Result<()> {
  let meta = std::fs::metadata(from)?;
  let dest = if to.is_dir() {
    match from.file_name() {
      Some(name) => to.join(name),
      None => to.to_path_buf(),
    }
  } else {
    to.to_path_buf()
  };

  if !meta.is_dir() {
    create_parent(&dest)?;
    std::fs::copy(from, &dest)?;
    debug!(from = %from.display(), to = %dest.display(), "copied file");
    return Ok(());
  }

  for entry in WalkDir::new(from) {
    let entry = entry.map_err(io::Error::other)?;
    let rel = entry.path().strip_prefix(from).map_err(io::Error::other)?;
    let target = dest.join(rel);

    if entry.file_type().is_dir() {
      std::fs::create_dir_all(&target)?;
    } else if entry.file_type().is_symlink() {
      let link_target = std::fs::read_link(entry.path())?;
      symlink(&link_target, &target)?;
    } else {
      create_parent(&target)?;
      std::fs::copy(entry.path(), &target)?;
    }
  }
  debug!(from = %from.display(), to = %dest.display(), "copied tree");
  Ok(())
}

/// Create (or replace) a symlink at `link` pointing to `target`.
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
  create_parent(link)?;
  if link.symlink_metadata().is_ok() {
    remove(link)?;
  }

  #[cfg(unix)]
  std::os::unix::fs::symlink(target, link)?;

  #[cfg(windows)]
  {
    let resolved = link.parent().map(|p| p.join(target)).unwrap_or_else(|| target.to_path_buf());
    if resolved.is_dir() {
      std::os::windows::fs::symlink_dir(target, link)?;
    } else {
      std::os::windows::fs::symlink_file(target, link)?;
    }
  }

  debug!(link = %link.display(), target = %target.display(), "created symlink");
  Ok(())
}

/// Symlink every match of `pattern` into the directory `into`.
fn link_glob(pattern: &Path, into: &Path) -> io::Result<()> {
  let pattern = pattern.to_string_lossy();
  let paths = glob::glob(&pattern).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

  std::fs::create_dir_all(into)?;
  let mut linked = 0;
  for path in paths {
    let path = path.map_err(|e| io::Error::other(e.to_string()))?;
    let Some(name) = path.file_name() else { continue };
    symlink(&path, &into.join(name))?;
    linked += 1;
  }

  if linked == 0 {
    return Err(io::Error::new(io::ErrorKind::NotFound, "pattern matched nothing"));
  }
  debug!(pattern = %pattern, into = %into.display(), linked, "linked glob matches");
  Ok(())
}

/// Remove a file, symlink or directory tree. A missing path is not an error.
fn remove(path: &Path) -> io::Result<()> {
  match path.symlink_metadata() {
    Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
    Ok(_) => std::fs::remove_file(path),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e),
  }
}

fn create_parent(path: &Path) -> io::Result<()> {
  match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
    _ => Ok(()),
  }
}
