//! Source tree patching.
//!
//! A patch list is applied in memory, in declaration order, and written out
//! only when every operation matched. A tree that was patched once carries
//! a marker file; patching it again is a mismatch.

pub mod diff;

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::path::{Component, Path, PathBuf};

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info};

use crate::consts::PATCHED_MARKER;
use crate::package::{Matcher, PatchOperation};
use crate::platform::Platform;

#[derive(Debug, Error)]
pub enum PatchError {
  /// `index` is the operation's 1-based position in its patch list.
  #[error("patch #{index} on {file} did not apply: {reason}")]
  Mismatch { file: String, index: usize, reason: String },

  #[error("failed to {action} {}: {source}", path.display())]
  Io {
    action: &'static str,
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// What a patch run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSummary {
  pub applied: usize,
  /// Operations gated to other platforms.
  pub skipped: usize,
  /// Files written, relative to the source root.
  pub files: Vec<String>,
}

/// In-memory view of the files touched by a patch list.
struct WorkingSet<'a> {
  root: &'a Path,
  /// `None` content means the file does not exist (or was deleted).
  files: BTreeMap<String, (Option<String>, Option<String>)>,
}

impl<'a> WorkingSet<'a> {
  fn new(root: &'a Path) -> Self {
    Self {
      root,
      files: BTreeMap::new(),
    }
  }

  fn load(&mut self, rel: &str) -> Result<&mut Option<String>, PatchError> {
    match self.files.entry(rel.to_string()) {
      Entry::Occupied(entry) => Ok(&mut entry.into_mut().1),
      Entry::Vacant(entry) => {
        let path = self.root.join(rel);
        let content = match std::fs::read_to_string(&path) {
          Ok(content) => Some(content),
          Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
          Err(source) => {
            return Err(PatchError::Io {
              action: "read",
              path,
              source,
            });
          }
        };
        Ok(&mut entry.insert((content.clone(), content)).1)
      }
    }
  }

  fn commit(self) -> Result<Vec<String>, PatchError> {
    let mut written = Vec::new();
    for (rel, (original, current)) in self.files {
      if original == current {
        continue;
      }
      let path = self.root.join(&rel);
      match current {
        Some(content) => {
          if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| PatchError::Io {
              action: "create",
              path: parent.to_path_buf(),
              source,
            })?;
          }
          std::fs::write(&path, content).map_err(|source| PatchError::Io {
            action: "write",
            path: path.clone(),
            source,
          })?;
        }
        None => std::fs::remove_file(&path).map_err(|source| PatchError::Io {
          action: "remove",
          path: path.clone(),
          source,
        })?,
      }
      written.push(rel);
    }
    Ok(written)
  }
}

/// Apply `patches` to the tree at `root` for the `platform` being built.
///
/// Nothing is written unless every applicable operation matched.
pub fn apply_patches(root: &Path, patches: &[PatchOperation], platform: &Platform) -> Result<PatchSummary, PatchError> {
  let applicable: Vec<(usize, &PatchOperation)> = patches
    .iter()
    .enumerate()
    .filter(|(_, op)| platform.matches(&op.platforms))
    .map(|(i, op)| (i + 1, op))
    .collect();

  let mut summary = PatchSummary {
    skipped: patches.len() - applicable.len(),
    ..Default::default()
  };
  if applicable.is_empty() {
    debug!(root = %root.display(), "no patches apply");
    return Ok(summary);
  }

  if root.join(PATCHED_MARKER).exists() {
    let (index, op) = applicable[0];
    return Err(PatchError::Mismatch {
      file: op.file.clone().unwrap_or_else(|| PATCHED_MARKER.to_string()),
      index,
      reason: "source tree is already patched".to_string(),
    });
  }

  let mut set = WorkingSet::new(root);
  for (index, op) in &applicable {
    apply_one(&mut set, *index, op)?;
    summary.applied += 1;
  }

  summary.files = set.commit()?;
  let marker = root.join(PATCHED_MARKER);
  std::fs::write(&marker, format!("{}\n", summary.applied)).map_err(|source| PatchError::Io {
    action: "write",
    path: marker,
    source,
  })?;

  info!(
    root = %root.display(),
    applied = summary.applied,
    skipped = summary.skipped,
    "patches applied"
  );
  Ok(summary)
}

fn apply_one(set: &mut WorkingSet<'_>, index: usize, op: &PatchOperation) -> Result<(), PatchError> {
  let mismatch = |file: &str, reason: String| PatchError::Mismatch {
    file: file.to_string(),
    index,
    reason,
  };

  if let Matcher::Diff { text, strip } = &op.matcher {
    let files = diff::parse(text, *strip).map_err(|reason| mismatch("<diff>", reason))?;
    for file in files {
      let target = file.target().to_string();
      let slot = set.load(&target)?;
      match (&file.old_path, slot.as_deref()) {
        (Some(_), None) => return Err(mismatch(&target, "file does not exist".to_string())),
        (None, Some(_)) => return Err(mismatch(&target, "file to be created already exists".to_string())),
        _ => {}
      }
      let current = slot.as_deref().unwrap_or("");
      let patched = diff::apply(current, &file.hunks).map_err(|reason| mismatch(&target, reason))?;
      *slot = file.new_path.as_ref().map(|_| patched);
      debug!(file = %target, hunks = file.hunks.len(), "applied diff");
    }
    return Ok(());
  }

  // Validated at load time: every other matcher names a file.
  let file = op.file.as_deref().unwrap_or_default();
  if !is_relative_inside(file) {
    return Err(mismatch(file, "path escapes the source root".to_string()));
  }

  let slot = set.load(file)?;
  let Some(content) = slot.as_deref() else {
    return Err(mismatch(file, "file does not exist".to_string()));
  };

  let patched = edit(content, &op.matcher, &op.replace, op.all).map_err(|reason| mismatch(file, reason))?;
  debug!(file = %file, matcher = op.matcher.kind(), "applied patch");
  *slot = Some(patched);
  Ok(())
}

/// Apply a single non-diff matcher to `content`.
fn edit(content: &str, matcher: &Matcher, replace: &str, all: bool) -> Result<String, String> {
  match matcher {
    Matcher::Exact(find) => {
      if find.is_empty() || !content.contains(find.as_str()) {
        return Err(format!("text not found: {:?}", find));
      }
      Ok(if all {
        content.replace(find.as_str(), replace)
      } else {
        content.replacen(find.as_str(), replace, 1)
      })
    }
    Matcher::Regex(pattern) => {
      let re = Regex::new(pattern).map_err(|e| format!("invalid regex: {}", e))?;
      if !re.is_match(content) {
        return Err(format!("regex did not match: {}", pattern));
      }
      Ok(if all {
        re.replace_all(content, replace).into_owned()
      } else {
        re.replace(content, replace).into_owned()
      })
    }
    Matcher::Lines { start, end } => replace_lines(content, *start, *end, replace),
    Matcher::MakeVar(name) => change_make_var(content, name, replace),
    Matcher::Diff { .. } => Err("diff is not a single-file matcher".to_string()),
  }
}

fn replace_lines(content: &str, start: usize, end: usize, replace: &str) -> Result<String, String> {
  let lines: Vec<&str> = content.split_inclusive('\n').collect();
  if start == 0 || start > end || end > lines.len() {
    return Err(format!("line range {}-{} is outside 1-{}", start, end, lines.len()));
  }

  let mut out = String::with_capacity(content.len() + replace.len());
  for line in &lines[..start - 1] {
    out.push_str(line);
  }
  out.push_str(replace);
  if lines[end - 1].ends_with('\n') && !replace.is_empty() && !replace.ends_with('\n') {
    out.push('\n');
  }
  for line in &lines[end..] {
    out.push_str(line);
  }
  Ok(out)
}

/// Rewrite the value of a Makefile assignment `NAME = value`, including
/// backslash-continued values. The assignment operator is kept.
fn change_make_var(content: &str, name: &str, value: &str) -> Result<String, String> {
  let pattern = format!(r"(?m)^({})([ \t]*[+:?]?=)[ \t]*(?:.*\\\n)*.*$", regex::escape(name));
  let re = Regex::new(&pattern).map_err(|e| e.to_string())?;
  if !re.is_match(content) {
    return Err(format!("make variable {} not found", name));
  }
  Ok(
    re.replace_all(content, |caps: &regex::Captures<'_>| format!("{}{} {}", &caps[1], &caps[2], value))
      .into_owned(),
  )
}

fn is_relative_inside(path: &str) -> bool {
  Path::new(path)
    .components()
    .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
