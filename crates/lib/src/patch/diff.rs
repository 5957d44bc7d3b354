//! Minimal unified diff support.
//!
//! Hunks must match their context and removed lines exactly. A hunk is first
//! tried at the position its header names, then anywhere after the previous
//! hunk, so diffs made against a slightly shifted file still apply.

/// One file's worth of a unified diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
  /// Target path after stripping, `None` when the file is created.
  pub old_path: Option<String>,
  /// Target path after stripping, `None` when the file is deleted.
  pub new_path: Option<String>,
  pub hunks: Vec<Hunk>,
}

impl FilePatch {
  /// Path the patch applies to, whichever side names it.
  pub fn target(&self) -> &str {
    self.new_path.as_deref().or(self.old_path.as_deref()).unwrap_or("")
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
  /// 1-based line the hunk starts at in the old file.
  pub old_start: usize,
  pub lines: Vec<HunkLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
  Context(String),
  Remove(String),
  Add(String),
}

impl Hunk {
  fn old_lines(&self) -> Vec<&str> {
    self
      .lines
      .iter()
      .filter_map(|l| match l {
        HunkLine::Context(s) | HunkLine::Remove(s) => Some(s.as_str()),
        HunkLine::Add(_) => None,
      })
      .collect()
  }

  fn new_lines(&self) -> Vec<&str> {
    self
      .lines
      .iter()
      .filter_map(|l| match l {
        HunkLine::Context(s) | HunkLine::Add(s) => Some(s.as_str()),
        HunkLine::Remove(_) => None,
      })
      .collect()
  }
}

/// Parse a unified diff, stripping `strip` leading path components.
pub fn parse(text: &str, strip: usize) -> Result<Vec<FilePatch>, String> {
  let lines: Vec<&str> = text.lines().collect();
  let mut patches = Vec::new();
  let mut i = 0;

  while i < lines.len() {
    let Some(old) = lines[i].strip_prefix("--- ") else {
      i += 1;
      continue;
    };
    let new = lines
      .get(i + 1)
      .and_then(|l| l.strip_prefix("+++ "))
      .ok_or_else(|| format!("line {}: '---' header without '+++'", i + 1))?;
    i += 2;

    let mut patch = FilePatch {
      old_path: strip_path(old, strip)?,
      new_path: strip_path(new, strip)?,
      hunks: Vec::new(),
    };

    while i < lines.len() && lines[i].starts_with("@@") {
      let (hunk, next) = parse_hunk(&lines, i)?;
      patch.hunks.push(hunk);
      i = next;
    }

    if patch.hunks.is_empty() {
      return Err(format!("no hunks for {}", patch.target()));
    }
    patches.push(patch);
  }

  if patches.is_empty() {
    return Err("diff contains no file headers".to_string());
  }
  Ok(patches)
}

fn strip_path(header: &str, strip: usize) -> Result<Option<String>, String> {
  let path = header.split('\t').next().unwrap_or(header).trim();
  if path == "/dev/null" {
    return Ok(None);
  }

  let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
  if parts.len() <= strip {
    return Err(format!("cannot strip {} components from '{}'", strip, path));
  }

  let stripped = &parts[strip..];
  if (path.starts_with('/') && strip == 0) || stripped.iter().any(|p| *p == "..") {
    return Err(format!("path '{}' escapes the source root", path));
  }
  Ok(Some(stripped.join("/")))
}

fn parse_hunk(lines: &[&str], at: usize) -> Result<(Hunk, usize), String> {
  let header = lines[at];
  let (old_start, old_count, new_count) =
    parse_hunk_header(header).ok_or_else(|| format!("line {}: malformed hunk header '{}'", at + 1, header))?;

  let mut hunk = Hunk {
    old_start,
    lines: Vec::new(),
  };
  let (mut old_seen, mut new_seen) = (0, 0);
  let mut i = at + 1;

  while old_seen < old_count || new_seen < new_count {
    let Some(line) = lines.get(i) else {
      return Err(format!("hunk at line {} is truncated", at + 1));
    };
    i += 1;

    if line.starts_with('\\') {
      continue;
    }
    match line.chars().next() {
      Some('+') => {
        hunk.lines.push(HunkLine::Add(line[1..].to_string()));
        new_seen += 1;
      }
      Some('-') => {
        hunk.lines.push(HunkLine::Remove(line[1..].to_string()));
        old_seen += 1;
      }
      Some(' ') => {
        hunk.lines.push(HunkLine::Context(line[1..].to_string()));
        old_seen += 1;
        new_seen += 1;
      }
      // Some tools trim the single space of an empty context line.
      None => {
        hunk.lines.push(HunkLine::Context(String::new()));
        old_seen += 1;
        new_seen += 1;
      }
      Some(_) => return Err(format!("line {}: unexpected '{}' in hunk", i, line)),
    }
  }

  while lines.get(i).is_some_and(|l| l.starts_with('\\')) {
    i += 1;
  }

  Ok((hunk, i))
}

/// `@@ -a[,b] +c[,d] @@` → (a, b, d)
fn parse_hunk_header(header: &str) -> Option<(usize, usize, usize)> {
  let body = header.strip_prefix("@@ ")?;
  let end = body.find(" @@")?;
  let mut ranges = body[..end].split_whitespace();
  let old = ranges.next()?.strip_prefix('-')?;
  let new = ranges.next()?.strip_prefix('+')?;

  let range = |s: &str| -> Option<(usize, usize)> {
    match s.split_once(',') {
      Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
      None => Some((s.parse().ok()?, 1)),
    }
  };

  let (old_start, old_count) = range(old)?;
  let (_, new_count) = range(new)?;
  Some((old_start, old_count, new_count))
}

/// Apply hunks to `content`, returning the new text.
pub fn apply(content: &str, hunks: &[Hunk]) -> Result<String, String> {
  let trailing_newline = content.is_empty() || content.ends_with('\n');
  let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
  let mut floor = 0;
  let mut shift: isize = 0;

  for (n, hunk) in hunks.iter().enumerate() {
    let old = hunk.old_lines();
    // A pure insertion names the line it follows rather than the first line it replaces.
    let first = if old.is_empty() { hunk.old_start } else { hunk.old_start.saturating_sub(1) };
    let expected_at = ((first as isize + shift).max(0) as usize).min(lines.len());

    let at = if matches_at(&lines, &old, expected_at) && expected_at >= floor {
      expected_at
    } else {
      (floor..=lines.len().saturating_sub(old.len()))
        .find(|&pos| matches_at(&lines, &old, pos))
        .ok_or_else(|| format!("hunk {} does not match (expected near line {})", n + 1, hunk.old_start))?
    };

    let new: Vec<String> = hunk.new_lines().into_iter().map(str::to_string).collect();
    let added = new.len();
    lines.splice(at..at + old.len(), new);
    floor = at + added;
    shift += added as isize - old.len() as isize;
  }

  let mut out = lines.join("\n");
  if trailing_newline && !lines.is_empty() {
    out.push('\n');
  }
  Ok(out)
}

fn matches_at(lines: &[String], old: &[&str], at: usize) -> bool {
  at + old.len() <= lines.len() && lines[at..at + old.len()].iter().zip(old).all(|(a, b)| a == b)
}
