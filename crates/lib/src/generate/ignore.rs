//! `.dockerignore` handling.
//!
//! Patterns are relative to the directory holding the ignore file. A path is
//! ignored when the last pattern matching it, or matching one of its parent
//! directories, is not a `!` pattern.

use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};

use crate::consts::DOCKERIGNORE;

/// Read the ignore patterns of a definition directory.
///
/// A missing ignore file yields no patterns. Blank lines and `#` comments are
/// dropped.
pub fn read_patterns(dir: &Path) -> std::io::Result<Vec<String>> {
  let path = dir.join(DOCKERIGNORE);
  let content = match std::fs::read_to_string(&path) {
    Ok(content) => content,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
    Err(e) => return Err(e),
  };

  Ok(
    content
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty() && !line.starts_with('#'))
      .map(str::to_string)
      .collect(),
  )
}

struct Rule {
  matcher: GlobMatcher,
  negated: bool,
}

/// Compiled ignore patterns of one directory.
pub struct IgnoreMatcher {
  rules: Vec<Rule>,
}

impl IgnoreMatcher {
  pub fn new(patterns: &[String]) -> Result<Self, globset::Error> {
    let mut rules = Vec::with_capacity(patterns.len());

    for pattern in patterns {
      let (negated, pattern) = match pattern.strip_prefix('!') {
        Some(rest) => (true, rest.trim()),
        None => (false, pattern.as_str()),
      };
      let pattern = pattern.trim_start_matches("./").trim_matches('/');
      if pattern.is_empty() {
        continue;
      }

      let matcher = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()?
        .compile_matcher();
      rules.push(Rule { matcher, negated });
    }

    Ok(Self { rules })
  }

  pub fn is_empty(&self) -> bool {
    self.rules.is_empty()
  }

  /// Whether `rel_path` (relative, `/`-separated) is excluded.
  pub fn is_ignored(&self, rel_path: &str) -> bool {
    let candidates: Vec<&str> = rel_path
      .match_indices('/')
      .map(|(idx, _)| &rel_path[..idx])
      .chain(std::iter::once(rel_path))
      .collect();

    let mut ignored = false;
    for rule in &self.rules {
      if candidates.iter().any(|candidate| rule.matcher.is_match(candidate)) {
        ignored = !rule.negated;
      }
    }
    ignored
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn matcher(patterns: &[&str]) -> IgnoreMatcher {
    let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
    IgnoreMatcher::new(&patterns).unwrap()
  }

  #[test]
  fn reads_patterns_skipping_comments() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join(".dockerignore"), "# comment\n\n*.md\n!README.md\n").unwrap();

    let patterns = read_patterns(temp.path()).unwrap();
    assert_eq!(patterns, vec!["*.md", "!README.md"]);
  }

  #[test]
  fn missing_ignore_file_is_empty() {
    let temp = TempDir::new().unwrap();
    assert!(read_patterns(temp.path()).unwrap().is_empty());
  }

  #[test]
  fn star_does_not_cross_directories() {
    let m = matcher(&["*.md"]);
    assert!(m.is_ignored("notes.md"));
    assert!(!m.is_ignored("docs/notes.md"));

    let m = matcher(&["**/*.md"]);
    assert!(m.is_ignored("docs/notes.md"));
  }

  #[test]
  fn last_match_wins() {
    let m = matcher(&["*.md", "!README.md"]);
    assert!(m.is_ignored("CHANGELOG.md"));
    assert!(!m.is_ignored("README.md"));

    let m = matcher(&["!README.md", "*.md"]);
    assert!(m.is_ignored("README.md"));
  }

  #[test]
  fn directory_pattern_ignores_contents() {
    let m = matcher(&["build/", "/tmp"]);
    assert!(m.is_ignored("build/out/app.bin"));
    assert!(m.is_ignored("tmp/cache"));
    assert!(!m.is_ignored("src/build.rs"));
  }

  #[test]
  fn invalid_pattern_fails() {
    let patterns = vec!["[unclosed".to_string()];
    assert!(IgnoreMatcher::new(&patterns).is_err());
  }
}
