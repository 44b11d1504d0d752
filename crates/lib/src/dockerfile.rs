//! Image definition parsing and build-time ref substitution.
//!
//! Only the instructions the graph needs are understood: `FROM` lines give the
//! base images, `LABEL` lines give the image metadata and `ARG` lines name the
//! build arguments that take part in the image hash. Everything else is left
//! to the builder.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::DOCKERFILE_SUFFIX;

/// Errors raised while reading or rewriting a definition file.
#[derive(Debug, Error)]
pub enum DockerfileError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// The parts of a definition file the graph cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dockerfile {
  /// Directory holding the definition, also the build context.
  pub context_path: PathBuf,
  /// File name of the definition inside `context_path`.
  pub filename: String,
  /// Base image names (without tag or digest), in declaration order.
  pub from: Vec<String>,
  pub labels: BTreeMap<String, String>,
  /// Declared build arguments and their default values.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub args: BTreeMap<String, Option<String>>,
}

impl Dockerfile {
  /// Full path of the definition file.
  pub fn path(&self) -> PathBuf {
    self.context_path.join(&self.filename)
  }

  /// Definition content with `build_args` applied to its `ARG` lines, read from
  /// disk. `None` if no declared argument is overridden.
  pub fn content_with_args(&self, build_args: &BTreeMap<String, String>) -> Result<Option<String>, DockerfileError> {
    if !build_args.keys().any(|key| self.args.contains_key(key)) {
      return Ok(None);
    }

    let path = self.path();
    let content = std::fs::read_to_string(&path).map_err(|source| DockerfileError::Read { path, source })?;
    Ok(override_args(&content, build_args))
  }
}

/// Check whether a file is an image definition.
pub fn is_dockerfile(path: &Path) -> bool {
  path
    .file_name()
    .and_then(|name| name.to_str())
    .is_some_and(|name| name.ends_with(DOCKERFILE_SUFFIX))
}

/// Parse a definition file from disk.
pub fn parse(path: &Path) -> Result<Dockerfile, DockerfileError> {
  debug!(path = %path.display(), "parsing definition");

  let content = std::fs::read_to_string(path).map_err(|source| DockerfileError::Read {
    path: path.to_path_buf(),
    source,
  })?;

  let context_path = path.parent().map(Path::to_path_buf).unwrap_or_default();
  let filename = path
    .file_name()
    .map(|name| name.to_string_lossy().to_string())
    .unwrap_or_default();

  let dockerfile = parse_str(context_path, filename, &content);
  debug!(from = ?dockerfile.from, labels = ?dockerfile.labels, "parsed definition");

  Ok(dockerfile)
}

/// Parse definition content.
pub fn parse_str(context_path: PathBuf, filename: String, content: &str) -> Dockerfile {
  let mut dockerfile = Dockerfile {
    context_path,
    filename,
    ..Default::default()
  };

  for line in content.lines() {
    let line = line.trim();
    let Some((instruction, rest)) = line.split_once(char::is_whitespace) else {
      continue;
    };

    if instruction.eq_ignore_ascii_case("FROM") {
      // Flags such as --platform come before the image ref.
      if let Some(image_ref) = rest.split_whitespace().find(|token| !token.starts_with("--")) {
        dockerfile.from.push(image_name(image_ref).to_string());
      }
    } else if instruction.eq_ignore_ascii_case("LABEL") {
      dockerfile.labels.extend(parse_label_pairs(rest));
    } else if instruction.eq_ignore_ascii_case("ARG") {
      if let Some((key, default)) = parse_arg(rest) {
        dockerfile.args.insert(key, default);
      }
    }
  }

  dockerfile
}

/// Parse the operand of an `ARG` instruction into its name and default value.
fn parse_arg(rest: &str) -> Option<(String, Option<String>)> {
  let declaration = rest.split_whitespace().next()?;
  match declaration.split_once('=') {
    Some((key, value)) if !key.is_empty() => Some((key.to_string(), Some(value.trim_matches('"').to_string()))),
    Some(_) => None,
    None => Some((declaration.to_string(), None)),
  }
}

/// Rewrite every `ARG` line declaring a key of `build_args` to
/// `ARG <key>=<value>`.
///
/// Returns `None` when the content is left unchanged.
pub fn override_args(content: &str, build_args: &BTreeMap<String, String>) -> Option<String> {
  if build_args.is_empty() {
    return None;
  }

  let mut changed = false;
  let lines: Vec<String> = content
    .lines()
    .map(|line| {
      let override_line = line
        .trim()
        .split_once(char::is_whitespace)
        .filter(|(instruction, _)| instruction.eq_ignore_ascii_case("ARG"))
        .and_then(|(_, rest)| parse_arg(rest))
        .and_then(|(key, _)| build_args.get(&key).map(|value| format!("ARG {}={}", key, value)));

      match override_line {
        Some(replacement) if replacement != line => {
          changed = true;
          replacement
        }
        _ => line.to_string(),
      }
    })
    .collect();

  if !changed {
    return None;
  }

  let mut rewritten = lines.join("\n");
  if content.ends_with('\n') {
    rewritten.push('\n');
  }
  Some(rewritten)
}

/// Strip the tag and digest from an image ref.
///
/// A colon only starts a tag when it comes after the last `/`, so registry
/// ports are preserved: `registry:5000/app:1.0` gives `registry:5000/app`.
pub fn image_name(image_ref: &str) -> &str {
  let without_digest = image_ref.split_once('@').map_or(image_ref, |(name, _)| name);
  let last_slash = without_digest.rfind('/').map_or(0, |idx| idx + 1);

  match without_digest[last_slash..].find(':') {
    Some(colon) => &without_digest[..last_slash + colon],
    None => without_digest,
  }
}

/// Parse `key=value` pairs of a LABEL instruction. Values may be double-quoted.
fn parse_label_pairs(input: &str) -> Vec<(String, String)> {
  let mut pairs = Vec::new();
  let mut chars = input.trim().chars().peekable();

  loop {
    while chars.next_if(|c| c.is_whitespace()).is_some() {}

    let mut key = String::new();
    while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
      key.push(c);
    }
    if key.is_empty() || chars.next_if_eq(&'=').is_none() {
      break;
    }

    let mut value = String::new();
    if chars.next_if_eq(&'"').is_some() {
      while let Some(c) = chars.next() {
        match c {
          '"' => break,
          '\\' => {
            if let Some(escaped) = chars.next() {
              value.push(escaped);
            }
          }
          _ => value.push(c),
        }
      }
    } else {
      while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
        value.push(c);
      }
    }

    pairs.push((key.trim_matches('"').to_string(), value));
  }

  pairs
}

/// A definition file whose refs were rewritten for the duration of a build.
///
/// Call [`ReplacedFile::restore`] once the build is over, whatever its outcome.
#[derive(Debug)]
pub struct ReplacedFile {
  path: PathBuf,
  original: Option<String>,
}

impl ReplacedFile {
  /// Write back the original content. A no-op if nothing was replaced.
  pub async fn restore(self) -> Result<(), DockerfileError> {
    let Some(original) = self.original else {
      return Ok(());
    };

    tokio::fs::write(&self.path, original)
      .await
      .map_err(|source| DockerfileError::Write { path: self.path, source })
  }
}

/// Replace every occurrence of each key of `replacements` by its value.
pub async fn replace_in_file(
  path: &Path,
  replacements: &BTreeMap<String, String>,
) -> Result<ReplacedFile, DockerfileError> {
  let original = tokio::fs::read_to_string(path)
    .await
    .map_err(|source| DockerfileError::Read {
      path: path.to_path_buf(),
      source,
    })?;

  let mut content = original.clone();
  for (from, to) in replacements {
    content = content.replace(from.as_str(), to);
  }

  if content == original {
    return Ok(ReplacedFile {
      path: path.to_path_buf(),
      original: None,
    });
  }

  tokio::fs::write(path, content)
    .await
    .map_err(|source| DockerfileError::Write {
      path: path.to_path_buf(),
      source,
    })?;

  Ok(ReplacedFile {
    path: path.to_path_buf(),
    original: Some(original),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn detects_definition_files() {
    assert!(is_dockerfile(Path::new("docker/base/Dockerfile")));
    assert!(is_dockerfile(Path::new("docker/base/debug.Dockerfile")));
    assert!(!is_dockerfile(Path::new("docker/base/Dockerfile.orig")));
    assert!(!is_dockerfile(Path::new("docker/base/README.md")));
  }

  #[test]
  fn parses_from_and_labels() {
    let content = r#"
FROM registry.example.org/bullseye:latest AS builder
FROM --platform=linux/amd64 registry.example.org/tools@sha256:abcdef
LABEL name="first"
LABEL version=1 imgtree.extra-tags="stable,v1"
RUN echo hello
"#;
    let dockerfile = parse_str(PathBuf::from("docker/first"), "Dockerfile".to_string(), content);

    assert_eq!(
      dockerfile.from,
      vec!["registry.example.org/bullseye", "registry.example.org/tools"]
    );
    assert_eq!(dockerfile.labels["name"], "first");
    assert_eq!(dockerfile.labels["version"], "1");
    assert_eq!(dockerfile.labels["imgtree.extra-tags"], "stable,v1");
    assert_eq!(dockerfile.path(), PathBuf::from("docker/first/Dockerfile"));
  }

  #[test]
  fn parses_arg_declarations() {
    let content = "FROM debian:bullseye\nARG VERSION=1.2\narg TOKEN\n";
    let dockerfile = parse_str(PathBuf::from("ctx"), "Dockerfile".to_string(), content);

    assert_eq!(dockerfile.args["VERSION"].as_deref(), Some("1.2"));
    assert_eq!(dockerfile.args["TOKEN"], None);
  }

  #[test]
  fn override_args_rewrites_declared_args_only() {
    let content = "FROM debian:bullseye\nARG VERSION=1\nARG TOKEN\nRUN echo $VERSION\n";
    let build_args = BTreeMap::from([
      ("VERSION".to_string(), "2".to_string()),
      ("TOKEN".to_string(), "secret".to_string()),
    ]);

    assert_eq!(
      override_args(content, &build_args).unwrap(),
      "FROM debian:bullseye\nARG VERSION=2\nARG TOKEN=secret\nRUN echo $VERSION\n"
    );

    let undeclared = BTreeMap::from([("OTHER".to_string(), "x".to_string())]);
    assert_eq!(override_args(content, &undeclared), None);

    let unchanged = BTreeMap::from([("VERSION".to_string(), "1".to_string())]);
    assert_eq!(override_args(content, &unchanged), None);
  }

  #[test]
  fn content_with_args_leaves_file_untouched() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("Dockerfile");
    std::fs::write(&path, "FROM debian:bullseye\nARG VERSION=1\n").unwrap();
    let dockerfile = parse(&path).unwrap();

    let build_args = BTreeMap::from([("VERSION".to_string(), "2".to_string())]);
    let content = dockerfile.content_with_args(&build_args).unwrap().unwrap();

    assert!(content.contains("ARG VERSION=2"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "FROM debian:bullseye\nARG VERSION=1\n");
    assert_eq!(dockerfile.content_with_args(&BTreeMap::new()).unwrap(), None);
  }

  #[test]
  fn image_name_keeps_registry_port() {
    assert_eq!(image_name("debian:bullseye"), "debian");
    assert_eq!(image_name("registry:5000/app:1.0"), "registry:5000/app");
    assert_eq!(image_name("registry:5000/app"), "registry:5000/app");
    assert_eq!(image_name("alpine@sha256:1234"), "alpine");
  }

  #[tokio::test]
  async fn replace_then_restore_is_symmetric() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("Dockerfile");
    let content = "FROM registry.example.org/bullseye:latest\nLABEL name=\"first\"\n";
    std::fs::write(&path, content).unwrap();

    let replacements = BTreeMap::from([(
      "registry.example.org/bullseye:latest".to_string(),
      "registry.example.org/bullseye:dev-golf-quebec-hotel-lima".to_string(),
    )]);

    let replaced = replace_in_file(&path, &replacements).await.unwrap();
    let during = std::fs::read_to_string(&path).unwrap();
    assert!(during.contains("bullseye:dev-golf-quebec-hotel-lima"));
    assert!(!during.contains("bullseye:latest"));

    replaced.restore().await.unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), content);
  }

  #[tokio::test]
  async fn replace_without_match_leaves_file_untouched() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("Dockerfile");
    std::fs::write(&path, "FROM debian:bullseye\n").unwrap();

    let replacements = BTreeMap::from([("other:latest".to_string(), "other:v1".to_string())]);
    let replaced = replace_in_file(&path, &replacements).await.unwrap();
    replaced.restore().await.unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "FROM debian:bullseye\n");
  }

  #[test]
  fn parse_missing_file_fails() {
    let temp = TempDir::new().unwrap();
    let err = parse(&temp.path().join("Dockerfile")).unwrap_err();
    assert!(matches!(err, DockerfileError::Read { .. }));
  }
}
