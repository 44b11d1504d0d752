//! Hashing utilities for content-derived image versions.
//!
//! This module provides:
//! - `ContentHash`: a full 64-character SHA-256 of a file
//! - `hash_files()`: the digest of an image's files and parent versions
//! - `humanize()`: the word-based rendering of that digest

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::consts::HUMANIZED_HASH_WORDS;
use crate::util::wordlist::DEFAULT_WORD_LIST;

/// Number of entries a humanizing word list must have, one per byte value.
pub const WORD_LIST_LEN: usize = 256;

/// A full 64-character SHA256 hash for content verification.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Error during image hashing.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
  #[error("file names with newlines are not supported: {0:?}")]
  NewlineInPath(PathBuf),

  #[error("failed to read file {path}: {message}")]
  ReadFile { path: String, message: String },

  #[error("word list must contain exactly {len} words, got {0}", len = WORD_LIST_LEN)]
  InvalidWordList(usize),

  #[error("cannot humanize a {len}-byte digest into {words} words")]
  DigestTooShort { len: usize, words: usize },
}

/// Hash a file's contents.
///
/// Returns the full 64-character SHA256 hash of the file.
pub fn hash_file(path: &Path) -> Result<ContentHash, HashError> {
  let mut file = fs::File::open(path).map_err(|e| HashError::ReadFile {
    path: path.display().to_string(),
    message: e.to_string(),
  })?;

  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(|e| HashError::ReadFile {
      path: path.display().to_string(),
      message: e.to_string(),
    })?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Compute the humanized version of an image.
///
/// The digest covers, in order:
/// - one `"<sha256>  <name>\n"` line per file, sorted by name, where the name is
///   relative to `base_dir` so moving the whole tree keeps hashes stable
/// - the sorted parent versions
///
/// Renaming a file changes the version even if its content does not.
pub fn hash_files<S: AsRef<str>>(
  base_dir: &Path,
  files: &[PathBuf],
  parent_hashes: &[String],
  word_list: &[S],
) -> Result<String, HashError> {
  hash_files_overriding(base_dir, files, &HashMap::new(), parent_hashes, word_list)
}

/// Like [`hash_files`], hashing the given content in place of what is on disk
/// for every file listed in `overrides`.
pub fn hash_files_overriding<S: AsRef<str>>(
  base_dir: &Path,
  files: &[PathBuf],
  overrides: &HashMap<PathBuf, String>,
  parent_hashes: &[String],
  word_list: &[S],
) -> Result<String, HashError> {
  let mut named: Vec<(String, &PathBuf)> = Vec::with_capacity(files.len());
  for file in files {
    let name = relative_name(base_dir, file);
    if name.contains('\n') {
      return Err(HashError::NewlineInPath(file.clone()));
    }
    named.push((name, file));
  }
  named.sort();

  let mut hasher = Sha256::new();
  for (name, file) in named {
    let content_hash = match overrides.get(file) {
      Some(content) => hash_content(content.as_bytes()),
      None => hash_file(file)?,
    };
    hasher.update(format!("{}  {}\n", content_hash, name).as_bytes());
  }

  let mut parents = parent_hashes.to_vec();
  parents.sort();
  for parent in parents {
    hasher.update(parent.as_bytes());
  }

  humanize(&hasher.finalize(), HUMANIZED_HASH_WORDS, word_list)
}

/// Hash in-memory content the way [`hash_file`] hashes a file.
pub fn hash_content(content: &[u8]) -> ContentHash {
  ContentHash(hex::encode(Sha256::digest(content)))
}

/// Render a digest as `words` words joined by `-`.
///
/// The digest is split into `words` segments (the last one taking the
/// remainder), each segment is XOR-folded into one byte, and each byte picks a
/// word from the list.
pub fn humanize<S: AsRef<str>>(digest: &[u8], words: usize, word_list: &[S]) -> Result<String, HashError> {
  if word_list.len() != WORD_LIST_LEN {
    return Err(HashError::InvalidWordList(word_list.len()));
  }
  if words == 0 || digest.len() < words {
    return Err(HashError::DigestTooShort {
      len: digest.len(),
      words,
    });
  }

  let segment_len = digest.len() / words;
  let rendered: Vec<&str> = (0..words)
    .map(|i| {
      let start = i * segment_len;
      let end = if i == words - 1 { digest.len() } else { start + segment_len };
      let byte = digest[start..end].iter().fold(0u8, |acc, b| acc ^ b);
      word_list[usize::from(byte)].as_ref()
    })
    .collect();

  Ok(rendered.join("-"))
}

/// Load a custom word list, one word per line.
pub fn load_word_list(path: &Path) -> Result<Vec<String>, HashError> {
  let content = fs::read_to_string(path).map_err(|e| HashError::ReadFile {
    path: path.display().to_string(),
    message: e.to_string(),
  })?;

  let words: Vec<String> = content
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty())
    .map(str::to_string)
    .collect();

  if words.len() != WORD_LIST_LEN {
    return Err(HashError::InvalidWordList(words.len()));
  }

  Ok(words)
}

/// The built-in word list.
pub fn default_word_list() -> &'static [&'static str] {
  &DEFAULT_WORD_LIST
}

/// Path of `file` relative to `base`, with `/` separators on every platform.
pub(crate) fn relative_name(base: &Path, file: &Path) -> String {
  let relative = file.strip_prefix(base).unwrap_or(file);
  relative
    .components()
    .filter_map(|c| match c {
      Component::Normal(part) => Some(part.to_string_lossy().to_string()),
      _ => None,
    })
    .collect::<Vec<_>>()
    .join("/")
}
