//! Test utilities for imgtree-lib.
//!
//! In-memory collaborators that record every call, plus helpers to lay out
//! image trees on disk.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use anyhow::bail;
use async_trait::async_trait;

use crate::types::{BuildOpts, ImageBuilder, ImageTagger, Registry, RunTestOptions, TestRunner};

/// Builder recording the options of every build.
#[derive(Default)]
pub struct MockBuilder {
  pub calls: Mutex<Vec<BuildOpts>>,
  /// Builds whose first tag contains one of these fail.
  pub failing: HashSet<String>,
}

impl MockBuilder {
  pub fn failing_on(names: &[&str]) -> Self {
    Self {
      failing: names.iter().map(|n| n.to_string()).collect(),
      ..Default::default()
    }
  }

  /// First tag of every build, in call order.
  pub fn built_tags(&self) -> Vec<String> {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter_map(|opts| opts.tags.first().cloned())
      .collect()
  }
}

#[async_trait]
impl ImageBuilder for MockBuilder {
  async fn build(&self, opts: BuildOpts) -> anyhow::Result<()> {
    let tag = opts.tags.first().cloned().unwrap_or_default();
    self.calls.lock().unwrap().push(opts);
    if self.failing.iter().any(|name| tag.contains(name.as_str())) {
      bail!("build of {} failed", tag);
    }
    Ok(())
  }
}

/// Registry answering from a fixed list of published refs.
#[derive(Default)]
pub struct MockRegistry {
  pub existing_refs: Vec<String>,
  /// Lookups of refs containing this string fail.
  pub unreachable: Option<String>,
  pub lookups: Mutex<Vec<String>>,
}

impl MockRegistry {
  pub fn with_refs(refs: &[String]) -> Self {
    Self {
      existing_refs: refs.to_vec(),
      ..Default::default()
    }
  }
}

#[async_trait]
impl Registry for MockRegistry {
  async fn ref_exists(&self, reference: &str) -> anyhow::Result<bool> {
    self.lookups.lock().unwrap().push(reference.to_string());
    if let Some(pattern) = &self.unreachable
      && reference.contains(pattern.as_str())
    {
      bail!("registry unreachable for {}", reference);
    }
    Ok(self.existing_refs.iter().any(|r| r == reference))
  }
}

/// Tagger recording every `(src, dest)` pair.
#[derive(Default)]
pub struct MockTagger {
  pub calls: Mutex<Vec<(String, String)>>,
  /// Tagging to a destination containing one of these fails.
  pub failing: HashSet<String>,
}

#[async_trait]
impl ImageTagger for MockTagger {
  async fn tag(&self, src: &str, dest: &str) -> anyhow::Result<()> {
    self.calls.lock().unwrap().push((src.to_string(), dest.to_string()));
    if self.failing.iter().any(|name| dest.contains(name.as_str())) {
      bail!("cannot tag {}", dest);
    }
    Ok(())
  }
}

/// Test runner failing for a configurable set of images.
pub struct MockTestRunner {
  pub name: String,
  pub supported: bool,
  /// Short names of the images whose tests fail.
  pub failing: HashSet<String>,
  pub runs: Mutex<Vec<String>>,
}

impl MockTestRunner {
  pub fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
      supported: true,
      failing: HashSet::new(),
      runs: Mutex::new(Vec::new()),
    }
  }

  pub fn failing_on(mut self, names: &[&str]) -> Self {
    self.failing = names.iter().map(|n| n.to_string()).collect();
    self
  }

  pub fn unsupported(mut self) -> Self {
    self.supported = false;
    self
  }

  pub fn ran(&self) -> Vec<String> {
    let mut runs = self.runs.lock().unwrap().clone();
    runs.sort();
    runs
  }
}

#[async_trait]
impl TestRunner for MockTestRunner {
  fn name(&self) -> &str {
    &self.name
  }

  fn supports(&self, _opts: &RunTestOptions) -> bool {
    self.supported
  }

  async fn run_test(&self, opts: &RunTestOptions) -> anyhow::Result<()> {
    self.runs.lock().unwrap().push(opts.image_name.clone());
    if self.failing.contains(&opts.image_name) {
      bail!("{} tests failed for {}", self.name, opts.image_name);
    }
    Ok(())
  }
}

/// Write a definition file with the given body under `root/rel_dir`.
pub fn write_dockerfile(root: &Path, rel_dir: &str, body: &str) {
  let dir = root.join(rel_dir);
  std::fs::create_dir_all(&dir).unwrap();
  std::fs::write(dir.join("Dockerfile"), body).unwrap();
}

/// Write a plain file under `root`.
pub fn write_file(root: &Path, rel_path: &str, content: &str) {
  let path = root.join(rel_path);
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).unwrap();
  }
  std::fs::write(path, content).unwrap();
}

/// The tree used across tests:
///
/// ```text
/// bullseye
/// ├── first
/// └── second
///     └── third
/// ```
///
/// Every definition lives in a directory nested under its parent's.
pub fn bullseye_tree(root: &Path) {
  write_dockerfile(
    root,
    "bullseye",
    "FROM debian:bullseye\nLABEL name=\"bullseye\"\n",
  );
  write_file(root, "bullseye/sources.list", "deb http://deb.debian.org/debian bullseye main\n");
  write_dockerfile(
    root,
    "bullseye/first",
    "FROM registry.example.org/bullseye:latest\nLABEL name=\"first\"\n",
  );
  write_dockerfile(
    root,
    "bullseye/second",
    "FROM registry.example.org/bullseye:latest\nLABEL name=\"second\"\n",
  );
  write_file(root, "bullseye/second/config.yaml", "level: 2\n");
  write_dockerfile(
    root,
    "bullseye/second/third",
    "FROM registry.example.org/second:latest\nLABEL name=\"third\"\n",
  );
  write_file(root, "bullseye/second/third/app.txt", "third app\n");
}

pub const REGISTRY: &str = "registry.example.org";
