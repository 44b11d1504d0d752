//! End-to-end runs of generate, plan, rebuild and retag against in-memory
//! collaborators.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use imgtree_lib::execute::{BuildStatus, ExecuteConfig, rebuild_graph};
use imgtree_lib::generate::{GenerateOptions, generate_graph};
use imgtree_lib::graph::Graph;
use imgtree_lib::metadata::ImageMetadata;
use imgtree_lib::plan::{PlanOptions, plan};
use imgtree_lib::ratelimit::RateLimiter;
use imgtree_lib::report::check_reports;
use imgtree_lib::tag::retag;
use imgtree_lib::types::{BuildOpts, ImageBuilder, ImageTagger, Registry};
use tempfile::TempDir;

const REGISTRY: &str = "registry.example.org";

/// Registry, builder and tagger sharing one set of published refs.
#[derive(Default)]
struct FakeRegistry {
  published: Mutex<HashSet<String>>,
  builds: Mutex<Vec<String>>,
  failing: Option<String>,
}

impl FakeRegistry {
  fn builds(&self) -> Vec<String> {
    self.builds.lock().unwrap().clone()
  }
}

#[async_trait]
impl Registry for FakeRegistry {
  async fn ref_exists(&self, reference: &str) -> anyhow::Result<bool> {
    Ok(self.published.lock().unwrap().contains(reference))
  }
}

#[async_trait]
impl ImageBuilder for FakeRegistry {
  async fn build(&self, opts: BuildOpts) -> anyhow::Result<()> {
    let tag = opts.tags.first().cloned().unwrap_or_default();
    self.builds.lock().unwrap().push(tag.clone());
    if let Some(failing) = &self.failing
      && tag.contains(failing.as_str())
    {
      anyhow::bail!("build of {} failed", tag);
    }
    self.published.lock().unwrap().insert(tag);
    Ok(())
  }
}

#[async_trait]
impl ImageTagger for FakeRegistry {
  async fn tag(&self, src: &str, dest: &str) -> anyhow::Result<()> {
    let mut published = self.published.lock().unwrap();
    if !published.contains(src) {
      anyhow::bail!("source ref {} does not exist", src);
    }
    published.insert(dest.to_string());
    Ok(())
  }
}

fn write(root: &Path, rel: &str, content: &str) {
  let path = root.join(rel);
  std::fs::create_dir_all(path.parent().unwrap()).unwrap();
  std::fs::write(path, content).unwrap();
}

fn image_tree(root: &Path) {
  write(root, "bullseye/Dockerfile", "FROM debian:bullseye\nLABEL name=\"bullseye\"\n");
  write(
    root,
    "bullseye/first/Dockerfile",
    "FROM registry.example.org/bullseye:latest\nLABEL name=\"first\"\n",
  );
  write(
    root,
    "bullseye/second/Dockerfile",
    "FROM registry.example.org/bullseye:latest\nLABEL name=\"second\" imgtree.extra-tags=\"stable\"\n",
  );
  write(
    root,
    "bullseye/second/third/Dockerfile",
    "FROM registry.example.org/second:latest\nLABEL name=\"third\"\n",
  );
  write(root, "bullseye/second/third/app.txt", "v1\n");
}

fn config() -> ExecuteConfig {
  ExecuteConfig {
    metadata: ImageMetadata::new(chrono::Utc::now()),
    ..Default::default()
  }
}

async fn run(root: &Path, registry: &Arc<FakeRegistry>, release: bool) -> (Graph, Vec<BuildStatus>) {
  let mut graph = generate_graph(root, REGISTRY, &GenerateOptions::default()).unwrap();
  let options = PlanOptions {
    release,
    ..Default::default()
  };
  plan(&mut graph, registry.clone(), &options).await.unwrap();

  let reports = rebuild_graph(&mut graph, registry.clone(), vec![], RateLimiter::new(2), &config()).await;
  let statuses = reports.iter().map(|r| r.build_status).collect();

  if check_reports(&reports).is_ok() {
    retag(&mut graph, registry.clone(), "latest", release).await.unwrap();
  }
  (graph, statuses)
}

#[tokio::test]
async fn second_run_is_a_no_op() {
  let temp = TempDir::new().unwrap();
  image_tree(temp.path());
  let registry = Arc::new(FakeRegistry::default());

  let (graph, statuses) = run(temp.path(), &registry, false).await;
  assert_eq!(statuses.len(), 4);
  assert!(statuses.iter().all(|s| *s == BuildStatus::Success));

  let published = registry.published.lock().unwrap().clone();
  for image in graph.images() {
    assert!(published.contains(&image.docker_ref(&image.hash)));
  }

  let builds_before = registry.builds().len();
  let (_, statuses) = run(temp.path(), &registry, false).await;
  assert!(statuses.is_empty());
  assert_eq!(registry.builds().len(), builds_before);
}

#[tokio::test]
async fn leaf_change_rebuilds_only_the_leaf() {
  let temp = TempDir::new().unwrap();
  image_tree(temp.path());
  let registry = Arc::new(FakeRegistry::default());
  run(temp.path(), &registry, false).await;
  let builds_before = registry.builds().len();

  write(temp.path(), "bullseye/second/third/app.txt", "v2\n");
  let (_, statuses) = run(temp.path(), &registry, false).await;

  assert_eq!(statuses, vec![BuildStatus::Success]);
  let new_builds = &registry.builds()[builds_before..];
  assert_eq!(new_builds.len(), 1);
  assert!(new_builds[0].starts_with("registry.example.org/third:dev-"));
}

#[tokio::test]
async fn release_publishes_placeholder_and_extra_tags() {
  let temp = TempDir::new().unwrap();
  image_tree(temp.path());
  let registry = Arc::new(FakeRegistry::default());
  run(temp.path(), &registry, false).await;

  let (graph, statuses) = run(temp.path(), &registry, true).await;
  assert!(statuses.is_empty());
  assert!(graph.images().all(|img| img.retag_done));

  let published = registry.published.lock().unwrap();
  assert!(published.contains("registry.example.org/bullseye:latest"));
  assert!(published.contains("registry.example.org/second:stable"));
}

#[tokio::test]
async fn failed_build_skips_subtree_and_retag() {
  let temp = TempDir::new().unwrap();
  image_tree(temp.path());
  let registry = Arc::new(FakeRegistry {
    failing: Some("/second:".to_string()),
    ..Default::default()
  });

  let (graph, statuses) = run(temp.path(), &registry, false).await;

  assert_eq!(statuses.iter().filter(|s| **s == BuildStatus::Error).count(), 1);
  assert_eq!(statuses.iter().filter(|s| **s == BuildStatus::ParentFailed).count(), 1);
  assert!(!registry.builds().iter().any(|tag| tag.contains("/third:")));
  assert!(graph.images().all(|img| !img.retag_done));
}
