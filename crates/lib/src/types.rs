//! Collaborator contracts consumed by the core.
//!
//! Concrete builders, registries and test runners live outside the library;
//! the planner, scheduler and tagger only see these traits.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

/// Everything a builder needs to produce one image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOpts {
  /// Build context directory.
  pub context: PathBuf,
  /// Definition file inside the context.
  pub file: PathBuf,
  /// Refs to tag the result with.
  pub tags: Vec<String>,
  pub labels: BTreeMap<String, String>,
  pub build_args: BTreeMap<String, String>,
  /// Push the result to the registry once built.
  pub push: bool,
  /// Where the builder writes its output, if anywhere.
  pub log_path: Option<PathBuf>,
}

/// What a test runner is asked to check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunTestOptions {
  /// Short name of the image under test.
  pub image_name: String,
  /// Ref the image was built with.
  pub image_reference: String,
  pub context_path: PathBuf,
  /// Directory for the runner's own reports, if any.
  pub report_dir: Option<PathBuf>,
}

#[async_trait]
pub trait ImageBuilder: Send + Sync {
  async fn build(&self, opts: BuildOpts) -> anyhow::Result<()>;
}

#[async_trait]
pub trait Registry: Send + Sync {
  /// Whether `reference` is already published.
  async fn ref_exists(&self, reference: &str) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait ImageTagger: Send + Sync {
  /// Point `dest` at the image currently tagged `src`.
  async fn tag(&self, src: &str, dest: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait TestRunner: Send + Sync {
  fn name(&self) -> &str;

  /// Capability probe, e.g. a test definition sits in the build context.
  fn supports(&self, opts: &RunTestOptions) -> bool;

  async fn run_test(&self, opts: &RunTestOptions) -> anyhow::Result<()>;
}
