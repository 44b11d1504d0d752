//! Types for graph rebuilds.
//!
//! This module defines the per-image reports, the scheduler configuration
//! and the errors a single image can run into.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::DEFAULT_PLACEHOLDER_TAG;
use crate::dockerfile::DockerfileError;
use crate::image::Image;
use crate::metadata::ImageMetadata;
use crate::ratelimit::RateLimitError;

/// Errors local to one image. They fail that image and skip its descendants.
#[derive(Debug, Error)]
pub enum ExecuteError {
  #[error("failed to replace parent refs: {0}")]
  Placeholder(#[from] DockerfileError),

  #[error(transparent)]
  RateLimit(#[from] RateLimitError),

  #[error("could not create report directory {path}: {source}")]
  ReportDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("building image {image} failed: {message}")]
  Build { image: String, message: String },

  #[error("{runner} tests failed: {message}")]
  Tests { runner: String, message: String },

  #[error("parent image {0} failed")]
  ParentFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
  Skipped,
  Success,
  Error,
  /// Not attempted because a parent failed.
  ParentFailed,
}

impl fmt::Display for BuildStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      BuildStatus::Skipped => "skipped",
      BuildStatus::Success => "success",
      BuildStatus::Error => "error",
      BuildStatus::ParentFailed => "parent failed",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestsStatus {
  Skipped,
  Passed,
  Failed,
}

impl fmt::Display for TestsStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      TestsStatus::Skipped => "skipped",
      TestsStatus::Passed => "passed",
      TestsStatus::Failed => "failed",
    };
    f.write_str(s)
  }
}

/// Outcome of one attempted image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
  pub image_name: String,
  pub short_name: String,
  pub build_status: BuildStatus,
  pub tests_status: TestsStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub failure_message: Option<String>,
}

impl BuildReport {
  pub fn new(image: &Image) -> Self {
    Self {
      image_name: image.name.clone(),
      short_name: image.short_name.clone(),
      build_status: BuildStatus::Skipped,
      tests_status: TestsStatus::Skipped,
      failure_message: None,
    }
  }

  pub(crate) fn with_error(mut self, status: BuildStatus, error: &ExecuteError) -> Self {
    self.build_status = status;
    self.failure_message = Some(error.to_string());
    self
  }

  /// True if the build errored, was skipped for a failed parent, or tests failed.
  pub fn is_failure(&self) -> bool {
    matches!(self.build_status, BuildStatus::Error | BuildStatus::ParentFailed)
      || self.tests_status == TestsStatus::Failed
  }
}

/// Scheduler settings shared by every image.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Tag that definitions use to refer to managed parents.
  pub placeholder_tag: String,
  pub push: bool,
  pub build_args: BTreeMap<String, String>,
  /// Where build logs and test reports go. No logs are written when unset.
  pub report_dir: Option<PathBuf>,
  pub metadata: ImageMetadata,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      placeholder_tag: DEFAULT_PLACEHOLDER_TAG.to_string(),
      push: false,
      build_args: BTreeMap::new(),
      report_dir: None,
      metadata: ImageMetadata::from_env(),
    }
  }
}

/// What a node's task publishes to its children.
#[derive(Debug, Clone, Default)]
pub(crate) struct NodeOutcome {
  pub report: Option<BuildReport>,
  /// The image failed or inherited a failure.
  pub failed: bool,
  pub rebuilt: bool,
}
