//! The image entity carried by every graph node.

use serde::{Deserialize, Serialize};

use crate::consts::DEV_TAG_PREFIX;
use crate::dockerfile::Dockerfile;

/// A managed, buildable container image.
///
/// Identity and build metadata are filled once by the graph builder. The
/// planning flags are set by the planner, then by the scheduler and the tagger.
/// They are never serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
  /// Fully-qualified name, `<registry prefix>/<short name>`.
  pub name: String,
  /// Local label taken from the `name` label of the definition.
  pub short_name: String,
  /// Content-derived version of the image.
  pub hash: String,
  /// Tags published alongside the hash on release.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub extra_tags: Vec<String>,
  pub dockerfile: Dockerfile,
  /// Ignore patterns excluding files from the hash.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub ignore_patterns: Vec<String>,
  /// Humanize the hash with the custom word list.
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub use_custom_hash_list: bool,

  #[serde(skip)]
  pub needs_rebuild: bool,
  #[serde(skip)]
  pub needs_tests: bool,
  #[serde(skip)]
  pub needs_retag: bool,
  #[serde(skip)]
  pub retag_done: bool,
  #[serde(skip)]
  pub rebuild_done: bool,
  #[serde(skip)]
  pub rebuild_failed: bool,
}

impl Image {
  /// Fully-qualified ref for the current version of the image.
  ///
  /// While the image still needs a rebuild, the transient `dev-` tag is used so
  /// the hash tag is only published once the image has been promoted.
  pub fn current_ref(&self) -> String {
    if self.needs_rebuild {
      self.docker_ref(&format!("{}{}", DEV_TAG_PREFIX, self.hash))
    } else {
      self.docker_ref(&self.hash)
    }
  }

  /// Fully-qualified ref for a given version.
  pub fn docker_ref(&self, version: &str) -> String {
    format!("{}:{}", self.name, version)
  }

  /// True when the scheduler has something to do for this image.
  pub fn needs_work(&self) -> bool {
    self.needs_rebuild || self.needs_tests
  }
}
