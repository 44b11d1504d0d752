//! OCI annotations attached to every build.
//!
//! Source information is taken from the CI environment when running under
//! GitHub Actions or GitLab CI.

use std::collections::BTreeMap;
use std::env;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::image::Image;

const LABEL_PREFIX: &str = "org.opencontainers.image";

/// Build-wide metadata, resolved once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMetadata {
  pub created: DateTime<Utc>,
  pub source: Option<String>,
  pub url: Option<String>,
  pub revision: Option<String>,
}

impl ImageMetadata {
  pub fn new(created: DateTime<Utc>) -> Self {
    Self {
      created,
      source: None,
      url: None,
      revision: None,
    }
  }

  /// Metadata for a build starting now.
  pub fn from_env() -> Self {
    let mut metadata = Self::new(Utc::now());

    if let (Ok(server), Ok(repository)) = (env::var("GITHUB_SERVER_URL"), env::var("GITHUB_REPOSITORY")) {
      let url = format!("{}/{}", server.trim_end_matches('/'), repository);
      metadata.source = Some(url.clone());
      metadata.url = Some(url);
      metadata.revision = env::var("GITHUB_SHA").ok();
    } else if let Ok(project_url) = env::var("CI_PROJECT_URL") {
      metadata.source = Some(project_url.clone());
      metadata.url = Some(project_url);
      metadata.revision = env::var("CI_COMMIT_SHA").ok();
    }

    metadata
  }

  /// Labels for one image build.
  pub fn labels_for(&self, image: &Image) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    let mut set = |key: &str, value: String| {
      labels.insert(format!("{}.{}", LABEL_PREFIX, key), value);
    };

    set("title", image.short_name.clone());
    set("version", image.hash.clone());
    set("ref.name", image.hash.clone());
    set("created", self.created.to_rfc3339_opts(SecondsFormat::Secs, true));

    if let Some(base) = image.dockerfile.from.last() {
      set("base.name", base.clone());
    }
    if let Some(source) = &self.source {
      set("source", source.clone());
    }
    if let Some(url) = &self.url {
      set("url", url.clone());
    }
    if let Some(revision) = &self.revision {
      set("revision", revision.clone());
    }

    labels
  }
}
