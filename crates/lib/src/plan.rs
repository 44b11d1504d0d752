//! Decide what has to happen to each image.
//!
//! An image whose `name:hash` ref is missing from the registry needs a rebuild.
//! Tests only ever run on rebuilt images. On release, images that are already
//! published need a retag instead.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::graph::Graph;
use crate::types::Registry;

#[derive(Debug, Error)]
pub enum PlanError {
  #[error("error checking registry for {reference}: {message}")]
  Registry { reference: String, message: String },

  #[error("could not find ref {0} in registry results")]
  MissingRef(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions {
  /// Rebuild everything without asking the registry.
  pub force_rebuild: bool,
  pub tests_enabled: bool,
  /// Mark published images for retagging.
  pub release: bool,
}

/// Set the planning flags of every image.
///
/// The registry is queried for every image concurrently. Any failed query
/// aborts planning before a single flag is set.
pub async fn plan(graph: &mut Graph, registry: Arc<dyn Registry>, options: &PlanOptions) -> Result<(), PlanError> {
  if options.force_rebuild {
    info!("force rebuild enabled, every image will be rebuilt");
    graph.walk_mut(|_, image| {
      image.needs_rebuild = true;
      image.needs_tests = options.tests_enabled;
    });
    return Ok(());
  }

  let published = graph
    .walk_async_err(|_, image| {
      let registry = Arc::clone(&registry);
      let reference = image.docker_ref(&image.hash);
      async move {
        registry
          .ref_exists(&reference)
          .await
          .map_err(|e| PlanError::Registry {
            reference: reference.clone(),
            message: format!("{e:#}"),
          })
      }
    })
    .await?;

  graph.walk_err(|id, image| {
    let reference = image.docker_ref(&image.hash);
    let exists = *published
      .get(&id)
      .ok_or_else(|| PlanError::MissingRef(reference.clone()))?;

    if exists {
      debug!(image = %image.name, reference = %reference, "ref already published");
      if options.release {
        image.needs_retag = true;
      }
    } else {
      info!(image = %image.name, reference = %reference, "ref missing from registry, image will be rebuilt");
      image.needs_rebuild = true;
      image.needs_tests = options.tests_enabled;
    }
    Ok(())
  })
}
