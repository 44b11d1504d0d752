//! Promote build tags to their final names.
//!
//! Rebuilt images are built under a transient `dev-` tag; retagging points the
//! hash tag at them. On release, the placeholder tag and every extra tag are
//! moved onto the hash tag as well.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info};

use crate::graph::{Graph, NodeId};
use crate::image::Image;
use crate::types::ImageTagger;

#[derive(Debug, Error)]
pub enum TagError {
  #[error("failed to tag {src} as {dest}: {message}")]
  Tag { src: String, dest: String, message: String },
}

/// The `(src, dest)` pairs needed to retag one image, in order.
pub fn retag_plan(image: &Image, placeholder_tag: &str, release: bool) -> Vec<(String, String)> {
  let current = image.current_ref();
  let final_ref = image.docker_ref(&image.hash);
  let mut pairs = Vec::new();

  if current != final_ref {
    pairs.push((current, final_ref.clone()));
  }
  if release {
    pairs.push((final_ref.clone(), image.docker_ref(placeholder_tag)));
    for extra in &image.extra_tags {
      pairs.push((final_ref.clone(), image.docker_ref(extra)));
    }
  }

  pairs
}

/// Retag every image marked `needs_retag` that is neither done nor failed.
///
/// Images are tagged concurrently. Every image whose tags all succeeded is
/// marked `retag_done`, even when another image failed; the first failure is
/// then returned. Running it again only retries what is left.
pub async fn retag(
  graph: &mut Graph,
  tagger: Arc<dyn ImageTagger>,
  placeholder_tag: &str,
  release: bool,
) -> Result<(), TagError> {
  let done: Arc<Mutex<HashSet<NodeId>>> = Arc::new(Mutex::new(HashSet::new()));

  let result = graph
    .walk_async_err(|id, image| {
      let pending = image.needs_retag && !image.retag_done && !image.rebuild_failed;
      let pairs = if pending {
        retag_plan(image, placeholder_tag, release)
      } else {
        Vec::new()
      };
      let name = image.name.clone();
      let tagger = Arc::clone(&tagger);
      let done = Arc::clone(&done);

      async move {
        if !pending {
          return Ok::<(), TagError>(());
        }
        for (src, dest) in pairs {
          info!(image = %name, src = %src, dest = %dest, "tagging image");
          tagger.tag(&src, &dest).await.map_err(|e| TagError::Tag {
            src: src.clone(),
            dest: dest.clone(),
            message: format!("{e:#}"),
          })?;
        }
        if let Ok(mut done) = done.lock() {
          done.insert(id);
        }
        Ok(())
      }
    })
    .await;

  let done = done.lock().map(|set| set.clone()).unwrap_or_default();
  debug!(tagged = done.len(), "retag walk complete");
  graph.walk_mut(|id, image| {
    if done.contains(&id) {
      image.retag_done = true;
    }
  });

  result.map(|_| ())
}
