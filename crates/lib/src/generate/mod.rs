//! Graph generation from a directory of image definitions.
//!
//! This module scans a build directory and produces the image [`Graph`]:
//! - every definition file becomes an image, unless labelled `skipbuild`
//! - `FROM` lines naming a managed image become parent/child edges
//! - every plain file is assigned to the most specific image owning it
//! - each image gets a content hash covering its files and its parents' hashes
//!
//! Build arguments overriding an `ARG` a definition declares are folded into
//! that definition's hashed content, so changing one rebuilds the image and
//! its descendants. The file on disk is never rewritten for hashing.

pub mod ignore;

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::consts::{DOCKERIGNORE, LABEL_EXTRA_TAGS, LABEL_NAME, LABEL_SKIP_BUILD, LABEL_USE_CUSTOM_HASH_LIST};
use crate::dockerfile::{self, DockerfileError};
use crate::graph::{Graph, GraphError, NodeId};
use crate::image::Image;
use crate::util::hash::{
  HashError, default_word_list, hash_files, hash_files_overriding, load_word_list, relative_name,
};

use ignore::IgnoreMatcher;

/// Errors that abort graph generation. No partial graph is ever returned.
#[derive(Debug, Error)]
pub enum GenerateError {
  #[error("failed to scan {path}: {message}")]
  Scan { path: PathBuf, message: String },

  #[error(transparent)]
  Dockerfile(#[from] DockerfileError),

  #[error("missing label \"name\" in definition at {0}")]
  MissingName(PathBuf),

  #[error("image {name} is defined twice, in {first} and {second}")]
  DuplicateImage {
    name: String,
    first: PathBuf,
    second: PathBuf,
  },

  #[error("could not read ignore patterns in {path}: {source}")]
  ReadIgnore {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid ignore pattern for image {image}: {source}")]
  IgnorePattern {
    image: String,
    #[source]
    source: globset::Error,
  },

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error("invalid custom hash list {path}: {source}")]
  WordList {
    path: PathBuf,
    #[source]
    source: HashError,
  },

  #[error("image {image} uses the custom hash list but none is configured")]
  MissingHashList { image: String },

  #[error("could not hash files for image {image}: {source}")]
  Hash {
    image: String,
    #[source]
    source: HashError,
  },

  #[error("could not hash build directory {path}: {source}")]
  TreeHash {
    path: PathBuf,
    #[source]
    source: HashError,
  },

  #[error("parent hashes could not be resolved for: {}", .images.join(", "))]
  UnresolvedParents { images: Vec<String> },
}

/// Knobs of graph generation.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
  /// Word list for images labelled to use a custom hash list.
  pub custom_hash_list: Option<PathBuf>,
  /// Build arguments passed to every build.
  pub build_args: BTreeMap<String, String>,
}

/// Scan `build_path` and build the hashed image graph.
///
/// Image names are `<registry_prefix>/<name label>`.
pub fn generate_graph(
  build_path: &Path,
  registry_prefix: &str,
  options: &GenerateOptions,
) -> Result<Graph, GenerateError> {
  info!(path = %build_path.display(), "generating image graph");

  let custom_words = match &options.custom_hash_list {
    Some(path) => Some(load_word_list(path).map_err(|source| GenerateError::WordList {
      path: path.clone(),
      source,
    })?),
    None => None,
  };

  let (images, files) = scan(build_path, registry_prefix)?;
  let mut graph = link(images)?;
  let assigned = assign_files(&graph, &files)?;
  compute_hashes(
    &mut graph,
    build_path,
    &assigned,
    custom_words.as_deref(),
    &options.build_args,
  )?;

  info!(images = graph.len(), roots = graph.roots().len(), "image graph generated");
  Ok(graph)
}

/// Humanized hash of every file under `build_path`, versioning the tree as a
/// whole.
pub fn tree_hash(build_path: &Path) -> Result<String, GenerateError> {
  let files = walk_files(build_path)?;
  hash_files(build_path, &files, &[], default_word_list()).map_err(|source| GenerateError::TreeHash {
    path: build_path.to_path_buf(),
    source,
  })
}

/// Every file under `build_path`, in file name order. Symlinks to files are
/// included and hash as their target.
fn walk_files(build_path: &Path) -> Result<Vec<PathBuf>, GenerateError> {
  let mut files = Vec::new();
  for entry in WalkDir::new(build_path).sort_by_file_name() {
    let entry = entry.map_err(|e| GenerateError::Scan {
      path: build_path.to_path_buf(),
      message: e.to_string(),
    })?;
    if entry.path().is_file() {
      files.push(entry.into_path());
    }
  }
  Ok(files)
}

/// Collect the images and every plain file under `build_path`.
fn scan(build_path: &Path, registry_prefix: &str) -> Result<(Vec<Image>, Vec<PathBuf>), GenerateError> {
  let files = walk_files(build_path)?;
  let mut images = Vec::new();

  for path in &files {
    if dockerfile::is_dockerfile(path)
      && let Some(image) = image_from_definition(path, registry_prefix)?
    {
      images.push(image);
    }
  }

  debug!(images = images.len(), files = files.len(), "scan complete");
  Ok((images, files))
}

fn image_from_definition(path: &Path, registry_prefix: &str) -> Result<Option<Image>, GenerateError> {
  let definition = dockerfile::parse(path)?;

  if definition.labels.get(LABEL_SKIP_BUILD).is_some_and(|v| v == "true") {
    debug!(path = %path.display(), "skipping definition labelled {}", LABEL_SKIP_BUILD);
    return Ok(None);
  }

  let short_name = definition
    .labels
    .get(LABEL_NAME)
    .cloned()
    .ok_or_else(|| GenerateError::MissingName(path.to_path_buf()))?;

  let extra_tags = definition
    .labels
    .get(LABEL_EXTRA_TAGS)
    .map(|tags| {
      tags
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
    })
    .unwrap_or_default();

  let use_custom_hash_list = definition
    .labels
    .get(LABEL_USE_CUSTOM_HASH_LIST)
    .is_some_and(|v| v == "true");

  let ignore_patterns =
    ignore::read_patterns(&definition.context_path).map_err(|source| GenerateError::ReadIgnore {
      path: definition.context_path.clone(),
      source,
    })?;

  Ok(Some(Image {
    name: format!("{}/{}", registry_prefix, short_name),
    short_name,
    extra_tags,
    dockerfile: definition,
    ignore_patterns,
    use_custom_hash_list,
    ..Default::default()
  }))
}

/// Insert the images and link each one under the managed images it is built from.
fn link(images: Vec<Image>) -> Result<Graph, GenerateError> {
  let mut graph = Graph::new();
  let mut by_name: HashMap<String, NodeId> = HashMap::new();
  let mut ids = Vec::with_capacity(images.len());

  for image in images {
    if let Some(&existing) = by_name.get(&image.name) {
      return Err(GenerateError::DuplicateImage {
        name: image.name.clone(),
        first: graph[existing].dockerfile.path(),
        second: image.dockerfile.path(),
      });
    }
    let name = image.name.clone();
    let id = graph.add_node(image);
    by_name.insert(name, id);
    ids.push(id);
  }

  for &id in &ids {
    let parents: Vec<NodeId> = graph[id]
      .dockerfile
      .from
      .iter()
      .filter_map(|from| by_name.get(from).copied())
      .collect();
    for parent in parents {
      debug!(parent = %graph[parent].name, child = %graph[id].name, "linking images");
      graph.add_child(parent, id);
    }
  }

  for &id in &ids {
    if graph.parents(id).is_empty() {
      graph.add_root(id);
    }
  }

  graph.verify_acyclic()?;
  Ok(graph)
}

/// Give each file to the deepest image directory containing it that does not
/// ignore it. Ignored files fall back to shallower images; files no image
/// wants are left out.
fn assign_files(graph: &Graph, files: &[PathBuf]) -> Result<HashMap<NodeId, Vec<PathBuf>>, GenerateError> {
  let mut owners = Vec::with_capacity(graph.len());
  for id in graph.walk_order() {
    let image = &graph[id];
    let matcher = IgnoreMatcher::new(&image.ignore_patterns).map_err(|source| GenerateError::IgnorePattern {
      image: image.name.clone(),
      source,
    })?;
    owners.push((id, image.dockerfile.context_path.as_path(), matcher));
  }
  owners.sort_by_key(|(_, context, _)| Reverse(context.components().count()));

  let mut assigned: HashMap<NodeId, Vec<PathBuf>> = HashMap::new();
  for file in files {
    if file.file_name().is_some_and(|name| name == DOCKERIGNORE) {
      continue;
    }

    let owner = owners.iter().find(|(_, context, matcher)| {
      file.starts_with(context) && !matcher.is_ignored(&relative_name(context, file))
    });

    match owner {
      Some((id, _, _)) => assigned.entry(*id).or_default().push(file.clone()),
      None => debug!(file = %file.display(), "file not part of any image"),
    }
  }

  Ok(assigned)
}

/// Hash images in repeated passes until every image is hashed.
///
/// An image is hashed once all its parents are. A pass that hashes nothing
/// while images remain means their parents can never resolve.
fn compute_hashes(
  graph: &mut Graph,
  build_path: &Path,
  assigned: &HashMap<NodeId, Vec<PathBuf>>,
  custom_words: Option<&[String]>,
  build_args: &BTreeMap<String, String>,
) -> Result<(), GenerateError> {
  let mut remaining = graph.len();
  let mut pass = 0;

  while remaining > 0 {
    pass += 1;
    let mut resolved = 0;

    for id in graph.walk_order() {
      if !graph[id].hash.is_empty() {
        continue;
      }

      let parent_hashes: Option<Vec<String>> = graph
        .parents(id)
        .into_iter()
        .map(|parent| {
          let hash = &graph[parent].hash;
          (!hash.is_empty()).then(|| hash.clone())
        })
        .collect();
      let Some(parent_hashes) = parent_hashes else {
        continue;
      };

      let image = &graph[id];
      let files = assigned.get(&id).map(Vec::as_slice).unwrap_or_default();
      let mut overrides = HashMap::new();
      if let Some(content) = image.dockerfile.content_with_args(build_args)? {
        debug!(image = %image.name, "build arguments override declared ARG lines");
        overrides.insert(image.dockerfile.path(), content);
      }
      let hashed = if image.use_custom_hash_list {
        let words = custom_words.ok_or_else(|| GenerateError::MissingHashList {
          image: image.name.clone(),
        })?;
        hash_files_overriding(build_path, files, &overrides, &parent_hashes, words)
      } else {
        hash_files_overriding(build_path, files, &overrides, &parent_hashes, default_word_list())
      };
      let hash = hashed.map_err(|source| GenerateError::Hash {
        image: image.name.clone(),
        source,
      })?;

      debug!(image = %image.name, hash = %hash, files = files.len(), "hashed image");
      graph[id].hash = hash;
      resolved += 1;
    }

    if resolved == 0 {
      let images = graph
        .images()
        .filter(|image| image.hash.is_empty())
        .map(|image| image.name.clone())
        .collect();
      return Err(GenerateError::UnresolvedParents { images });
    }

    remaining -= resolved;
    debug!(pass, resolved, remaining, "hashing pass complete");
  }

  Ok(())
}
