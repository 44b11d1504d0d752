//! Implementation of the `imgtree list` command.

use anyhow::{Context, Result};
use serde::Serialize;

use imgtree_lib::generate::generate_graph;
use imgtree_lib::graph::Graph;

use crate::config::Settings;
use crate::output::{OutputFormat, print_info, print_json, symbols};

#[derive(Debug, Serialize, PartialEq)]
struct ListEntry {
  short_name: String,
  name: String,
  hash: String,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  parents: Vec<String>,
}

fn entries(graph: &Graph) -> Vec<ListEntry> {
  let mut entries = Vec::new();
  graph.walk(|id, image| {
    entries.push(ListEntry {
      short_name: image.short_name.clone(),
      name: image.name.clone(),
      hash: image.hash.clone(),
      parents: graph.parents(id).into_iter().map(|p| graph[p].short_name.clone()).collect(),
    });
  });
  entries.sort_by(|a, b| a.short_name.cmp(&b.short_name));
  entries
}

pub fn cmd_list(settings: &Settings, format: OutputFormat) -> Result<()> {
  let build_path = settings.canonical_build_path()?;
  let graph = generate_graph(&build_path, settings.registry_url()?, &settings.generate_options())
    .with_context(|| format!("Failed to generate image graph from {}", build_path.display()))?;
  let entries = entries(&graph);

  if format.is_json() {
    return print_json(&entries);
  }

  if entries.is_empty() {
    print_info(&format!("No images found in {}", settings.build_path.display()));
    return Ok(());
  }

  let width = entries.iter().map(|e| e.short_name.len()).max().unwrap_or(0);
  for entry in &entries {
    println!("  {} {:<width$}  {}", symbols::INFO, entry.short_name, entry.hash, width = width);
  }
  Ok(())
}
