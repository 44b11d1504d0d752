//! Implementation of the `imgtree hash` command.

use anyhow::{Context, Result};

use imgtree_lib::generate::tree_hash;

use crate::config::Settings;

/// Print the humanized hash of the whole build directory.
pub fn cmd_hash(settings: &Settings) -> Result<()> {
  let build_path = settings.canonical_build_path()?;
  let hash =
    tree_hash(&build_path).with_context(|| format!("Failed to hash build directory {}", build_path.display()))?;
  println!("{}", hash);
  Ok(())
}
