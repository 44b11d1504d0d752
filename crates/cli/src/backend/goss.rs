//! Goss test runner.
//!
//! Images whose build context holds a `goss.yaml` are tested by running the
//! image under `dgoss`. With a report directory, goss emits JUnit and the
//! report is saved as `junit-<short name>.xml`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tracing::debug;

use imgtree_lib::types::{RunTestOptions, TestRunner};

use super::run_tool;

pub const GOSS_FILENAME: &str = "goss.yaml";

#[derive(Debug, Clone)]
pub struct GossRunner {
  binary: String,
}

impl Default for GossRunner {
  fn default() -> Self {
    Self {
      binary: "dgoss".to_string(),
    }
  }
}

impl GossRunner {
  #[cfg(test)]
  fn with_binary(binary: &str) -> Self {
    Self {
      binary: binary.to_string(),
    }
  }
}

pub fn junit_report_path(report_dir: &Path, image_name: &str) -> PathBuf {
  report_dir.join(format!("junit-{}.xml", image_name.replace('/', "_")))
}

#[async_trait]
impl TestRunner for GossRunner {
  fn name(&self) -> &str {
    "goss"
  }

  fn supports(&self, opts: &RunTestOptions) -> bool {
    opts.context_path.join(GOSS_FILENAME).is_file()
  }

  async fn run_test(&self, opts: &RunTestOptions) -> Result<()> {
    let goss_opts = if opts.report_dir.is_some() {
      "--format junit".to_string()
    } else {
      String::new()
    };

    let output = run_tool(
      &self.binary,
      ["run", opts.image_reference.as_str(), "yes"],
      Some(opts.context_path.as_path()),
      &[("GOSS_OPTS", goss_opts)],
      None,
    )
    .await?;
    let stdout = String::from_utf8_lossy(&output.stdout);

    if let Some(report_dir) = &opts.report_dir {
      let path = junit_report_path(report_dir, &opts.image_name);
      debug!(path = %path.display(), "writing junit report");
      tokio::fs::write(&path, stdout.as_bytes())
        .await
        .with_context(|| format!("Failed to write junit report: {}", path.display()))?;
    }

    if !output.status.success() {
      bail!(
        "dgoss exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr).trim()
      );
    }
    Ok(())
  }
}
