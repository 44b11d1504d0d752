//! Docker CLI backends.

use async_trait::async_trait;
use anyhow::{Result, bail};
use tracing::{debug, info};

use imgtree_lib::types::{BuildOpts, ImageBuilder, ImageTagger, Registry};

use super::run_tool;

const DOCKER: &str = "docker";

/// Builds images with `docker build`.
#[derive(Debug, Clone)]
pub struct DockerBuilder {
  binary: String,
}

impl Default for DockerBuilder {
  fn default() -> Self {
    Self {
      binary: DOCKER.to_string(),
    }
  }
}

/// Arguments of the `docker build` invocation for `opts`.
pub fn build_args(opts: &BuildOpts) -> Vec<String> {
  let mut args = vec![
    "build".to_string(),
    "--file".to_string(),
    opts.file.to_string_lossy().into_owned(),
  ];
  for tag in &opts.tags {
    args.push("--tag".to_string());
    args.push(tag.clone());
  }
  for (key, value) in &opts.labels {
    args.push("--label".to_string());
    args.push(format!("{}={}", key, value));
  }
  for (key, value) in &opts.build_args {
    args.push("--build-arg".to_string());
    args.push(format!("{}={}", key, value));
  }
  if opts.push {
    args.push("--push".to_string());
  }
  args.push(opts.context.to_string_lossy().into_owned());
  args
}

#[async_trait]
impl ImageBuilder for DockerBuilder {
  async fn build(&self, opts: BuildOpts) -> Result<()> {
    let args = build_args(&opts);
    info!(tags = ?opts.tags, context = %opts.context.display(), "docker build");

    let output = run_tool(&self.binary, &args, None, &[], opts.log_path.as_deref()).await?;
    if !output.status.success() {
      match &opts.log_path {
        Some(log) => bail!("docker build exited with {} (see {})", output.status, log.display()),
        None => bail!(
          "docker build exited with {}: {}",
          output.status,
          String::from_utf8_lossy(&output.stderr).trim()
        ),
      }
    }
    Ok(())
  }
}

/// Checks ref existence with `docker manifest inspect`.
#[derive(Debug, Clone)]
pub struct DockerRegistry {
  binary: String,
}

impl Default for DockerRegistry {
  fn default() -> Self {
    Self {
      binary: DOCKER.to_string(),
    }
  }
}

/// Whether `docker manifest inspect` stderr reports an absent ref rather than
/// a registry failure.
pub fn is_missing_manifest(stderr: &str) -> bool {
  let stderr = stderr.to_lowercase();
  stderr.contains("no such manifest") || stderr.contains("manifest unknown") || stderr.contains("not found")
}

#[async_trait]
impl Registry for DockerRegistry {
  async fn ref_exists(&self, reference: &str) -> Result<bool> {
    let output = run_tool(&self.binary, ["manifest", "inspect", reference], None, &[], None).await?;
    if output.status.success() {
      return Ok(true);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    if is_missing_manifest(&stderr) {
      debug!(reference = %reference, "manifest not found");
      return Ok(false);
    }
    bail!("docker manifest inspect {} failed: {}", reference, stderr.trim())
  }
}

/// Tags remote images with `docker buildx imagetools create`.
#[derive(Debug, Clone)]
pub struct DockerTagger {
  binary: String,
}

impl Default for DockerTagger {
  fn default() -> Self {
    Self {
      binary: DOCKER.to_string(),
    }
  }
}

#[async_trait]
impl ImageTagger for DockerTagger {
  async fn tag(&self, src: &str, dest: &str) -> Result<()> {
    let output = run_tool(
      &self.binary,
      ["buildx", "imagetools", "create", "--tag", dest, src],
      None,
      &[],
      None,
    )
    .await?;
    if !output.status.success() {
      bail!(
        "docker buildx imagetools create exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr).trim()
      );
    }
    Ok(())
  }
}
