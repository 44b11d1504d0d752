//! Concrete collaborators driving external tools.
//!
//! - `docker`: `docker build`, `docker manifest inspect` and
//!   `docker buildx imagetools create`
//! - `goss`: container tests through the `dgoss` wrapper

pub mod docker;
pub mod goss;

use std::ffi::OsStr;
use std::path::Path;
use std::process::{Output, Stdio};

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::debug;

/// Run `program` with `args`, capturing its output.
///
/// When `log_path` is set, stdout and stderr go to that file instead and the
/// returned output is empty.
pub(crate) async fn run_tool<I, S>(
  program: &str,
  args: I,
  cwd: Option<&Path>,
  envs: &[(&str, String)],
  log_path: Option<&Path>,
) -> Result<Output>
where
  I: IntoIterator<Item = S>,
  S: AsRef<OsStr>,
{
  let mut command = Command::new(program);
  command.args(args).stdin(Stdio::null());
  if let Some(cwd) = cwd {
    command.current_dir(cwd);
  }
  for (key, value) in envs {
    command.env(key, value);
  }

  if let Some(log_path) = log_path {
    let log = tokio::fs::File::create(log_path)
      .await
      .with_context(|| format!("Failed to create log file: {}", log_path.display()))?
      .into_std()
      .await;
    let log_err = log
      .try_clone()
      .with_context(|| format!("Failed to open log file: {}", log_path.display()))?;
    command.stdout(Stdio::from(log)).stderr(Stdio::from(log_err));
  }

  debug!(program = %program, ?cwd, "spawning process");
  let output = command
    .output()
    .await
    .with_context(|| format!("Failed to run {}", program))?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
      debug!(stderr = %stderr, "command stderr");
    }
  }
  Ok(output)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[cfg(unix)]
  #[tokio::test]
  async fn output_goes_to_log_file() {
    let temp = TempDir::new().unwrap();
    let log = temp.path().join("build.log");

    let output = run_tool("sh", ["-c", "echo out; echo err >&2"], None, &[], Some(&log))
      .await
      .unwrap();

    assert!(output.status.success());
    assert!(output.stdout.is_empty());
    let logged = std::fs::read_to_string(&log).unwrap();
    assert!(logged.contains("out"));
    assert!(logged.contains("err"));
  }

  #[tokio::test]
  async fn missing_log_directory_is_reported() {
    let temp = TempDir::new().unwrap();
    let log = temp.path().join("absent/build.log");

    let err = run_tool("sh", ["-c", "true"], None, &[], Some(&log)).await.unwrap_err();
    assert!(err.to_string().contains("Failed to create log file"));
  }
}
