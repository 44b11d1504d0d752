//! Implementation of the `imgtree build` command.
//!
//! Generates the image graph, asks the registry which hashes are missing,
//! rebuilds those images in dependency order and finally promotes their tags.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use imgtree_lib::execute::{BuildReport, ExecuteConfig, rebuild_graph};
use imgtree_lib::generate::generate_graph;
use imgtree_lib::graph::Graph;
use imgtree_lib::metadata::ImageMetadata;
use imgtree_lib::plan::{PlanOptions, plan};
use imgtree_lib::ratelimit::RateLimiter;
use imgtree_lib::report::{check_reports, print_reports};
use imgtree_lib::tag::retag;
use imgtree_lib::types::TestRunner;

use crate::backend::docker::{DockerBuilder, DockerRegistry, DockerTagger};
use crate::backend::goss::GossRunner;
use crate::config::{Settings, parse_build_arg};
use crate::output::{format_duration, print_info, print_plan_line, print_stat, print_success, print_warning};

/// Name of the aggregated report written to the reports directory.
pub const REPORT_FILE: &str = "report.json";

#[derive(Debug, Default, Clone, Args)]
pub struct BuildArgs {
  /// Rebuild every image, whether or not its hash is published
  #[arg(long)]
  pub force_rebuild: bool,

  /// Do not run image tests
  #[arg(long)]
  pub no_tests: bool,

  /// Print what would be rebuilt and stop
  #[arg(long)]
  pub dry_run: bool,

  /// Also move the placeholder and extra tags onto every image
  #[arg(long)]
  pub release: bool,

  /// Push images once built
  #[arg(long)]
  pub push: bool,

  /// Maximum number of concurrent builds
  #[arg(long)]
  pub rate_limit: Option<usize>,

  /// Directory for build logs and test reports
  #[arg(long)]
  pub reports_dir: Option<std::path::PathBuf>,

  /// Build argument passed to every build (repeatable)
  #[arg(long, value_name = "KEY=VALUE")]
  pub build_arg: Vec<String>,
}

impl BuildArgs {
  /// Layer the command's flags over the resolved settings.
  fn apply(&self, mut settings: Settings) -> Result<Settings> {
    if let Some(limit) = self.rate_limit {
      settings.rate_limit = limit;
    }
    if let Some(dir) = &self.reports_dir {
      settings.reports_dir = dir.clone();
    }
    settings.push |= self.push;
    for arg in &self.build_arg {
      let (key, value) = parse_build_arg(arg)?;
      settings.build_args.insert(key, value);
    }
    Ok(settings)
  }
}

pub fn cmd_build(settings: Settings, args: &BuildArgs) -> Result<()> {
  let settings = args.apply(settings)?;
  let started = Instant::now();

  let build_path = settings.canonical_build_path()?;
  let mut graph = generate_graph(&build_path, settings.registry_url()?, &settings.generate_options())
    .with_context(|| format!("Failed to generate image graph from {}", build_path.display()))?;
  print_info(&format!("Found {} image(s) in {}", graph.len(), settings.build_path.display()));

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  rt.block_on(run_build(&mut graph, &settings, args))?;

  print_stat("Duration", &format_duration(started.elapsed()));
  Ok(())
}

async fn run_build(graph: &mut Graph, settings: &Settings, args: &BuildArgs) -> Result<()> {
  let plan_options = PlanOptions {
    force_rebuild: args.force_rebuild,
    tests_enabled: !args.no_tests,
    release: args.release,
  };
  plan(graph, Arc::new(DockerRegistry::default()), &plan_options)
    .await
    .context("Failed to plan the build")?;

  let mut planned = 0;
  graph.walk(|_, image| {
    if image.needs_work() || image.needs_retag {
      planned += 1;
    }
  });
  if planned == 0 {
    print_success("Every image is up to date");
    return Ok(());
  }

  if args.dry_run {
    println!("Dry run: {} image(s) would change", planned);
    graph.walk(|_, image| print_plan_line(image));
    return Ok(());
  }

  tokio::fs::create_dir_all(&settings.reports_dir)
    .await
    .with_context(|| format!("Failed to create reports directory: {}", settings.reports_dir.display()))?;

  let runners: Vec<Arc<dyn TestRunner>> = if args.no_tests {
    Vec::new()
  } else {
    vec![Arc::new(GossRunner::default())]
  };
  let config = ExecuteConfig {
    placeholder_tag: settings.placeholder_tag.clone(),
    push: settings.push,
    build_args: settings.build_args.clone(),
    report_dir: Some(settings.reports_dir.clone()),
    metadata: ImageMetadata::from_env(),
  };
  info!(rate_limit = settings.rate_limit, "rebuilding image graph");
  let reports = rebuild_graph(
    graph,
    Arc::new(DockerBuilder::default()),
    runners,
    RateLimiter::new(settings.rate_limit),
    &config,
  )
  .await;

  print_reports(&reports);
  write_report(settings, &reports).await?;
  check_reports(&reports).context("Build failed, tags were not promoted")?;

  let retagging = retag(
    graph,
    Arc::new(DockerTagger::default()),
    &settings.placeholder_tag,
    args.release,
  )
  .await;
  if let Err(e) = retagging {
    print_warning("Some tags were not promoted; run the build again to retry");
    return Err(e).context("Failed to retag images");
  }

  let rebuilt = graph.images().filter(|image| image.rebuild_done).count();
  let retagged = graph.images().filter(|image| image.retag_done).count();
  print_success("Build complete");
  print_stat("Rebuilt", &rebuilt.to_string());
  print_stat("Retagged", &retagged.to_string());
  Ok(())
}

async fn write_report(settings: &Settings, reports: &[BuildReport]) -> Result<()> {
  let path = settings.reports_dir.join(REPORT_FILE);
  let json = serde_json::to_string_pretty(reports).context("Failed to serialize build reports")?;
  tokio::fs::write(&path, json)
    .await
    .with_context(|| format!("Failed to write build report: {}", path.display()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeMap;
  use std::path::PathBuf;

  fn settings() -> Settings {
    Settings {
      build_path: PathBuf::from("docker"),
      registry_url: Some("registry.example.org".to_string()),
      placeholder_tag: "latest".to_string(),
      hash_list_file_path: None,
      rate_limit: 1,
      reports_dir: PathBuf::from("reports"),
      build_args: BTreeMap::from([("FROM_FILE".to_string(), "1".to_string())]),
      push: false,
    }
  }

  #[test]
  fn flags_layer_over_settings() {
    let args = BuildArgs {
      rate_limit: Some(4),
      push: true,
      build_arg: vec!["FROM_FLAG=2".to_string(), "FROM_FILE=3".to_string()],
      ..Default::default()
    };

    let merged = args.apply(settings()).unwrap();
    assert_eq!(merged.rate_limit, 4);
    assert!(merged.push);
    assert_eq!(merged.reports_dir, PathBuf::from("reports"));
    assert_eq!(merged.build_args.get("FROM_FILE").map(String::as_str), Some("3"));
    assert_eq!(merged.build_args.get("FROM_FLAG").map(String::as_str), Some("2"));
  }

  #[test]
  fn invalid_build_arg_is_rejected() {
    let args = BuildArgs {
      build_arg: vec!["broken".to_string()],
      ..Default::default()
    };
    assert!(args.apply(settings()).is_err());
  }
}
