//! Graph rebuild execution.
//!
//! This module provides the entry point for rebuilding the images the planner
//! marked. It handles:
//! - Dependency ordering (an image starts once all its parents are done)
//! - Global concurrency control through the [`RateLimiter`]
//! - Failure propagation to every descendant of a failed image
//! - Test runs on rebuilt images

pub mod types;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::dockerfile::replace_in_file;
use crate::graph::{Graph, ParallelVisit};
use crate::image::Image;
use crate::ratelimit::RateLimiter;
use crate::types::{BuildOpts, ImageBuilder, RunTestOptions, TestRunner};

pub use types::{BuildReport, BuildStatus, ExecuteConfig, ExecuteError, TestsStatus};
use types::NodeOutcome;

/// Rebuild and test every image that needs it.
///
/// Returns one report per image that needed work, in walk order. Results are
/// written back into the graph: successful rebuilds get `rebuild_done` and
/// `needs_retag`, failures and their descendants get `rebuild_failed`.
pub async fn rebuild_graph(
  graph: &mut Graph,
  builder: Arc<dyn ImageBuilder>,
  test_runners: Vec<Arc<dyn TestRunner>>,
  rate_limiter: RateLimiter,
  config: &ExecuteConfig,
) -> Vec<BuildReport> {
  let pending = graph.images().filter(|image| image.needs_work()).count();
  info!(pending, rate_limit = rate_limiter.max_concurrent(), "starting graph rebuild");

  let scheduler = Arc::new(Scheduler {
    builder,
    test_runners,
    rate_limiter,
    config: config.clone(),
  });
  let outcomes = graph
    .walk_parallel(move |visit: ParallelVisit<NodeOutcome>| {
      let scheduler = Arc::clone(&scheduler);
      async move { scheduler.visit(visit).await }
    })
    .await;

  let mut reports = Vec::with_capacity(pending);
  for id in graph.walk_order() {
    let image = &mut graph[id];
    let Some(outcome) = outcomes.get(&id) else {
      image.rebuild_failed = true;
      if image.needs_work() {
        let message = format!("rebuild task for {} aborted", image.name);
        let mut report = BuildReport::new(image);
        report.build_status = BuildStatus::Error;
        report.failure_message = Some(message);
        reports.push(report);
      }
      continue;
    };

    if outcome.failed {
      image.rebuild_failed = true;
    }
    if outcome.rebuilt {
      image.rebuild_done = true;
      image.needs_retag = true;
    }
    if let Some(report) = &outcome.report {
      reports.push(report.clone());
    }
  }

  info!(
    reports = reports.len(),
    failed = reports.iter().filter(|r| r.is_failure()).count(),
    "graph rebuild complete"
  );

  reports
}

struct Scheduler {
  builder: Arc<dyn ImageBuilder>,
  test_runners: Vec<Arc<dyn TestRunner>>,
  rate_limiter: RateLimiter,
  config: ExecuteConfig,
}

impl Scheduler {
  async fn visit(&self, visit: ParallelVisit<NodeOutcome>) -> NodeOutcome {
    let image = &visit.image;

    let failed_parent = visit
      .parents
      .iter()
      .find(|(_, outcome)| outcome.as_ref().is_none_or(|o| o.failed))
      .map(|(parent, _)| parent.name.clone());

    if let Some(parent) = failed_parent {
      warn!(image = %image.name, parent = %parent, "skipping image due to failed parent");
      let report = image
        .needs_work()
        .then(|| BuildReport::new(image).with_error(BuildStatus::ParentFailed, &ExecuteError::ParentFailed(parent)));
      return NodeOutcome {
        report,
        failed: true,
        rebuilt: false,
      };
    }

    if !image.needs_work() {
      return NodeOutcome::default();
    }

    let mut report = BuildReport::new(image);
    let mut rebuilt = false;

    if image.needs_rebuild {
      let parents: Vec<&Image> = visit.parents.iter().map(|(parent, _)| parent).collect();
      match self.rebuild(image, &parents).await {
        Ok(()) => {
          info!(image = %image.name, "build succeeded");
          report.build_status = BuildStatus::Success;
          rebuilt = true;
        }
        Err(e) => {
          error!(image = %image.name, error = %e, "build failed");
          return NodeOutcome {
            report: Some(report.with_error(BuildStatus::Error, &e)),
            failed: true,
            rebuilt: false,
          };
        }
      }
    }

    if image.needs_tests {
      match self.run_tests(image).await {
        Ok(()) => report.tests_status = TestsStatus::Passed,
        Err(e) => {
          error!(image = %image.name, error = %e, "tests failed");
          report.tests_status = TestsStatus::Failed;
          report.failure_message = Some(e.to_string());
        }
      }
    }

    NodeOutcome {
      report: Some(report),
      failed: false,
      rebuilt,
    }
  }

  /// Build one image with parent refs pointing at their current versions.
  async fn rebuild(&self, image: &Image, parents: &[&Image]) -> Result<(), ExecuteError> {
    let _permit = self.rate_limiter.acquire().await?;

    let replacements: BTreeMap<String, String> = parents
      .iter()
      .map(|parent| {
        (
          parent.docker_ref(&self.config.placeholder_tag),
          parent.current_ref(),
        )
      })
      .filter(|(from, to)| from != to)
      .collect();

    let log_path = self.log_path(image).await?;
    let opts = BuildOpts {
      context: image.dockerfile.context_path.clone(),
      file: image.dockerfile.path(),
      tags: vec![image.current_ref()],
      labels: self.config.metadata.labels_for(image),
      build_args: self.config.build_args.clone(),
      push: self.config.push,
      log_path,
    };

    let replaced = replace_in_file(&image.dockerfile.path(), &replacements).await?;
    info!(
      image = %image.name,
      reference = %image.current_ref(),
      context = %image.dockerfile.context_path.display(),
      "building image"
    );
    let result = self.builder.build(opts).await;

    if let Err(e) = replaced.restore().await {
      warn!(image = %image.name, error = %e, "failed to restore definition file");
    }

    result.map_err(|e| ExecuteError::Build {
      image: image.short_name.clone(),
      message: format!("{e:#}"),
    })
  }

  async fn log_path(&self, image: &Image) -> Result<Option<PathBuf>, ExecuteError> {
    let Some(dir) = &self.config.report_dir else {
      return Ok(None);
    };
    tokio::fs::create_dir_all(dir)
      .await
      .map_err(|source| ExecuteError::ReportDir {
        path: dir.clone(),
        source,
      })?;
    Ok(Some(dir.join(format!("{}.txt", image.short_name.replace('/', "_")))))
  }

  /// Run every supporting test runner concurrently.
  ///
  /// Returns the failure of the first failing runner in configuration order.
  async fn run_tests(&self, image: &Image) -> Result<(), ExecuteError> {
    let opts = RunTestOptions {
      image_name: image.short_name.clone(),
      image_reference: image.current_ref(),
      context_path: image.dockerfile.context_path.clone(),
      report_dir: self.config.report_dir.clone(),
    };
    info!(image = %image.name, reference = %opts.image_reference, "running tests");

    let mut join_set = JoinSet::new();
    for (index, runner) in self.test_runners.iter().enumerate() {
      if !runner.supports(&opts) {
        debug!(image = %image.name, runner = runner.name(), "runner does not support image");
        continue;
      }
      let runner = Arc::clone(runner);
      let opts = opts.clone();
      join_set.spawn(async move {
        let result = runner.run_test(&opts).await;
        (index, runner.name().to_string(), result)
      });
    }

    let mut first_failure: Option<(usize, ExecuteError)> = None;
    while let Some(joined) = join_set.join_next().await {
      let (index, failure) = match joined {
        Ok((_, _, Ok(()))) => continue,
        Ok((index, runner, Err(e))) => (
          index,
          ExecuteError::Tests {
            runner,
            message: format!("{e:#}"),
          },
        ),
        Err(e) => {
          error!(error = %e, "test task panicked");
          (
            usize::MAX,
            ExecuteError::Tests {
              runner: "unknown".to_string(),
              message: e.to_string(),
            },
          )
        }
      };
      if first_failure.as_ref().is_none_or(|(first, _)| index < *first) {
        first_failure = Some((index, failure));
      }
    }

    match first_failure {
      Some((_, e)) => Err(e),
      None => Ok(()),
    }
  }
}
