//! Summaries of a rebuild run.

use thiserror::Error;
use tracing::{error, info};

use crate::execute::BuildReport;

#[derive(Debug, Error)]
pub enum ReportError {
  #[error("{count} image(s) failed to build or test: {}", .images.join(", "))]
  Failed { count: usize, images: Vec<String> },
}

/// Log one line per report.
pub fn print_reports(reports: &[BuildReport]) {
  if reports.is_empty() {
    info!("no image needed a rebuild");
    return;
  }

  for report in reports {
    let message = report.failure_message.as_deref().unwrap_or("");
    if report.is_failure() {
      error!(
        image = %report.short_name,
        build = %report.build_status,
        tests = %report.tests_status,
        "{}",
        message
      );
    } else {
      info!(
        image = %report.short_name,
        build = %report.build_status,
        tests = %report.tests_status,
        "image done"
      );
    }
  }
}

/// Fail if any report has a failed build, a failed parent or failed tests.
pub fn check_reports(reports: &[BuildReport]) -> Result<(), ReportError> {
  let images: Vec<String> = reports
    .iter()
    .filter(|report| report.is_failure())
    .map(|report| report.short_name.clone())
    .collect();

  if images.is_empty() {
    Ok(())
  } else {
    Err(ReportError::Failed {
      count: images.len(),
      images,
    })
  }
}
