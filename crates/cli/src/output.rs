//! CLI output formatting utilities.
//!
//! Colored status lines, image listings and plan summaries printed to the
//! terminal. Logs go to stderr through tracing; these helpers own stdout.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use imgtree_lib::image::Image;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const REBUILD: &str = "+";
  pub const RETEST: &str = "~";
  pub const RETAG: &str = "→";
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

/// One-word summary of what the planner decided for an image.
pub fn plan_action(image: &Image) -> Option<(&'static str, &'static str)> {
  if image.needs_rebuild {
    Some((symbols::REBUILD, "rebuild"))
  } else if image.needs_tests {
    Some((symbols::RETEST, "test"))
  } else if image.needs_retag {
    Some((symbols::RETAG, "retag"))
  } else {
    None
  }
}

pub fn print_plan_line(image: &Image) {
  let Some((symbol, action)) = plan_action(image) else {
    return;
  };
  let symbol = match action {
    "rebuild" => symbol.if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
    "test" => symbol.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
    _ => symbol.if_supports_color(Stream::Stdout, |s| s.blue()).to_string(),
  };
  println!(
    "  {} {} {}",
    symbol,
    image.current_ref(),
    format!("({})", action).if_supports_color(Stream::Stdout, |s| s.dimmed())
  );
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
