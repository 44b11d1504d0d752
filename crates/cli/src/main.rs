mod backend;
mod cmd;
mod config;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cmd::BuildArgs;
use crate::output::OutputFormat;

/// imgtree - Incremental builder for trees of container images
#[derive(Parser)]
#[command(name = "imgtree")]
#[command(author, version, about, long_about = None)]
struct Cli {
  #[command(flatten)]
  global: GlobalArgs,

  #[command(subcommand)]
  command: Commands,
}

/// Options shared by every command.
#[derive(Debug, Default, Clone, Args)]
pub struct GlobalArgs {
  /// Config file (default: .imgtree.yaml in the current directory, if present)
  #[arg(short, long, global = true, env = "IMGTREE_CONFIG")]
  pub config: Option<PathBuf>,

  /// Enable verbose output
  #[arg(short, long, global = true)]
  pub verbose: bool,

  /// Directory holding the image definitions (default: docker)
  #[arg(long, global = true, env = "IMGTREE_BUILD_PATH")]
  pub build_path: Option<PathBuf>,

  /// Registry prefix of every image name, e.g. registry.example.org/team
  #[arg(long, global = true, env = "IMGTREE_REGISTRY_URL")]
  pub registry_url: Option<String>,

  /// Tag used in definitions to reference managed parents (default: latest)
  #[arg(long, global = true, env = "IMGTREE_PLACEHOLDER_TAG")]
  pub placeholder_tag: Option<String>,

  /// Custom 256-word list for images opting in to it
  #[arg(long, global = true, env = "IMGTREE_HASH_LIST_FILE_PATH")]
  pub hash_list_file_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
  /// Rebuild every image whose content changed, then promote the new tags
  Build(BuildArgs),

  /// List every image with its content hash
  List {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
  },

  /// Print one hash covering every file of the build directory
  Hash,
}

fn main() {
  let cli = Cli::parse();

  let default_level = if cli.global.verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  if let Err(e) = run(cli) {
    output::print_error(&format!("{e:#}"));
    std::process::exit(1);
  }
}

fn run(cli: Cli) -> Result<()> {
  let settings = config::Settings::load(&cli.global)?;

  match cli.command {
    Commands::Build(args) => cmd::cmd_build(settings, &args),
    Commands::List { output } => cmd::cmd_list(&settings, output),
    Commands::Hash => cmd::cmd_hash(&settings),
  }
}
