//! Settings resolution.
//!
//! Every setting comes from, in order of precedence: a command line flag (or
//! its `IMGTREE_*` environment variable), the YAML config file, then the
//! built-in default.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::debug;

use imgtree_lib::consts::DEFAULT_PLACEHOLDER_TAG;
use imgtree_lib::generate::GenerateOptions;

use crate::GlobalArgs;

/// Config file looked up in the current directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = ".imgtree.yaml";

pub const DEFAULT_BUILD_PATH: &str = "docker";
pub const DEFAULT_REPORTS_DIR: &str = "reports";
pub const DEFAULT_RATE_LIMIT: usize = 1;

/// Contents of the YAML config file. Every key is optional.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
  pub build_path: Option<PathBuf>,
  pub registry_url: Option<String>,
  pub placeholder_tag: Option<String>,
  pub hash_list_file_path: Option<PathBuf>,
  pub rate_limit: Option<usize>,
  pub reports_dir: Option<PathBuf>,
  pub build_arg: BTreeMap<String, String>,
  pub push: Option<bool>,
}

impl FileConfig {
  /// Read `explicit`, or the default file if it exists.
  ///
  /// An explicit path must exist; a missing default file yields an empty config.
  pub fn load(explicit: Option<&Path>) -> Result<Self> {
    let path = match explicit {
      Some(path) => path.to_path_buf(),
      None => {
        let default = PathBuf::from(DEFAULT_CONFIG_FILE);
        if !default.exists() {
          return Ok(Self::default());
        }
        default
      }
    };

    debug!(path = %path.display(), "loading config file");
    let content =
      std::fs::read_to_string(&path).with_context(|| format!("Failed to read config file: {}", path.display()))?;
    Self::parse(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
  }

  pub fn parse(content: &str) -> Result<Self> {
    if content.trim().is_empty() {
      return Ok(Self::default());
    }
    Ok(serde_yaml::from_str(content)?)
  }
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
  pub build_path: PathBuf,
  /// Only commands naming images need it; see [`Settings::registry_url`].
  pub registry_url: Option<String>,
  pub placeholder_tag: String,
  pub hash_list_file_path: Option<PathBuf>,
  pub rate_limit: usize,
  pub reports_dir: PathBuf,
  pub build_args: BTreeMap<String, String>,
  pub push: bool,
}

impl Settings {
  pub fn load(global: &GlobalArgs) -> Result<Self> {
    let file = FileConfig::load(global.config.as_deref())?;
    Self::resolve(global, file)
  }

  /// The build path as an absolute path, without Windows UNC prefixes.
  pub fn canonical_build_path(&self) -> Result<PathBuf> {
    dunce::canonicalize(&self.build_path)
      .with_context(|| format!("Build path not found: {}", self.build_path.display()))
  }

  /// Registry prefix of every image name.
  pub fn registry_url(&self) -> Result<&str> {
    match &self.registry_url {
      Some(url) => Ok(url),
      None => bail!(
        "No registry URL configured: pass --registry-url, set IMGTREE_REGISTRY_URL or add registry_url to the config file"
      ),
    }
  }

  pub fn generate_options(&self) -> GenerateOptions {
    GenerateOptions {
      custom_hash_list: self.hash_list_file_path.clone(),
      build_args: self.build_args.clone(),
    }
  }

  pub fn resolve(global: &GlobalArgs, file: FileConfig) -> Result<Self> {
    let registry_url = global
      .registry_url
      .clone()
      .or(file.registry_url)
      .map(|url| url.trim_end_matches('/').to_string());

    Ok(Self {
      build_path: global
        .build_path
        .clone()
        .or(file.build_path)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BUILD_PATH)),
      registry_url,
      placeholder_tag: global
        .placeholder_tag
        .clone()
        .or(file.placeholder_tag)
        .unwrap_or_else(|| DEFAULT_PLACEHOLDER_TAG.to_string()),
      hash_list_file_path: global.hash_list_file_path.clone().or(file.hash_list_file_path),
      rate_limit: file.rate_limit.unwrap_or(DEFAULT_RATE_LIMIT),
      reports_dir: file.reports_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_REPORTS_DIR)),
      build_args: file.build_arg,
      push: file.push.unwrap_or(false),
    })
  }
}

/// Parse a `KEY=VALUE` build argument.
pub fn parse_build_arg(arg: &str) -> Result<(String, String)> {
  match arg.split_once('=') {
    Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
    _ => bail!("Invalid build argument '{}': expected KEY=VALUE", arg),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn global(registry: Option<&str>) -> GlobalArgs {
    GlobalArgs {
      registry_url: registry.map(str::to_string),
      ..Default::default()
    }
  }

  #[test]
  fn defaults_apply_without_file() {
    let settings = Settings::resolve(&global(Some("registry.example.org/")), FileConfig::default()).unwrap();

    assert_eq!(settings.registry_url().unwrap(), "registry.example.org");
    assert_eq!(settings.build_path, PathBuf::from("docker"));
    assert_eq!(settings.placeholder_tag, "latest");
    assert_eq!(settings.rate_limit, 1);
    assert_eq!(settings.reports_dir, PathBuf::from("reports"));
    assert!(!settings.push);
  }

  #[test]
  fn file_values_override_defaults_and_flags_override_file() {
    let file = FileConfig::parse(
      r#"
build_path: images
registry_url: file.example.org
placeholder_tag: stable
rate_limit: 4
push: true
build_arg:
  HTTP_PROXY: http://proxy:3128
"#,
    )
    .unwrap();

    let mut args = global(Some("flag.example.org"));
    args.placeholder_tag = Some("edge".to_string());
    let settings = Settings::resolve(&args, file).unwrap();

    assert_eq!(settings.registry_url().unwrap(), "flag.example.org");
    assert_eq!(settings.placeholder_tag, "edge");
    assert_eq!(settings.build_path, PathBuf::from("images"));
    assert_eq!(settings.rate_limit, 4);
    assert!(settings.push);
    assert_eq!(settings.build_args.get("HTTP_PROXY").map(String::as_str), Some("http://proxy:3128"));

    let options = settings.generate_options();
    assert_eq!(options.build_args, settings.build_args);
    assert!(options.custom_hash_list.is_none());
  }

  #[test]
  fn missing_registry_is_an_error_only_when_needed() {
    let settings = Settings::resolve(&global(None), FileConfig::default()).unwrap();
    assert!(settings.registry_url.is_none());

    let err = settings.registry_url().unwrap_err();
    assert!(err.to_string().contains("registry"));
  }

  #[test]
  fn unknown_keys_are_rejected() {
    assert!(FileConfig::parse("registry: typo.example.org\n").is_err());
    assert_eq!(FileConfig::parse("").unwrap(), FileConfig::default());
  }

  #[test]
  fn explicit_config_file_must_exist() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("missing.yaml");
    assert!(FileConfig::load(Some(&missing)).is_err());

    let present = temp.path().join("imgtree.yaml");
    std::fs::write(&present, "registry_url: registry.example.org\n").unwrap();
    let file = FileConfig::load(Some(&present)).unwrap();
    assert_eq!(file.registry_url.as_deref(), Some("registry.example.org"));
  }

  #[test]
  fn missing_build_path_is_reported() {
    let temp = TempDir::new().unwrap();
    let mut settings = Settings::resolve(&global(Some("registry.example.org")), FileConfig::default()).unwrap();

    settings.build_path = temp.path().join("absent");
    let err = settings.canonical_build_path().unwrap_err();
    assert!(err.to_string().contains("Build path not found"));

    settings.build_path = temp.path().to_path_buf();
    assert!(settings.canonical_build_path().unwrap().is_absolute());
  }

  #[test]
  fn build_arg_parsing() {
    assert_eq!(
      parse_build_arg("A=b=c").unwrap(),
      ("A".to_string(), "b=c".to_string())
    );
    assert_eq!(parse_build_arg("EMPTY=").unwrap(), ("EMPTY".to_string(), String::new()));
    assert!(parse_build_arg("novalue").is_err());
    assert!(parse_build_arg("=value").is_err());
  }
}
