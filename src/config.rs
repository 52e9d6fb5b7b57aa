//! # Configuration
//!
//! Loads the optional configuration file. Every field has a default and a
//! missing file is not an error, so a bare `abackup backup --id x --dir .`
//! works without any setup. YAML is the native format; files ending in
//! `.toml` are read as TOML instead.
//!
//! The loaded [`Config`] is immutable and passed by reference to every
//! component that needs it.

use crate::error::{ConfigError, Result};
use crate::naming::NamingScheme;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{env, fs};

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "abackup.yml";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Remote name template for full backups.
    pub full_backup_name: String,

    /// Remote name template for differential backups.
    pub diff_backup_name: String,

    /// Transfer command used for ls/get/put.
    pub s3cmd: String,

    /// Credentials file handed to the transfer command with `-c`.
    pub s3cmd_cfg: PathBuf,

    /// Bucket, optionally followed by a key prefix (`bucket/some/prefix`).
    pub s3bucket: String,

    /// Where archives are written before upload and fetched before extraction.
    pub staging_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            full_backup_name: default_full_backup_name(),
            diff_backup_name: default_diff_backup_name(),
            s3cmd: "s3cmd".to_string(),
            s3cmd_cfg: default_s3cmd_cfg(),
            s3bucket: "backups".to_string(),
            staging_dir: env::temp_dir(),
        }
    }
}

impl Config {
    /// `s3://<bucket>/`, the root every remote path lives under.
    pub fn remote_root(&self) -> String {
        format!("s3://{}/", self.s3bucket.trim_matches('/'))
    }
}

fn default_full_backup_name() -> String {
    "{id}_full_{full_ts}.tar.gz".to_string()
}
fn default_diff_backup_name() -> String {
    "{id}_full_{full_ts}_diff_{diff_ts}.tar.gz".to_string()
}
fn default_s3cmd_cfg() -> PathBuf {
    match env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".s3cfg"),
        Err(_) => PathBuf::from(".s3cfg"),
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "toml")
}

/// Loads and validates configuration from `path`. A missing file yields the
/// defaults.
pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;

    let config = parse_config(path, &content)?;
    validate_config(&config)?;
    Ok(config)
}

fn parse_config(path: &Path, content: &str) -> std::result::Result<Config, ConfigError> {
    let parse_error = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    if content.trim().is_empty() {
        return Ok(Config::default());
    }

    if is_toml(path) {
        toml::from_str(content).map_err(|e| parse_error(e.to_string()))
    } else {
        serde_yaml::from_str(content).map_err(|e| parse_error(e.to_string()))
    }
}

/// Validates configuration invariants after parsing.
fn validate_config(config: &Config) -> std::result::Result<(), ConfigError> {
    if config.s3bucket.trim_matches('/').is_empty() {
        return Err(ConfigError::Validation {
            message: "s3bucket must not be empty".to_string(),
        });
    }

    if config.s3cmd.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "s3cmd must not be empty".to_string(),
        });
    }

    NamingScheme::new(&config.full_backup_name, &config.diff_backup_name)?;

    Ok(())
}

/// Writes the default configuration to `path`, as YAML or TOML by extension.
pub fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(anyhow::anyhow!("config file already exists: {}", path.display()).into());
    }

    let config = Config::default();
    let rendered = if is_toml(path) {
        toml::to_string_pretty(&config)
            .map_err(|e| anyhow::anyhow!("failed to serialize config: {e}"))?
    } else {
        serde_yaml::to_string(&config)
            .map_err(|e| anyhow::anyhow!("failed to serialize config: {e}"))?
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, rendered)?;

    Ok(())
}
