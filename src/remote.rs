//! # Remote Store
//!
//! Object storage is reached through an external transfer command (`s3cmd`
//! by default). The tool only needs three operations from it: a text listing
//! whose last column is the object path, a download to a local file, and an
//! upload from one.

use crate::config::Config;
use crate::error::{RemoteError, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// The capability the orchestrators need from object storage.
pub trait RemoteStore {
    /// Lists objects under `prefix`, one per line, path in the last column.
    fn list(&self, prefix: &str) -> Result<String>;

    /// Downloads `remote` into `local`, replacing any existing file.
    fn get(&self, remote: &str, local: &Path) -> Result<()>;

    /// Uploads `local` to `remote`.
    fn put(&self, local: &Path, remote: &str) -> Result<()>;
}

/// [`RemoteStore`] backed by the `s3cmd` command-line client.
#[derive(Debug, Clone)]
pub struct S3Cmd {
    program: String,
    config_path: PathBuf,
}

impl S3Cmd {
    pub fn new(program: impl Into<String>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            config_path: config_path.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.s3cmd.clone(), config.s3cmd_cfg.clone())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-c").arg(&self.config_path);
        cmd
    }

    fn run(&self, action: &'static str, mut cmd: Command) -> Result<Output> {
        let output = cmd.output().map_err(|source| RemoteError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(RemoteError::Failed {
                program: self.program.clone(),
                action,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        Ok(output)
    }
}

impl RemoteStore for S3Cmd {
    fn list(&self, prefix: &str) -> Result<String> {
        let mut cmd = self.command();
        cmd.arg("ls").arg("--recursive").arg(prefix);
        let output = self.run("ls", cmd)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn get(&self, remote: &str, local: &Path) -> Result<()> {
        let mut cmd = self.command();
        cmd.arg("get").arg("--force").arg(remote).arg(local);
        self.run("get", cmd)?;
        Ok(())
    }

    fn put(&self, local: &Path, remote: &str) -> Result<()> {
        let mut cmd = self.command();
        cmd.arg("put").arg(local).arg(remote);
        self.run("put", cmd)?;
        Ok(())
    }
}
