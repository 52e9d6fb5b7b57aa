//! # Error Types
//!
//! Structured error hierarchy for the backup tool using `thiserror`.
//!
//! Catalog building and name parsing never produce errors: a listing line that
//! does not parse is simply left out. Everything represented here is fatal to
//! the current invocation and ends up as a single `error:` line on stderr.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type encompassing all failure modes of a command.
#[derive(Error, Debug)]
pub enum AbackupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("no backups found for '{0}'")]
    NotFound(String),

    #[error("aborted, nothing was restored")]
    Aborted,

    #[error("refusing to extract archive: {0}")]
    Security(#[from] SecurityError),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("remote transfer failed: {0}")]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading and naming template errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid config: {message}")]
    Validation { message: String },

    #[error("malformed template '{template}': {message}")]
    Template { template: String, message: String },

    #[error("template '{template}' has no value for placeholder {{{name}}}")]
    MissingPlaceholder { template: String, name: String },
}

/// Command-line arguments rejected before any work starts.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required parameter {0}")]
    MissingParameter(&'static str),

    #[error("id '{id}' {reason}")]
    IllegalIdentifier { id: String, reason: &'static str },

    #[error("--after must be a unix timestamp or \"s3\", got '{0}'")]
    InvalidAfter(String),
}

/// Errors while walking a source tree or writing/reading an archive.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("source directory does not exist: {0}")]
    SourceNotFound(PathBuf),

    #[error("failed to walk source directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("failed to add {path} to archive: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read archive {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An archive member that would land outside the destination directory.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SecurityError {
    #[error("member '{member}' escapes destination {destination}")]
    PathTraversal {
        member: PathBuf,
        destination: PathBuf,
    },

    #[error("link '{member}' points outside the destination: {target}")]
    LinkTraversal { member: PathBuf, target: PathBuf },
}

/// Failures of the external transfer command.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("could not run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program} {action}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        action: &'static str,
        status: String,
        stderr: String,
    },
}

pub type Result<T> = std::result::Result<T, AbackupError>;
