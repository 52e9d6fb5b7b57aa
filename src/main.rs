//! # abackup
//!
//! Full and differential directory backups as `.tar.gz` archives, stored in an
//! S3 bucket through `s3cmd` and restored as "latest full + latest
//! differential".
//!
//! ## Architecture
//!
//! ```text
//!                   ┌──────────────┐
//!                   │  CLI (clap)  │
//!                   └──────┬───────┘
//!            ┌─────────────┼─────────────┐
//!            ▼             ▼             ▼
//!       ┌────────┐    ┌────────┐    ┌─────────┐
//!       │ Backup │    │  List  │    │ Restore │
//!       └───┬────┘    └───┬────┘    └────┬────┘
//!           │             ▼              │
//!           │       ┌───────────┐        │
//!           ├──────▶│  Lineage  │◀───────┤
//!           │       └─────┬─────┘        │
//!           │             ▼              │
//!           │       ┌───────────┐        │
//!           │       │  Catalog  │        │
//!           │       └─────┬─────┘        │
//!           │             ▼              │
//!           │       ┌───────────┐        │
//!           │       │  Naming   │        │
//!           │       └───────────┘        │
//!           ▼                            ▼
//!     ┌──────────┐                ┌──────────┐
//!     │ Archive  │                │  Remote  │
//!     │ (tar.gz) │                │ (s3cmd)  │
//!     └──────────┘                └──────────┘
//! ```
//!
//! ## Remote layout
//!
//! ```text
//! s3://<bucket>/
//! ├── www_full_1700000000.tar.gz
//! ├── www_full_1700000000_diff_1700086400.tar.gz
//! └── www_full_1700000000_diff_1700172800.tar.gz   ← restored on top of the full
//! ```

mod archive;
mod backup;
mod catalog;
mod config;
mod error;
mod lineage;
mod naming;
mod record;
mod remote;
mod restore;

use clap::{Parser, Subcommand};
use error::ValidationError;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// abackup: full and differential directory backups to S3
#[derive(Parser, Debug)]
#[command(
    name = "abackup",
    version,
    about = "Full and differential tar.gz backups of a directory, stored in S3",
    long_about = "abackup archives a directory as a full backup, or as a differential \
                  holding only files changed since a full backup, and can push the \
                  archive to an S3 bucket with s3cmd.\n\n\
                  Restoring fetches the newest full backup and the newest differential \
                  anchored to it, and extracts them in that order."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (YAML, or TOML by extension)
    #[arg(short, long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a configuration file with the default settings
    Init {
        /// Output path for the configuration file
        #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
        output: PathBuf,
    },

    /// Archive a directory as a full or differential backup
    Backup {
        /// Backup identifier (no whitespace or path separators)
        #[arg(short, long)]
        id: Option<String>,

        /// Directory to back up
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Push the archive to the S3 bucket
        #[arg(short, long)]
        s3: bool,

        /// Only back up files modified at or after this unix timestamp, or
        /// "s3" to anchor at the newest full backup in the bucket
        #[arg(short, long)]
        after: Option<String>,
    },

    /// List backups in the bucket, grouped by identifier
    List {
        /// Only show this identifier ("all" shows everything)
        #[arg(short, long)]
        id: Option<String>,

        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },

    /// Restore the latest full backup plus its latest differential
    Restore {
        /// Backup identifier to restore
        #[arg(short, long)]
        id: Option<String>,

        /// Directory to extract into
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Do not ask for confirmation
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("{} {}", colored::Colorize::red("error:"), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> error::Result<()> {
    match &cli.command {
        Command::Init { output } => cmd_init(output),
        Command::Backup { id, dir, s3, after } => {
            cmd_backup(&cli, id.as_deref(), dir.as_deref(), *s3, after.as_deref())
        }
        Command::List { id, json } => cmd_list(&cli, id.as_deref(), *json),
        Command::Restore { id, dir, force } => cmd_restore(&cli, id.as_deref(), dir, *force),
    }
}

// ─── Command Implementations ────────────────────────────────────────────────

fn cmd_init(output: &Path) -> error::Result<()> {
    config::init_config(output)?;
    eprintln!(
        "{} Created configuration file: {}",
        colored::Colorize::green("✓"),
        output.display(),
    );
    eprintln!("  Set s3bucket and s3cmd_cfg, then run:");
    eprintln!(
        "  {} abackup backup --id <name> --dir <path> --s3",
        colored::Colorize::bold("$")
    );
    Ok(())
}

fn cmd_backup(
    cli: &Cli,
    id: Option<&str>,
    dir: Option<&Path>,
    push: bool,
    after: Option<&str>,
) -> error::Result<()> {
    let id = validate_identifier(id)?;
    let dir = dir.ok_or(ValidationError::MissingParameter("--dir"))?;
    let after = match after {
        Some(value) => value.parse::<backup::AfterPolicy>()?,
        None => backup::AfterPolicy::Unset,
    };

    let cfg = config::load_config_from(&cli.config)?;
    let naming = naming::NamingScheme::from_config(&cfg)?;
    let store = remote::S3Cmd::from_config(&cfg);

    let source = std::fs::canonicalize(dir)
        .map_err(|_| error::ArchiveError::SourceNotFound(dir.to_path_buf()))?;

    print_header("backup", id);

    let request = backup::BackupRequest {
        id,
        source: &source,
        after,
        push,
        verbose: cli.verbose,
    };
    let outcome = backup::run_backup(&cfg, &naming, &store, &request)?;
    backup::print_backup_summary(&outcome);

    Ok(())
}

/// One identifier's records in `list --json` output.
#[derive(Serialize)]
struct ListingGroup<'a> {
    id: &'a str,
    backups: &'a [record::BackupRecord],
}

fn cmd_list(cli: &Cli, id: Option<&str>, json: bool) -> error::Result<()> {
    let cfg = config::load_config_from(&cli.config)?;
    let naming = naming::NamingScheme::from_config(&cfg)?;
    let store = remote::S3Cmd::from_config(&cfg);

    let filter = catalog::IdFilter::from_arg(id);
    let catalog = catalog::fetch_catalog(&store, &naming, &filter)?;

    if json {
        let groups: Vec<_> = catalog
            .groups()
            .map(|(id, backups)| ListingGroup { id, backups })
            .collect();
        let rendered = serde_json::to_string_pretty(&groups)
            .map_err(|e| anyhow::anyhow!("failed to serialize listing: {e}"))?;
        println!("{rendered}");
        return Ok(());
    }

    if catalog.is_empty() {
        eprintln!("No backups found.");
        return Ok(());
    }

    for (id, records) in catalog.groups() {
        println!("\n-- {}", colored::Colorize::bold(id));
        for record in records {
            println!(
                "[{}] [{}] {}",
                record.kind,
                record.created_display(),
                record.remote_path
            );
        }
    }

    eprintln!();
    eprintln!("  {} backup(s)", catalog.len());

    Ok(())
}

fn cmd_restore(cli: &Cli, id: Option<&str>, dir: &Path, force: bool) -> error::Result<()> {
    let id = validate_identifier(id)?;

    let cfg = config::load_config_from(&cli.config)?;
    let naming = naming::NamingScheme::from_config(&cfg)?;
    let store = remote::S3Cmd::from_config(&cfg);

    print_header("restore", id);

    let request = restore::RestoreRequest {
        id,
        destination: dir,
        force,
        verbose: cli.verbose,
    };
    let stats = restore::run_restore(&cfg, &naming, &store, &request, &mut std::io::stdin().lock())?;

    eprintln!();
    eprintln!(
        "  {} Restored {} files ({}) from {} archive(s)",
        colored::Colorize::green("✓"),
        stats.files_restored,
        backup::format_size(stats.bytes_restored),
        stats.archives,
    );

    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Checks that an identifier was given and is usable in a file name.
fn validate_identifier(id: Option<&str>) -> Result<&str, ValidationError> {
    let id = id
        .filter(|id| !id.is_empty())
        .ok_or(ValidationError::MissingParameter("--id"))?;

    let illegal = |reason| ValidationError::IllegalIdentifier {
        id: id.to_string(),
        reason,
    };

    if id.chars().any(char::is_whitespace) {
        return Err(illegal("cannot contain spaces"));
    }
    if id.contains(&['/', '\\'][..]) {
        return Err(illegal("cannot contain path separators"));
    }

    Ok(id)
}

/// `abackup 0.1.0 · backup www`
fn print_header(action: &str, id: &str) {
    eprintln!();
    eprintln!(
        "  {} {} {} {action} {}",
        colored::Colorize::bold("abackup"),
        env!("CARGO_PKG_VERSION"),
        colored::Colorize::dimmed("·"),
        colored::Colorize::cyan(id),
    );
    eprintln!();
}
