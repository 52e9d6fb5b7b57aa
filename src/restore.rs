//! # Restore
//!
//! Reconstructs the latest state of an identifier: the newest full backup,
//! then the newest differential anchored to it extracted on top. Extraction
//! is strictly sequential so the differential overlays the full archive.
//!
//! Nothing is fetched or written until the user has seen the restore set and
//! confirmed it (or passed `--force`).

use crate::archive;
use crate::catalog::{fetch_catalog, IdFilter};
use crate::config::Config;
use crate::error::{AbackupError, Result};
use crate::lineage::{self, RestoreSet};
use crate::naming::NamingScheme;
use crate::remote::RemoteStore;
use std::io::{BufRead, Write};
use std::path::Path;

/// The only answer that lets a restore proceed.
pub const CONFIRMATION: &str = "yes";

/// Options controlling restore behavior.
#[derive(Debug, Clone)]
pub struct RestoreRequest<'a> {
    pub id: &'a str,

    /// Directory the archives are extracted into.
    pub destination: &'a Path,

    /// Skip the confirmation prompt.
    pub force: bool,

    pub verbose: bool,
}

/// Statistics from a restore operation.
#[derive(Debug, Default)]
pub struct RestoreStats {
    pub archives: usize,
    pub files_restored: u64,
    pub bytes_restored: u64,
}

/// Lists the bucket and selects what to restore for `id`.
pub fn plan_restore(store: &dyn RemoteStore, naming: &NamingScheme, id: &str) -> Result<RestoreSet> {
    let catalog = fetch_catalog(store, naming, &IdFilter::Only(id.to_string()))?;
    lineage::restore_set(&catalog, id)
}

/// One line per archive, in the order they will be applied.
pub fn summary_lines(set: &RestoreSet) -> Vec<String> {
    set.archives()
        .map(|record| {
            format!(
                "[{}] [{}] {}",
                record.kind,
                record.created_display(),
                record.remote_path
            )
        })
        .collect()
}

/// Asks for confirmation on `out` and reads one line from `input`.
///
/// Only an exact `yes` (surrounding whitespace ignored) confirms.
pub fn confirm<R: BufRead, W: Write>(input: &mut R, out: &mut W) -> Result<bool> {
    write!(out, "  Type '{CONFIRMATION}' to restore: ")?;
    out.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(answer.trim() == CONFIRMATION)
}

/// Runs a restore end to end. `input` supplies the confirmation answer.
pub fn run_restore<R: BufRead>(
    config: &Config,
    naming: &NamingScheme,
    store: &dyn RemoteStore,
    request: &RestoreRequest,
    input: &mut R,
) -> Result<RestoreStats> {
    let set = plan_restore(store, naming, request.id)?;

    eprintln!(
        "  Restoring '{}' into {} ({} archive(s))",
        request.id,
        request.destination.display(),
        set.len(),
    );
    for line in summary_lines(&set) {
        eprintln!("    {line}");
    }
    eprintln!();

    if !request.force && !confirm(input, &mut std::io::stderr())? {
        return Err(AbackupError::Aborted);
    }

    std::fs::create_dir_all(&config.staging_dir)?;

    let mut stats = RestoreStats::default();
    for record in set.archives() {
        let staged = config.staging_dir.join(record.file_name());

        eprintln!(
            "  {} Fetching {}",
            colored::Colorize::bold(colored::Colorize::cyan("▶")),
            record.remote_path,
        );
        store.get(&record.remote_path, &staged)?;

        let extracted = archive::extract_archive(&staged, request.destination, request.verbose)?;
        stats.archives += 1;
        stats.files_restored += extracted.files;
        stats.bytes_restored += extracted.bytes;
    }

    Ok(stats)
}
