//! # Backup
//!
//! Decides between a full and a differential backup, names it, writes the
//! archive to the staging directory and optionally pushes it.
//!
//! ## Anchor resolution
//!
//! 1. `--after` unset: full backup
//! 2. `--after TS`: differential of files modified at or after `TS`, anchored
//!    at `TS` (a non-positive `TS` means full)
//! 3. `--after s3`: anchored at the newest full backup in the bucket, or a full
//!    backup when there is none
//!
//! Only full backups are consulted; a differential always references a full
//! backup, never another differential.

use crate::archive::{self, ArchiveStats};
use crate::catalog::{fetch_catalog, IdFilter};
use crate::config::Config;
use crate::error::{Result, ValidationError};
use crate::lineage;
use crate::naming::NamingScheme;
use crate::record::BackupKind;
use crate::remote::RemoteStore;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

/// Value of `--after` that means "ask the bucket".
pub const AFTER_REMOTE: &str = "s3";

/// How the anchor of a backup is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterPolicy {
    Unset,
    Since(i64),
    LatestRemote,
}

impl FromStr for AfterPolicy {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s == AFTER_REMOTE {
            return Ok(AfterPolicy::LatestRemote);
        }
        s.trim()
            .parse::<i64>()
            .map(AfterPolicy::Since)
            .map_err(|_| ValidationError::InvalidAfter(s.to_string()))
    }
}

/// Everything `backup` needs from the command line.
#[derive(Debug, Clone)]
pub struct BackupRequest<'a> {
    pub id: &'a str,
    pub source: &'a Path,
    pub after: AfterPolicy,
    pub push: bool,
    pub verbose: bool,
}

/// What a backup will produce and where it goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPlan {
    pub kind: BackupKind,
    /// Files older than this are left out. `None` for full backups.
    pub anchor: Option<i64>,
    pub remote_path: String,
    pub local_path: PathBuf,
}

/// Result of a completed backup.
#[derive(Debug, Clone)]
pub struct BackupOutcome {
    pub plan: BackupPlan,
    pub stats: ArchiveStats,
    pub pushed: bool,
    pub duration_ms: u64,
}

/// Turns the `--after` policy into an anchor timestamp, or `None` for a full
/// backup.
pub fn resolve_anchor(
    after: AfterPolicy,
    id: &str,
    naming: &NamingScheme,
    store: &dyn RemoteStore,
) -> Result<Option<i64>> {
    let ts = match after {
        AfterPolicy::Unset => return Ok(None),
        AfterPolicy::Since(ts) => ts,
        AfterPolicy::LatestRemote => {
            let catalog = fetch_catalog(store, naming, &IdFilter::Only(id.to_string()))?;
            lineage::latest_full_ts(&catalog, id)
        }
    };
    Ok((ts > 0).then_some(ts))
}

/// Names the backup. `now` becomes the full timestamp of a full backup or the
/// differential timestamp of a differential one.
pub fn plan_backup(
    naming: &NamingScheme,
    staging_dir: &Path,
    id: &str,
    anchor: Option<i64>,
    now: i64,
) -> Result<BackupPlan> {
    let (kind, remote_path) = match anchor {
        Some(full_ts) => (
            BackupKind::Differential,
            naming.render(BackupKind::Differential, id, full_ts, Some(now))?,
        ),
        None => (BackupKind::Full, naming.render(BackupKind::Full, id, now, None)?),
    };

    Ok(BackupPlan {
        kind,
        anchor,
        remote_path,
        local_path: staging_dir.join(format!("{id}.tar.gz")),
    })
}

/// Runs a backup end to end.
pub fn run_backup(
    config: &Config,
    naming: &NamingScheme,
    store: &dyn RemoteStore,
    request: &BackupRequest,
) -> Result<BackupOutcome> {
    let anchor = resolve_anchor(request.after, request.id, naming, store)?;
    let now = chrono::Utc::now().timestamp();
    let plan = plan_backup(naming, &config.staging_dir, request.id, anchor, now)?;

    eprintln!(
        "  {} Creating {} backup {}",
        colored::Colorize::bold(colored::Colorize::cyan("▶")),
        plan.kind,
        plan.local_path.display(),
    );
    if let Some(ts) = plan.anchor {
        eprintln!(
            "    Anchor:      {} ({})",
            ts,
            crate::record::format_timestamp(ts)
        );
    }

    let start = Instant::now();
    let stats = archive::create_archive(&plan.local_path, request.source, plan.anchor, request.verbose)?;

    if request.push {
        eprintln!(
            "  {} Uploading to {}",
            colored::Colorize::bold(colored::Colorize::cyan("▶")),
            plan.remote_path,
        );
        store.put(&plan.local_path, &plan.remote_path)?;
    }

    Ok(BackupOutcome {
        plan,
        stats,
        pushed: request.push,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Prints a summary of the completed backup.
pub fn print_backup_summary(outcome: &BackupOutcome) {
    eprintln!();
    eprintln!(
        "  {} {} backup: {}",
        colored::Colorize::green("✓"),
        outcome.plan.kind,
        colored::Colorize::bold(outcome.plan.remote_path.as_str()),
    );
    eprintln!(
        "    Files:       {} ({})",
        outcome.stats.files,
        format_size(outcome.stats.bytes)
    );
    if outcome.stats.links > 0 {
        eprintln!("    Links:       {}", outcome.stats.links);
    }
    eprintln!("    Archive:     {}", outcome.plan.local_path.display());
    eprintln!(
        "    Uploaded:    {}",
        if outcome.pushed { "yes" } else { "no (local only)" }
    );
    eprintln!("    Duration:    {:.2}s", outcome.duration_ms as f64 / 1000.0);
}

/// Byte count in binary units, one decimal place.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::testing::MemoryStore;

    fn naming() -> NamingScheme {
        NamingScheme::new(
            "{id}_full_{full_ts}.tar.gz",
            "{id}_full_{full_ts}_diff_{diff_ts}.tar.gz",
        )
        .unwrap()
        .with_prefix("s3://bucket/")
    }

    #[test]
    fn after_parses_timestamps_and_remote() {
        assert_eq!("s3".parse::<AfterPolicy>(), Ok(AfterPolicy::LatestRemote));
        assert_eq!("1700000000".parse::<AfterPolicy>(), Ok(AfterPolicy::Since(1_700_000_000)));
        assert_eq!(
            "yesterday".parse::<AfterPolicy>(),
            Err(ValidationError::InvalidAfter("yesterday".to_string()))
        );
    }

    #[test]
    fn non_positive_anchor_means_full() {
        let store = MemoryStore::default();
        let n = naming();
        assert_eq!(resolve_anchor(AfterPolicy::Unset, "x", &n, &store).unwrap(), None);
        assert_eq!(resolve_anchor(AfterPolicy::Since(0), "x", &n, &store).unwrap(), None);
        assert_eq!(resolve_anchor(AfterPolicy::Since(-5), "x", &n, &store).unwrap(), None);
        assert_eq!(
            resolve_anchor(AfterPolicy::Since(500), "x", &n, &store).unwrap(),
            Some(500)
        );
    }

    #[test]
    fn remote_anchor_uses_newest_full_only() {
        let store = MemoryStore::default();
        store.insert("s3://bucket/x_full_100.tar.gz", vec![]);
        store.insert("s3://bucket/x_full_300.tar.gz", vec![]);
        store.insert("s3://bucket/x_full_300_diff_900.tar.gz", vec![]);
        store.insert("s3://bucket/y_full_999.tar.gz", vec![]);

        let anchor = resolve_anchor(AfterPolicy::LatestRemote, "x", &naming(), &store).unwrap();
        assert_eq!(anchor, Some(300));
    }

    #[test]
    fn remote_anchor_without_full_falls_back_to_full_backup() {
        let store = MemoryStore::default();
        store.insert("s3://bucket/x_full_300_diff_900.tar.gz", vec![]);
        let anchor = resolve_anchor(AfterPolicy::LatestRemote, "x", &naming(), &store).unwrap();
        assert_eq!(anchor, None);
    }

    #[test]
    fn plan_names_full_and_differential() {
        let n = naming();
        let full = plan_backup(&n, Path::new("/tmp"), "www", None, 1_000).unwrap();
        assert_eq!(full.kind, BackupKind::Full);
        assert_eq!(full.remote_path, "s3://bucket/www_full_1000.tar.gz");
        assert_eq!(full.local_path, PathBuf::from("/tmp/www.tar.gz"));

        let diff = plan_backup(&n, Path::new("/tmp"), "www", Some(1_000), 2_000).unwrap();
        assert_eq!(diff.kind, BackupKind::Differential);
        assert_eq!(diff.anchor, Some(1_000));
        assert_eq!(diff.remote_path, "s3://bucket/www_full_1000_diff_2000.tar.gz");
    }

    #[test]
    fn run_backup_pushes_archive_under_rendered_name() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("src");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("a.txt"), "hello").unwrap();

        let config = Config {
            staging_dir: tmp.path().join("staging"),
            ..Config::default()
        };
        let store = MemoryStore::default();
        let request = BackupRequest {
            id: "site",
            source: &source,
            after: AfterPolicy::Unset,
            push: true,
            verbose: false,
        };

        let outcome = run_backup(&config, &naming(), &store, &request).unwrap();
        assert_eq!(outcome.plan.kind, BackupKind::Full);
        assert_eq!(outcome.stats.files, 1);
        assert!(outcome.plan.local_path.exists());
        assert!(store.contains(&outcome.plan.remote_path));

        let record = naming().parse(&outcome.plan.remote_path).unwrap();
        assert_eq!(record.id, "site");
        assert_eq!(record.kind, BackupKind::Full);
    }

    #[test]
    fn local_only_backup_uploads_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            staging_dir: tmp.path().join("staging"),
            ..Config::default()
        };
        let store = MemoryStore::default();
        let request = BackupRequest {
            id: "site",
            source: tmp.path(),
            after: AfterPolicy::Since(1),
            push: false,
            verbose: false,
        };

        let outcome = run_backup(&config, &naming(), &store, &request).unwrap();
        assert_eq!(outcome.plan.kind, BackupKind::Differential);
        assert!(!outcome.pushed);
        assert!(store.keys().is_empty());
    }

    #[test]
    fn failed_archive_is_never_uploaded() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("src");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("a.txt"), "hello").unwrap();

        let staging = tmp.path().join("staging");
        // The staged archive name is taken by a non-empty directory.
        std::fs::create_dir_all(staging.join("site.tar.gz/busy")).unwrap();

        let config = Config {
            staging_dir: staging.clone(),
            ..Config::default()
        };
        let store = MemoryStore::default();
        let request = BackupRequest {
            id: "site",
            source: &source,
            after: AfterPolicy::Unset,
            push: true,
            verbose: false,
        };

        assert!(run_backup(&config, &naming(), &store, &request).is_err());
        assert!(store.keys().is_empty());
        assert!(!staging.join("site.tar.gz.part").exists());
    }

    #[test]
    fn format_size_units() {
        assert_eq!(format_size(0), "0.0 B");
        assert_eq!(format_size(512), "512.0 B");
        assert_eq!(format_size(2048), "2.0 KiB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MiB");
        assert!(format_size(u64::MAX).ends_with(" PiB"));
    }
}
