//! # Backup Records
//!
//! A [`BackupRecord`] is what a single remote path decodes to: which lineage it
//! belongs to, whether it is a full or a differential archive, and the
//! timestamps that order it within that lineage.

use chrono::{Local, TimeZone};
use serde::Serialize;
use std::fmt;

/// Timestamp reported when an identifier has no full backup.
pub const NO_BACKUP: i64 = -1;

/// Whether an archive holds every file or only files changed since its anchor.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Full,
    Differential,
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupKind::Full => write!(f, "full"),
            BackupKind::Differential => write!(f, "diff"),
        }
    }
}

/// One successfully parsed entry of a remote listing.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    /// Lineage identifier.
    pub id: String,

    pub kind: BackupKind,

    /// Creation time of the full backup this record belongs to. For a full
    /// record this is its own creation time; for a differential it is the
    /// anchor.
    pub full_ts: i64,

    /// Creation time of a differential. Always `None` for full records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_ts: Option<i64>,

    /// The exact string this record was parsed from, used to fetch it later.
    pub remote_path: String,
}

impl BackupRecord {
    /// When this particular archive was taken.
    pub fn created_at(&self) -> i64 {
        self.diff_ts.unwrap_or(self.full_ts)
    }

    /// Last path segment of the remote path, used to name the staging copy.
    pub fn file_name(&self) -> &str {
        self.remote_path
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.remote_path)
    }

    /// Creation time rendered in the local timezone for listings.
    pub fn created_display(&self) -> String {
        format_timestamp(self.created_at())
    }
}

/// Formats a unix timestamp as `YYYY-MM-DD HH:MM:SS` local time.
pub fn format_timestamp(ts: i64) -> String {
    match Local.timestamp_opt(ts, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => ts.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff_record() -> BackupRecord {
        BackupRecord {
            id: "www".to_string(),
            kind: BackupKind::Differential,
            full_ts: 100,
            diff_ts: Some(250),
            remote_path: "s3://bucket/www_full_100_diff_250.tar.gz".to_string(),
        }
    }

    #[test]
    fn differential_created_at_uses_diff_ts() {
        assert_eq!(diff_record().created_at(), 250);
    }

    #[test]
    fn file_name_is_last_segment() {
        assert_eq!(diff_record().file_name(), "www_full_100_diff_250.tar.gz");
    }

    #[test]
    fn kind_display_matches_listing_labels() {
        assert_eq!(BackupKind::Full.to_string(), "full");
        assert_eq!(BackupKind::Differential.to_string(), "diff");
    }

    #[test]
    fn json_omits_missing_diff_ts() {
        let record = BackupRecord {
            kind: BackupKind::Full,
            diff_ts: None,
            ..diff_record()
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "full");
        assert!(json.get("diff_ts").is_none());
    }
}
