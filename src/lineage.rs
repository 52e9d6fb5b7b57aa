//! # Lineage Selection
//!
//! Answers "what is the current restorable state of an identifier": the
//! newest full backup, plus the newest differential anchored to exactly that
//! full backup. Differentials anchored to older full backups belong to a
//! superseded lineage and are ignored.
//!
//! Everything here is a pure function of a [`Catalog`] snapshot. Two backups
//! with the same timestamp are indistinguishable; the one listed last wins.

use crate::catalog::Catalog;
use crate::error::{AbackupError, Result};
use crate::record::{BackupKind, BackupRecord, NO_BACKUP};

/// The newest full backup for `id`.
pub fn latest_full<'a>(catalog: &'a Catalog, id: &str) -> Option<&'a BackupRecord> {
    catalog
        .records(id)
        .iter()
        .filter(|r| r.kind == BackupKind::Full)
        .max_by_key(|r| r.full_ts)
}

/// Timestamp of the newest full backup, or [`NO_BACKUP`] when there is none.
pub fn latest_full_ts(catalog: &Catalog, id: &str) -> i64 {
    latest_full(catalog, id).map_or(NO_BACKUP, |r| r.full_ts)
}

/// The newest differential for `id` anchored at `anchor_full_ts`.
pub fn latest_differential<'a>(
    catalog: &'a Catalog,
    id: &str,
    anchor_full_ts: i64,
) -> Option<&'a BackupRecord> {
    catalog
        .records(id)
        .iter()
        .filter(|r| r.kind == BackupKind::Differential && r.full_ts == anchor_full_ts)
        .max_by_key(|r| r.diff_ts.unwrap_or(NO_BACKUP))
}

/// Archives to extract, in order, to reconstruct the latest state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreSet {
    pub full: BackupRecord,
    pub differential: Option<BackupRecord>,
}

impl RestoreSet {
    /// Full archive first, then the differential that overlays it.
    pub fn archives(&self) -> impl Iterator<Item = &BackupRecord> {
        std::iter::once(&self.full).chain(self.differential.as_ref())
    }

    pub fn len(&self) -> usize {
        1 + usize::from(self.differential.is_some())
    }
}

/// Selects the restore set for `id`, failing when no full backup exists.
pub fn restore_set(catalog: &Catalog, id: &str) -> Result<RestoreSet> {
    let full = latest_full(catalog, id).ok_or_else(|| AbackupError::NotFound(id.to_string()))?;
    let differential = latest_differential(catalog, id, full.full_ts).cloned();

    Ok(RestoreSet {
        full: full.clone(),
        differential,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::IdFilter;
    use crate::naming::NamingScheme;

    fn catalog(paths: &[&str]) -> Catalog {
        let naming = NamingScheme::new(
            "{id}_full_{full_ts}.tar.gz",
            "{id}_full_{full_ts}_diff_{diff_ts}.tar.gz",
        )
        .unwrap();
        Catalog::build(paths, &naming, &IdFilter::All)
    }

    #[test]
    fn newest_full_wins_regardless_of_listing_order() {
        let c = catalog(&["x_full_100.tar.gz", "x_full_300.tar.gz", "x_full_200.tar.gz"]);
        let full = latest_full(&c, "x").unwrap();
        assert_eq!(full.full_ts, 300);
        assert_eq!(full.remote_path, "x_full_300.tar.gz");
    }

    #[test]
    fn no_full_backup_reports_sentinel() {
        let c = catalog(&["x_full_100_diff_150.tar.gz", "y_full_100.tar.gz"]);
        assert!(latest_full(&c, "x").is_none());
        assert_eq!(latest_full_ts(&c, "x"), NO_BACKUP);
        assert_eq!(latest_full_ts(&c, "nobody"), -1);
    }

    #[test]
    fn differential_must_match_anchor() {
        let c = catalog(&[
            "x_full_100.tar.gz",
            "x_full_300.tar.gz",
            "x_full_300_diff_10.tar.gz",
            "x_full_100_diff_900.tar.gz",
            "x_full_300_diff_50.tar.gz",
        ]);
        let diff = latest_differential(&c, "x", 300).unwrap();
        assert_eq!(diff.diff_ts, Some(50));
        assert_eq!(diff.full_ts, 300);

        assert_eq!(latest_differential(&c, "x", 100).unwrap().diff_ts, Some(900));
        assert!(latest_differential(&c, "x", 200).is_none());
    }

    #[test]
    fn ties_resolve_to_last_listed() {
        let naming = NamingScheme::new(
            "{host}/{id}_full_{full_ts}.tgz",
            "{host}/{id}_diff_{full_ts}_{diff_ts}.tgz",
        )
        .unwrap();
        let c = Catalog::build(
            [
                "a/x_full_5.tgz",
                "b/x_full_5.tgz",
                "a/x_diff_5_9.tgz",
                "b/x_diff_5_9.tgz",
            ],
            &naming,
            &IdFilter::All,
        );
        assert_eq!(c.records("x").len(), 4);
        assert_eq!(latest_full(&c, "x").unwrap().remote_path, "b/x_full_5.tgz");
        assert_eq!(
            latest_differential(&c, "x", 5).unwrap().remote_path,
            "b/x_diff_5_9.tgz"
        );
    }

    #[test]
    fn restore_set_with_full_only() {
        let c = catalog(&["x_full_100.tar.gz", "x_full_300.tar.gz", "x_full_100_diff_150.tar.gz"]);
        let set = restore_set(&c, "x").unwrap();
        assert_eq!(set.full.full_ts, 300);
        assert!(set.differential.is_none());
        assert_eq!(set.len(), 1);
        assert_eq!(set.archives().count(), 1);
    }

    #[test]
    fn restore_set_orders_full_before_differential() {
        let c = catalog(&["x_full_300_diff_50.tar.gz", "x_full_300.tar.gz"]);
        let set = restore_set(&c, "x").unwrap();
        let order: Vec<_> = set.archives().map(|r| r.kind).collect();
        assert_eq!(order, [BackupKind::Full, BackupKind::Differential]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn restore_set_without_full_is_not_found() {
        let c = catalog(&["x_full_300_diff_50.tar.gz"]);
        let err = restore_set(&c, "x").unwrap_err();
        assert!(matches!(err, AbackupError::NotFound(ref id) if id == "x"));
    }
}
