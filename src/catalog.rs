//! # Backup Catalog
//!
//! Turns a raw remote listing into [`BackupRecord`]s grouped by identifier.
//! Listings routinely contain headers, directory markers and unrelated
//! objects; anything the naming scheme does not recognise is skipped.
//!
//! A catalog is built once per invocation and never modified afterwards.

use crate::error::Result;
use crate::naming::NamingScheme;
use crate::record::BackupRecord;
use crate::remote::RemoteStore;

/// Identifier value that selects every lineage.
pub const ALL: &str = "all";

/// Which lineages to keep while building a catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdFilter {
    All,
    Only(String),
}

impl IdFilter {
    /// `None` and `"all"` select everything.
    pub fn from_arg(arg: Option<&str>) -> Self {
        match arg {
            None | Some(ALL) => IdFilter::All,
            Some(id) => IdFilter::Only(id.to_string()),
        }
    }

    fn admits(&self, id: &str) -> bool {
        match self {
            IdFilter::All => true,
            IdFilter::Only(wanted) => wanted == id,
        }
    }
}

/// Records grouped by identifier, groups in first-seen order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Catalog {
    groups: Vec<(String, Vec<BackupRecord>)>,
}

impl Catalog {
    /// Builds a catalog from listing lines. The last whitespace-separated
    /// token of each line is treated as the remote path.
    pub fn build<I, S>(lines: I, naming: &NamingScheme, filter: &IdFilter) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut catalog = Self::default();

        for line in lines {
            let Some(path) = line.as_ref().split_whitespace().next_back() else {
                continue;
            };
            let Some(record) = naming.parse(path) else {
                continue;
            };
            if filter.admits(&record.id) {
                catalog.insert(record);
            }
        }

        catalog
    }

    /// Builds a catalog from the full text of a listing.
    pub fn from_listing(listing: &str, naming: &NamingScheme, filter: &IdFilter) -> Self {
        Self::build(listing.lines(), naming, filter)
    }

    fn insert(&mut self, record: BackupRecord) {
        match self.groups.iter_mut().find(|(id, _)| *id == record.id) {
            Some((_, records)) => records.push(record),
            None => self.groups.push((record.id.clone(), vec![record])),
        }
    }

    /// Records for one identifier, in listing order.
    pub fn records(&self, id: &str) -> &[BackupRecord] {
        self.groups
            .iter()
            .find(|(group, _)| group == id)
            .map(|(_, records)| records.as_slice())
            .unwrap_or(&[])
    }

    /// Every group, in the order identifiers first appeared.
    pub fn groups(&self) -> impl Iterator<Item = (&str, &[BackupRecord])> {
        self.groups
            .iter()
            .map(|(id, records)| (id.as_str(), records.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total number of records across all groups.
    pub fn len(&self) -> usize {
        self.groups.iter().map(|(_, records)| records.len()).sum()
    }
}

/// Lists the remote store and builds a catalog from the result.
pub fn fetch_catalog(
    store: &dyn RemoteStore,
    naming: &NamingScheme,
    filter: &IdFilter,
) -> Result<Catalog> {
    let listing = store.list(naming.listing_prefix())?;
    Ok(Catalog::from_listing(&listing, naming, filter))
}
