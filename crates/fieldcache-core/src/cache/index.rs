//! In-memory secondary indexes over the file namespace.
//!
//! The indexes are derived data: they are rebuilt from the record files when
//! the store opens and updated on every put/delete of a `FileRecord`.

use std::collections::{BTreeSet, HashMap};

/// A secondary index lookup on the file namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileIndex {
    Owner(String),
    UploadPending(bool),
    RemovalPending(bool),
}

/// The indexed fields of one file record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub owner_feature_id: String,
    pub upload_pending: bool,
    pub removal_pending: bool,
}

#[derive(Debug, Default)]
pub struct FileIndexes {
    entries: HashMap<String, IndexEntry>,
    by_owner: HashMap<String, BTreeSet<String>>,
    upload_pending: BTreeSet<String>,
    removal_pending: BTreeSet<String>,
}

impl FileIndexes {
    pub fn insert(&mut self, filename: &str, entry: IndexEntry) {
        self.remove(filename);

        self.by_owner
            .entry(entry.owner_feature_id.clone())
            .or_default()
            .insert(filename.to_string());
        if entry.upload_pending {
            self.upload_pending.insert(filename.to_string());
        }
        if entry.removal_pending {
            self.removal_pending.insert(filename.to_string());
        }
        self.entries.insert(filename.to_string(), entry);
    }

    pub fn remove(&mut self, filename: &str) {
        let Some(old) = self.entries.remove(filename) else {
            return;
        };

        if let Some(names) = self.by_owner.get_mut(&old.owner_feature_id) {
            names.remove(filename);
            if names.is_empty() {
                self.by_owner.remove(&old.owner_feature_id);
            }
        }
        self.upload_pending.remove(filename);
        self.removal_pending.remove(filename);
    }

    /// Filenames matching an index lookup, in no particular order.
    pub fn lookup(&self, index: &FileIndex) -> Vec<String> {
        match index {
            FileIndex::Owner(owner) => self
                .by_owner
                .get(owner)
                .map(|names| names.iter().cloned().collect())
                .unwrap_or_default(),
            FileIndex::UploadPending(true) => self.upload_pending.iter().cloned().collect(),
            FileIndex::RemovalPending(true) => self.removal_pending.iter().cloned().collect(),
            FileIndex::UploadPending(false) => self
                .entries
                .iter()
                .filter(|(_, e)| !e.upload_pending)
                .map(|(name, _)| name.clone())
                .collect(),
            FileIndex::RemovalPending(false) => self
                .entries
                .iter()
                .filter(|(_, e)| !e.removal_pending)
                .map(|(name, _)| name.clone())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
