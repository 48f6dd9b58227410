use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::error::{StoreError, StoreResult};
use super::index::{FileIndex, FileIndexes, IndexEntry};
use crate::models::{FileRecord, TextEntry, TileEntry};

/// Extension for record documents; temp files never carry it.
const RECORD_EXTENSION: &str = "json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Tiles,
    Text,
    Files,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [Namespace::Tiles, Namespace::Text, Namespace::Files];

    fn dir_name(&self) -> &'static str {
        match self {
            Namespace::Tiles => "tiles",
            Namespace::Text => "text",
            Namespace::Files => "files",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// A value stored in one namespace, keyed by one of its own fields.
pub trait Record: Serialize + DeserializeOwned {
    const NAMESPACE: Namespace;

    fn key(&self) -> &str;

    /// Secondary index fields, for namespaces that have them.
    fn index_entry(&self) -> Option<IndexEntry> {
        None
    }
}

impl Record for TileEntry {
    const NAMESPACE: Namespace = Namespace::Tiles;

    fn key(&self) -> &str {
        &self.url
    }
}

impl Record for TextEntry {
    const NAMESPACE: Namespace = Namespace::Text;

    fn key(&self) -> &str {
        &self.url
    }
}

impl Record for FileRecord {
    const NAMESPACE: Namespace = Namespace::Files;

    fn key(&self) -> &str {
        &self.filename
    }

    fn index_entry(&self) -> Option<IndexEntry> {
        Some(IndexEntry {
            owner_feature_id: self.owner_feature_id.clone(),
            upload_pending: self.upload_pending,
            removal_pending: self.removal_pending,
        })
    }
}

/// Durable key-value store with one directory per namespace and one JSON
/// document per record.
///
/// Every put/delete is atomic on its own (temp file + rename). There are no
/// cross-record transactions.
pub struct LocalStore {
    root: PathBuf,
    file_index: RwLock<FileIndexes>,
}

impl LocalStore {
    /// Open (or create) a store rooted at `root` and rebuild the file indexes.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        for ns in Namespace::ALL {
            let dir = root.join(ns.dir_name());
            std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        }

        let store = Self {
            root,
            file_index: RwLock::new(FileIndexes::default()),
        };
        store.rebuild_file_index()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, ns: Namespace) -> PathBuf {
        self.root.join(ns.dir_name())
    }

    /// Keys may be arbitrary URLs, so the file name is a digest of the key.
    fn record_path(&self, ns: Namespace, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.namespace_dir(ns)
            .join(format!("{}.{}", hex::encode(digest), RECORD_EXTENSION))
    }

    fn read_index(&self) -> RwLockReadGuard<'_, FileIndexes> {
        self.file_index.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, FileIndexes> {
        self.file_index.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read_record<R: Record>(path: &Path) -> StoreResult<Option<R>> {
        let contents = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        };
        let record = serde_json::from_slice(&contents).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(record))
    }

    fn record_paths(&self, ns: Namespace) -> StoreResult<Vec<PathBuf>> {
        let dir = self.namespace_dir(ns);
        let entries = std::fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StoreError::io(&dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    fn rebuild_file_index(&self) -> StoreResult<()> {
        let records: Vec<FileRecord> = self.all()?;
        let mut index = self.write_index();
        *index = FileIndexes::default();
        for record in &records {
            if let Some(entry) = record.index_entry() {
                index.insert(record.key(), entry);
            }
        }
        debug!(files = index.len(), "File index rebuilt");
        Ok(())
    }

    /// Read a record. An absent key is `Ok(None)`, never an error.
    pub fn get<R: Record>(&self, key: &str) -> StoreResult<Option<R>> {
        Self::read_record(&self.record_path(R::NAMESPACE, key))
    }

    /// Store a record under its own key, replacing any previous record whole.
    pub fn put<R: Record>(&self, record: &R) -> StoreResult<()> {
        let ns = R::NAMESPACE;
        let key = record.key();
        let path = self.record_path(ns, key);
        let dir = self.namespace_dir(ns);

        let contents = serde_json::to_vec(record).map_err(|source| StoreError::Encode {
            namespace: ns,
            key: key.to_string(),
            source,
        })?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| StoreError::io(&dir, e))?;
        tmp.write_all(&contents)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| StoreError::io(&path, e.error))?;

        if let Some(entry) = record.index_entry() {
            self.write_index().insert(key, entry);
        }

        debug!(namespace = %ns, key, bytes = contents.len(), "Record stored");
        Ok(())
    }

    /// Remove a record. Removing an absent key succeeds.
    pub fn delete<R: Record>(&self, key: &str) -> StoreResult<()> {
        let ns = R::NAMESPACE;
        let path = self.record_path(ns, key);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(&path, e)),
        }

        if ns == Namespace::Files {
            self.write_index().remove(key);
        }

        debug!(namespace = %ns, key, "Record deleted");
        Ok(())
    }

    /// Every readable record of a namespace. Corrupt documents are skipped.
    pub fn all<R: Record>(&self) -> StoreResult<Vec<R>> {
        let mut records = Vec::new();
        for path in self.record_paths(R::NAMESPACE)? {
            match Self::read_record::<R>(&path) {
                Ok(Some(record)) => records.push(record),
                // Deleted between listing and reading
                Ok(None) => {}
                Err(StoreError::Corrupt { path, source }) => {
                    warn!(path = %path.display(), error = %source, "Skipping corrupt record");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }

    /// Number of records in a namespace.
    pub fn count(&self, ns: Namespace) -> StoreResult<usize> {
        if ns == Namespace::Files {
            return Ok(self.read_index().len());
        }
        Ok(self.record_paths(ns)?.len())
    }

    /// Query the file namespace through a secondary index. Unordered.
    pub fn query_by_index(&self, index: &FileIndex) -> StoreResult<Vec<FileRecord>> {
        let names = self.read_index().lookup(index);
        let mut records = Vec::with_capacity(names.len());
        for name in names {
            if let Some(record) = self.get::<FileRecord>(&name)? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    fn file(name: &str, owner: &str) -> FileRecord {
        FileRecord::new_upload(owner, name, BTreeSet::new(), name.as_bytes().to_vec())
    }

    #[test]
    fn test_get_absent_returns_none() {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();

        assert!(store.get::<TextEntry>("https://example.org/a").unwrap().is_none());
        assert!(store.get::<FileRecord>("missing.gpx").unwrap().is_none());
    }

    #[test]
    fn test_put_replaces_whole_record() {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();

        store.put(&TextEntry::new("https://example.org/a", "first")).unwrap();
        store.put(&TextEntry::new("https://example.org/a", "second")).unwrap();

        let got: TextEntry = store.get("https://example.org/a").unwrap().unwrap();
        assert_eq!(got.data, "second");
        assert_eq!(store.count(Namespace::Text).unwrap(), 1);
    }

    #[test]
    fn test_namespaces_are_separate() {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        let url = "https://tiles.example.org/1/2/3.png";

        store.put(&TileEntry::new(url, vec![1, 2, 3])).unwrap();

        assert!(store.get::<TextEntry>(url).unwrap().is_none());
        assert_eq!(store.get::<TileEntry>(url).unwrap().unwrap().data, vec![1, 2, 3]);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();

        store.put(&file("a.gpx", "1")).unwrap();
        store.delete::<FileRecord>("a.gpx").unwrap();
        store.delete::<FileRecord>("a.gpx").unwrap();

        assert!(store.get::<FileRecord>("a.gpx").unwrap().is_none());
        assert!(store.query_by_index(&FileIndex::Owner("1".into())).unwrap().is_empty());
    }

    #[test]
    fn test_index_follows_flag_transitions() {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();

        let mut record = file("a.gpx", "1");
        record.upload_pending = true;
        store.put(&record).unwrap();
        assert_eq!(store.query_by_index(&FileIndex::UploadPending(true)).unwrap().len(), 1);

        record.upload_pending = false;
        store.put(&record).unwrap();
        assert!(store.query_by_index(&FileIndex::UploadPending(true)).unwrap().is_empty());
        assert_eq!(store.query_by_index(&FileIndex::UploadPending(false)).unwrap().len(), 1);
    }

    #[test]
    fn test_records_and_index_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = LocalStore::open(dir.path()).unwrap();
            store.put(&file("a.gpx", "1")).unwrap();
            store.put(&file("b.isoxml", "1")).unwrap();
            let mut removed = file("c.gpx", "2");
            removed.removal_pending = true;
            store.put(&removed).unwrap();
        }

        let store = LocalStore::open(dir.path()).unwrap();
        assert_eq!(store.count(Namespace::Files).unwrap(), 3);
        assert_eq!(store.query_by_index(&FileIndex::Owner("1".into())).unwrap().len(), 2);

        let removals = store.query_by_index(&FileIndex::RemovalPending(true)).unwrap();
        assert_eq!(removals.len(), 1);
        assert_eq!(removals[0].filename, "c.gpx");
        assert_eq!(removals[0].blob, b"c.gpx".to_vec());
    }

    #[test]
    fn test_corrupt_record_is_skipped_on_open() {
        let dir = tempdir().unwrap();
        {
            let store = LocalStore::open(dir.path()).unwrap();
            store.put(&file("a.gpx", "1")).unwrap();
        }
        std::fs::write(dir.path().join("files").join("garbage.json"), b"{not json").unwrap();

        let store = LocalStore::open(dir.path()).unwrap();
        assert_eq!(store.all::<FileRecord>().unwrap().len(), 1);
        assert_eq!(store.count(Namespace::Files).unwrap(), 1);
    }

    #[test]
    fn test_get_of_unparseable_record_is_corrupt() {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        let key = "https://example.org/wfs?request=GetFeature";
        let path = store.record_path(Namespace::Text, key);
        std::fs::write(&path, b"{not json").unwrap();

        match store.get::<TextEntry>(key) {
            Err(StoreError::Corrupt { path: bad, .. }) => assert_eq!(bad, path),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_url_keys_with_path_characters() {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        let url = "https://example.org/wfs?typeNames=ns:files&cql_filter=a/../b";

        store.put(&TextEntry::new(url, "body")).unwrap();
        assert_eq!(store.get::<TextEntry>(url).unwrap().unwrap().data, "body");
        assert_eq!(store.all::<TextEntry>().unwrap().len(), 1);
    }
}
