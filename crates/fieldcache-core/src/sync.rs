//! Reconciliation of local file records with the remote file service.
//!
//! One pass runs at startup, online only, before anything lists files:
//!
//! 1. push uploads (`upload_pending`)
//! 2. push deletions (`removal_pending`)
//! 3. re-list remote and local state
//! 4. pull files present remotely but missing locally
//! 5. prune clean local files missing remotely (deleted by another client)
//!
//! Presence is the only conflict signal. A failed remote operation leaves the
//! affected record untouched so the next pass retries it. Passes must not
//! overlap each other or local edits; the caller serializes them.

use std::collections::{HashMap, HashSet};
use std::fmt;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{RemoteError, RemoteFileService};
use crate::cache::{FileIndex, LocalStore, StoreResult};
use crate::connectivity::Connectivity;
use crate::models::{FileRecord, RemoteFileMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOperation {
    Upload,
    Delete,
    List,
    Download,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncOperation::Upload => "upload",
            SyncOperation::Delete => "delete",
            SyncOperation::List => "listing",
            SyncOperation::Download => "download",
        })
    }
}

/// Non-fatal failure of one remote operation during a pass.
#[derive(Error, Debug)]
#[error("{operation} of {} failed: {source}", .filename.as_deref().unwrap_or("remote files"))]
pub struct SyncError {
    pub operation: SyncOperation,
    pub filename: Option<String>,
    #[source]
    pub source: RemoteError,
}

impl SyncError {
    fn for_file(operation: SyncOperation, filename: &str, source: RemoteError) -> Self {
        Self {
            operation,
            filename: Some(filename.to_string()),
            source,
        }
    }
}

#[derive(Debug, Default)]
pub struct SyncReport {
    /// True when the pass did not run because the session is offline.
    pub skipped: bool,
    pub uploaded: Vec<String>,
    pub deleted: Vec<String>,
    pub pulled: Vec<String>,
    pub pruned: Vec<String>,
    pub errors: Vec<SyncError>,
}

impl SyncReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    /// Whether the pass changed any local record.
    pub fn changed_anything(&self) -> bool {
        !(self.uploaded.is_empty()
            && self.deleted.is_empty()
            && self.pulled.is_empty()
            && self.pruned.is_empty())
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn summary(&self) -> String {
        if self.skipped {
            return "skipped (offline)".to_string();
        }
        format!(
            "{} uploaded, {} deleted, {} pulled, {} pruned, {} failed",
            self.uploaded.len(),
            self.deleted.len(),
            self.pulled.len(),
            self.pruned.len(),
            self.errors.len()
        )
    }
}

pub struct SyncEngine<'a, R: RemoteFileService + ?Sized> {
    store: &'a LocalStore,
    remote: &'a R,
}

impl<'a, R: RemoteFileService + ?Sized> SyncEngine<'a, R> {
    pub fn new(store: &'a LocalStore, remote: &'a R) -> Self {
        Self { store, remote }
    }

    /// Run one full pass. Remote failures are collected in the report; only
    /// local store failures abort the pass.
    pub async fn run(&self, mode: Connectivity) -> StoreResult<SyncReport> {
        if !mode.is_online() {
            debug!("Offline, skipping file sync");
            return Ok(SyncReport::skipped());
        }

        info!("Starting file sync");
        let mut report = SyncReport::default();

        self.push_uploads(&mut report).await?;
        self.push_deletions(&mut report).await?;

        // Only list after pushing, or fresh uploads would look deleted remotely
        let remote = match self.remote.list_metadata(None).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(error = %e, "Remote listing failed, not pulling or pruning");
                report.errors.push(SyncError {
                    operation: SyncOperation::List,
                    filename: None,
                    source: e,
                });
                return Ok(report);
            }
        };
        let local: Vec<FileRecord> = self.store.all()?;

        self.pull_missing(&remote, &local, &mut report).await?;
        self.prune_missing(&remote, &local, &mut report)?;

        info!(summary = %report.summary(), "File sync finished");
        Ok(report)
    }

    fn pending(&self, index: FileIndex) -> StoreResult<Vec<FileRecord>> {
        let mut records = self.store.query_by_index(&index)?;
        records.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(records)
    }

    async fn push_uploads(&self, report: &mut SyncReport) -> StoreResult<()> {
        for record in self.pending(FileIndex::UploadPending(true))? {
            if record.removal_pending {
                // Deleted before it was ever uploaded; step 2 erases it
                debug!(filename = %record.filename, "Skipping upload of removed file");
                continue;
            }

            match self.remote.put_blob(&record.metadata(), &record.blob).await {
                Ok(()) => {
                    let filename = record.filename.clone();
                    let mut uploaded = record;
                    uploaded.upload_pending = false;
                    self.store.put(&uploaded)?;
                    debug!(filename = %filename, "Pending upload pushed");
                    report.uploaded.push(filename);
                }
                Err(e) => {
                    warn!(filename = %record.filename, error = %e, "Upload failed, will retry next sync");
                    report
                        .errors
                        .push(SyncError::for_file(SyncOperation::Upload, &record.filename, e));
                }
            }
        }
        Ok(())
    }

    async fn push_deletions(&self, report: &mut SyncReport) -> StoreResult<()> {
        for record in self.pending(FileIndex::RemovalPending(true))? {
            match self.remote.delete_blob(&record.filename).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(filename = %record.filename, "Already gone remotely");
                }
                Err(e) => {
                    warn!(filename = %record.filename, error = %e, "Delete failed, will retry next sync");
                    report
                        .errors
                        .push(SyncError::for_file(SyncOperation::Delete, &record.filename, e));
                    continue;
                }
            }

            self.store.delete::<FileRecord>(&record.filename)?;
            debug!(filename = %record.filename, "Pending deletion pushed");
            report.deleted.push(record.filename);
        }
        Ok(())
    }

    async fn pull_missing(
        &self,
        remote: &[RemoteFileMetadata],
        local: &[FileRecord],
        report: &mut SyncReport,
    ) -> StoreResult<()> {
        let local_names: HashSet<&str> = local.iter().map(|r| r.filename.as_str()).collect();

        let mut missing: HashMap<&str, &RemoteFileMetadata> = HashMap::new();
        for meta in remote {
            if !local_names.contains(meta.filename.as_str()) {
                missing.insert(meta.filename.as_str(), meta);
            }
        }
        let mut missing: Vec<&RemoteFileMetadata> = missing.into_values().collect();
        missing.sort_by(|a, b| a.filename.cmp(&b.filename));

        for meta in missing {
            match self.remote.get_blob(&meta.filename).await {
                Ok(blob) => {
                    self.store.put(&FileRecord::from_remote(meta, blob))?;
                    debug!(filename = %meta.filename, "Pulled remote file");
                    report.pulled.push(meta.filename.clone());
                }
                Err(e) => {
                    // Nothing is stored, so the next pass sees it missing again
                    warn!(filename = %meta.filename, error = %e, "Download failed, will retry next sync");
                    report
                        .errors
                        .push(SyncError::for_file(SyncOperation::Download, &meta.filename, e));
                }
            }
        }
        Ok(())
    }

    fn prune_missing(
        &self,
        remote: &[RemoteFileMetadata],
        local: &[FileRecord],
        report: &mut SyncReport,
    ) -> StoreResult<()> {
        let remote_names: HashSet<&str> = remote.iter().map(|m| m.filename.as_str()).collect();

        let mut stale: Vec<&FileRecord> = local
            .iter()
            .filter(|r| !remote_names.contains(r.filename.as_str()))
            .collect();
        stale.sort_by(|a, b| a.filename.cmp(&b.filename));

        for record in stale {
            if record.has_pending_change() {
                debug!(filename = %record.filename, "Keeping pending file missing remotely");
                continue;
            }
            self.store.delete::<FileRecord>(&record.filename)?;
            debug!(filename = %record.filename, "Pruned file deleted by another client");
            report.pruned.push(record.filename.clone());
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRemote;
    use std::collections::BTreeSet;
    use tempfile::{tempdir, TempDir};

    fn open_store() -> (TempDir, LocalStore) {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn local(name: &str, upload_pending: bool, removal_pending: bool) -> FileRecord {
        let mut record = FileRecord::new_upload(
            "17",
            name,
            BTreeSet::from(["owner".to_string()]),
            format!("local {name}").into_bytes(),
        );
        record.upload_pending = upload_pending;
        record.removal_pending = removal_pending;
        record
    }

    fn snapshot(store: &LocalStore) -> Vec<FileRecord> {
        let mut records: Vec<FileRecord> = store.all().unwrap();
        records.sort_by(|a, b| a.filename.cmp(&b.filename));
        records
    }

    fn clean_names(store: &LocalStore) -> Vec<String> {
        snapshot(store)
            .into_iter()
            .filter(|r| !r.has_pending_change())
            .map(|r| r.filename)
            .collect()
    }

    #[tokio::test]
    async fn test_offline_pass_is_skipped() {
        let (_dir, store) = open_store();
        store.put(&local("a.gpx", true, false)).unwrap();
        let remote = FakeRemote::new();

        let report = SyncEngine::new(&store, &remote)
            .run(Connectivity::Offline)
            .await
            .unwrap();

        assert!(report.skipped);
        assert!(remote.calls().is_empty());
        assert!(snapshot(&store)[0].upload_pending);
    }

    #[tokio::test]
    async fn test_pending_upload_is_pushed_and_not_pruned() {
        let (_dir, store) = open_store();
        store.put(&local("a.gpx", true, false)).unwrap();
        let remote = FakeRemote::new();

        let report = SyncEngine::new(&store, &remote)
            .run(Connectivity::Online)
            .await
            .unwrap();

        assert_eq!(report.uploaded, vec!["a.gpx"]);
        assert!(report.pruned.is_empty());
        assert_eq!(remote.blob("a.gpx").unwrap(), b"local a.gpx".to_vec());

        let stored: FileRecord = store.get("a.gpx").unwrap().unwrap();
        assert!(!stored.upload_pending);
        assert!(store
            .query_by_index(&FileIndex::UploadPending(true))
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_record_unchanged() {
        let (_dir, store) = open_store();
        let record = local("a.gpx", true, false);
        store.put(&record).unwrap();
        let before = serde_json::to_vec(&record).unwrap();

        let remote = FakeRemote::new();
        remote.fail_put("a.gpx");

        let report = SyncEngine::new(&store, &remote)
            .run(Connectivity::Online)
            .await
            .unwrap();

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].operation, SyncOperation::Upload);
        assert_eq!(report.errors[0].filename.as_deref(), Some("a.gpx"));
        assert!(report.pruned.is_empty());

        let after: FileRecord = store.get("a.gpx").unwrap().unwrap();
        assert_eq!(after, record);
        assert_eq!(serde_json::to_vec(&after).unwrap(), before);
    }

    #[tokio::test]
    async fn test_failed_upload_is_retried_next_pass() {
        let (_dir, store) = open_store();
        store.put(&local("a.gpx", true, false)).unwrap();
        let remote = FakeRemote::new();
        remote.fail_put("a.gpx");

        let engine = SyncEngine::new(&store, &remote);
        engine.run(Connectivity::Online).await.unwrap();
        remote.heal();
        let report = engine.run(Connectivity::Online).await.unwrap();

        assert_eq!(report.uploaded, vec!["a.gpx"]);
        assert!(remote.has("a.gpx"));
        assert!(!store.get::<FileRecord>("a.gpx").unwrap().unwrap().upload_pending);
    }

    #[tokio::test]
    async fn test_pending_removal_is_pushed() {
        let (_dir, store) = open_store();
        store.put(&local("a.gpx", false, true)).unwrap();
        let remote = FakeRemote::new();
        remote.add("a.gpx", "17", b"remote");

        let report = SyncEngine::new(&store, &remote)
            .run(Connectivity::Online)
            .await
            .unwrap();

        assert_eq!(report.deleted, vec!["a.gpx"]);
        assert!(!remote.has("a.gpx"));
        assert!(store.get::<FileRecord>("a.gpx").unwrap().is_none());
        // Not pulled back down after the deletion
        assert!(report.pulled.is_empty());
    }

    #[tokio::test]
    async fn test_failed_removal_keeps_flag() {
        let (_dir, store) = open_store();
        let record = local("a.gpx", false, true);
        store.put(&record).unwrap();
        let remote = FakeRemote::new();
        remote.add("a.gpx", "17", b"remote");
        remote.fail_delete("a.gpx");

        let report = SyncEngine::new(&store, &remote)
            .run(Connectivity::Online)
            .await
            .unwrap();

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].operation, SyncOperation::Delete);
        assert_eq!(store.get::<FileRecord>("a.gpx").unwrap().unwrap(), record);
        assert!(remote.has("a.gpx"));
    }

    #[tokio::test]
    async fn test_removal_of_remotely_missing_file_is_confirmed() {
        let (_dir, store) = open_store();
        store.put(&local("a.gpx", false, true)).unwrap();
        let remote = FakeRemote::new();

        let report = SyncEngine::new(&store, &remote)
            .run(Connectivity::Online)
            .await
            .unwrap();

        assert!(report.is_clean());
        assert_eq!(report.deleted, vec!["a.gpx"]);
        assert!(store.get::<FileRecord>("a.gpx").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upload_then_removal_offline_only_deletes() {
        let (_dir, store) = open_store();
        store.put(&local("a.gpx", true, true)).unwrap();
        let remote = FakeRemote::new();

        let report = SyncEngine::new(&store, &remote)
            .run(Connectivity::Online)
            .await
            .unwrap();

        assert!(report.uploaded.is_empty());
        assert_eq!(report.deleted, vec!["a.gpx"]);
        assert!(!remote.mutations().iter().any(|c| c.starts_with("put:")));
        assert!(store.get::<FileRecord>("a.gpx").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pulls_missing_and_prunes_stale() {
        let (_dir, store) = open_store();
        store.put(&local("gone.gpx", false, false)).unwrap();
        store.put(&local("kept.gpx", false, false)).unwrap();
        let remote = FakeRemote::new();
        remote.add("kept.gpx", "17", b"remote kept");
        remote.add("new.isoxml", "18", b"remote new");

        let report = SyncEngine::new(&store, &remote)
            .run(Connectivity::Online)
            .await
            .unwrap();

        assert_eq!(report.pulled, vec!["new.isoxml"]);
        assert_eq!(report.pruned, vec!["gone.gpx"]);

        let pulled: FileRecord = store.get("new.isoxml").unwrap().unwrap();
        assert_eq!(pulled.blob, b"remote new".to_vec());
        assert_eq!(pulled.owner_feature_id, "18");
        assert!(!pulled.upload_pending && !pulled.removal_pending);

        // Presence is the only signal: the local copy of kept.gpx is not replaced
        let kept: FileRecord = store.get("kept.gpx").unwrap().unwrap();
        assert_eq!(kept.blob, b"local kept.gpx".to_vec());
    }

    #[tokio::test]
    async fn test_second_pass_changes_nothing() {
        let (_dir, store) = open_store();
        store.put(&local("up.gpx", true, false)).unwrap();
        store.put(&local("del.gpx", false, true)).unwrap();
        store.put(&local("stale.gpx", false, false)).unwrap();
        let remote = FakeRemote::new();
        remote.add("del.gpx", "17", b"x");
        remote.add("other.gpx", "19", b"y");

        let engine = SyncEngine::new(&store, &remote);
        let first = engine.run(Connectivity::Online).await.unwrap();
        assert!(first.changed_anything());

        let after_first = snapshot(&store);
        let mutations_after_first = remote.mutations();

        let second = engine.run(Connectivity::Online).await.unwrap();
        assert!(!second.changed_anything());
        assert!(second.is_clean());
        assert_eq!(snapshot(&store), after_first);
        assert_eq!(remote.mutations(), mutations_after_first);
    }

    #[tokio::test]
    async fn test_clean_local_names_converge_to_remote() {
        let (_dir, store) = open_store();
        store.put(&local("a.gpx", false, false)).unwrap();
        store.put(&local("b.gpx", true, false)).unwrap();
        store.put(&local("c.gpx", false, true)).unwrap();
        store.put(&local("d.gpx", false, false)).unwrap();
        let remote = FakeRemote::new();
        remote.add("c.gpx", "17", b"c");
        remote.add("d.gpx", "17", b"d");
        remote.add("e.gpx", "20", b"e");

        let report = SyncEngine::new(&store, &remote)
            .run(Connectivity::Online)
            .await
            .unwrap();
        assert!(report.is_clean());

        assert_eq!(clean_names(&store), remote.filenames());
        assert_eq!(remote.filenames(), vec!["b.gpx", "d.gpx", "e.gpx"]);
    }

    #[tokio::test]
    async fn test_listing_failure_skips_pull_and_prune() {
        let (_dir, store) = open_store();
        store.put(&local("up.gpx", true, false)).unwrap();
        store.put(&local("stale.gpx", false, false)).unwrap();
        let remote = FakeRemote::new();
        remote.fail_list(true);

        let report = SyncEngine::new(&store, &remote)
            .run(Connectivity::Online)
            .await
            .unwrap();

        assert_eq!(report.uploaded, vec!["up.gpx"]);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].operation, SyncOperation::List);
        assert!(report.errors[0].to_string().contains("remote files"));
        assert!(store.get::<FileRecord>("stale.gpx").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_download_is_retried_next_pass() {
        let (_dir, store) = open_store();
        let remote = FakeRemote::new();
        remote.add("a.gpx", "17", b"remote");
        remote.fail_get("a.gpx");

        let engine = SyncEngine::new(&store, &remote);
        let first = engine.run(Connectivity::Online).await.unwrap();
        assert_eq!(first.errors[0].operation, SyncOperation::Download);
        assert!(store.get::<FileRecord>("a.gpx").unwrap().is_none());

        remote.heal();
        let second = engine.run(Connectivity::Online).await.unwrap();
        assert_eq!(second.pulled, vec!["a.gpx"]);
        assert_eq!(store.get::<FileRecord>("a.gpx").unwrap().unwrap().blob, b"remote".to_vec());
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let (_dir, store) = open_store();
        store.put(&local("up.gpx", true, false)).unwrap();
        store.put(&local("del.gpx", false, true)).unwrap();
        let remote = FakeRemote::new();
        remote.add("del.gpx", "17", b"x");
        remote.add("new.gpx", "17", b"y");

        SyncEngine::new(&store, &remote)
            .run(Connectivity::Online)
            .await
            .unwrap();

        assert_eq!(
            remote.calls(),
            vec!["put:up.gpx", "delete:del.gpx", "list", "get:new.gpx"]
        );
    }
}
