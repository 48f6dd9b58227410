//! User-facing operations on parcel files.
//!
//! Every operation takes the session's connectivity mode into account.
//! Online, changes go to the remote service first and the local store mirrors
//! the result. Offline, changes are recorded locally with a pending flag and
//! the next sync pass pushes them.

use std::collections::{BTreeSet, HashSet};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{RemoteError, RemoteFileService};
use crate::cache::{FileIndex, LocalStore, StoreError};
use crate::connectivity::Connectivity;
use crate::models::{FileKind, FileRecord, RemoteFileMetadata};

#[derive(Error, Debug)]
pub enum FileError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type FileResult<T> = Result<T, FileError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Stored remotely and locally.
    Uploaded,
    /// Stored locally only; the next sync pass pushes it.
    Queued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Hidden locally; the next sync pass deletes it remotely.
    Queued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Synced,
    UploadPending,
}

impl SyncState {
    pub fn display_name(&self) -> &'static str {
        match self {
            SyncState::Synced => "synced",
            SyncState::UploadPending => "upload pending",
        }
    }
}

/// One row of a parcel's file listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileListing {
    pub meta: RemoteFileMetadata,
    pub state: SyncState,
}

impl From<&FileRecord> for FileListing {
    fn from(record: &FileRecord) -> Self {
        let state = if record.upload_pending {
            SyncState::UploadPending
        } else {
            SyncState::Synced
        };
        Self {
            meta: record.metadata(),
            state,
        }
    }
}

pub struct FileManager<'a, R: RemoteFileService + ?Sized> {
    store: &'a LocalStore,
    remote: &'a R,
    mode: Connectivity,
    username: Option<String>,
}

impl<'a, R: RemoteFileService + ?Sized> FileManager<'a, R> {
    pub fn new(store: &'a LocalStore, remote: &'a R, mode: Connectivity) -> Self {
        Self {
            store,
            remote,
            mode,
            username: None,
        }
    }

    /// The uploading user, always added to a new file's authorized users.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Attach a file to a parcel.
    ///
    /// A failed online upload is not an error: the record is kept with its
    /// upload flag set, exactly as if the session were offline.
    pub async fn upload(
        &self,
        owner_feature_id: &str,
        filename: &str,
        blob: Vec<u8>,
        shared_with: BTreeSet<String>,
    ) -> FileResult<UploadOutcome> {
        let mut authorized = shared_with;
        if let Some(ref username) = self.username {
            authorized.insert(username.clone());
        }
        let mut record = FileRecord::new_upload(owner_feature_id, filename, authorized, blob);

        if self.mode.is_online() {
            match self.remote.put_blob(&record.metadata(), &record.blob).await {
                Ok(()) => {
                    self.store.put(&record)?;
                    info!(filename, owner = owner_feature_id, "File uploaded");
                    return Ok(UploadOutcome::Uploaded);
                }
                Err(e) => {
                    warn!(filename, error = %e, "Upload failed, queued for next sync");
                }
            }
        }

        record.upload_pending = true;
        self.store.put(&record)?;
        debug!(filename, owner = owner_feature_id, "Upload queued");
        Ok(UploadOutcome::Queued)
    }

    /// Remove a file from its parcel.
    pub async fn delete(&self, filename: &str) -> FileResult<DeleteOutcome> {
        if self.mode.is_online() {
            match self.remote.delete_blob(filename).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(filename, "Already gone remotely");
                }
                Err(e) => return Err(e.into()),
            }
            self.store.delete::<FileRecord>(filename)?;
            info!(filename, "File deleted");
            return Ok(DeleteOutcome::Deleted);
        }

        let mut record: FileRecord = self
            .store
            .get(filename)?
            .filter(FileRecord::is_listed)
            .ok_or_else(|| FileError::NotFound(filename.to_string()))?;
        record.removal_pending = true;
        self.store.put(&record)?;
        debug!(filename, "Deletion queued");
        Ok(DeleteOutcome::Queued)
    }

    /// Fetch a file's contents.
    pub async fn download(&self, filename: &str) -> FileResult<Vec<u8>> {
        if self.mode.is_online() {
            return self.remote.get_blob(filename).await.map_err(|e| {
                if e.is_not_found() {
                    FileError::NotFound(filename.to_string())
                } else {
                    e.into()
                }
            });
        }

        self.store
            .get::<FileRecord>(filename)?
            .filter(FileRecord::is_listed)
            .map(|record| record.blob)
            .ok_or_else(|| FileError::NotFound(filename.to_string()))
    }

    /// Files attached to one parcel, sorted by filename.
    ///
    /// Online, the remote listing is authoritative; local uploads still
    /// waiting for sync are appended so they don't vanish from view.
    pub async fn list_for_feature(&self, owner_feature_id: &str) -> FileResult<Vec<FileListing>> {
        let local: Vec<FileRecord> = self
            .store
            .query_by_index(&FileIndex::Owner(owner_feature_id.to_string()))?
            .into_iter()
            .filter(FileRecord::is_listed)
            .collect();

        let mut listing: Vec<FileListing> = if self.mode.is_online() {
            let remote = self.remote.list_metadata(Some(owner_feature_id)).await?;
            let remote_names: HashSet<String> = remote.iter().map(|m| m.filename.clone()).collect();

            remote
                .into_iter()
                .map(|meta| FileListing {
                    meta,
                    state: SyncState::Synced,
                })
                .chain(
                    local
                        .iter()
                        .filter(|r| r.upload_pending && !remote_names.contains(&r.filename))
                        .map(FileListing::from),
                )
                .collect()
        } else {
            local.iter().map(FileListing::from).collect()
        };

        listing.sort_by(|a, b| a.meta.filename.cmp(&b.meta.filename));
        Ok(listing)
    }

    /// Locally stored files of one kind, sorted by filename.
    pub fn list_by_kind(&self, kind: FileKind) -> FileResult<Vec<FileRecord>> {
        let mut records: Vec<FileRecord> = self
            .store
            .all::<FileRecord>()?
            .into_iter()
            .filter(|r| r.is_listed() && r.kind() == kind)
            .collect();
        records.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(records)
    }
}
