use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Mime type stored for GPS tracks.
pub const MIME_GPX: &str = "application/gpx+xml";

/// Mime type stored for ISOXML task data archives.
pub const MIME_ISOXML: &str = "application/isoxml";

/// Fallback mime type for anything we can't classify.
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";

/// Coarse classification of parcel files by what the app can do with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    GpsTrack,
    TaskData,
    Other,
}

impl FileKind {
    pub fn from_mime(mime_type: &str) -> Self {
        match mime_type {
            MIME_GPX => FileKind::GpsTrack,
            MIME_ISOXML => FileKind::TaskData,
            _ => FileKind::Other,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            FileKind::GpsTrack => MIME_GPX,
            FileKind::TaskData => MIME_ISOXML,
            FileKind::Other => MIME_OCTET_STREAM,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            FileKind::GpsTrack => "GPS track",
            FileKind::TaskData => "Task data",
            FileKind::Other => "File",
        }
    }

    /// Infer the kind from a filename extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Self {
        let lower = filename.to_lowercase();
        if lower.ends_with(".gpx") {
            FileKind::GpsTrack
        } else if lower.ends_with(".isoxml") {
            FileKind::TaskData
        } else {
            FileKind::Other
        }
    }
}

/// Parse a comma-separated list of user ids, dropping blanks.
pub fn parse_user_ids(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Join user ids back into the comma-separated wire form.
pub fn join_user_ids(ids: &BTreeSet<String>) -> String {
    ids.iter().cloned().collect::<Vec<_>>().join(",")
}

/// One row of the remote file listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileMetadata {
    pub filename: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub authorized_user_ids: BTreeSet<String>,
    pub owner_feature_id: String,
}

impl RemoteFileMetadata {
    pub fn kind(&self) -> FileKind {
        FileKind::from_mime(&self.mime_type)
    }

    /// Non-owners only receive empty permission data from the service.
    pub fn is_manageable(&self) -> bool {
        !self.authorized_user_ids.is_empty()
    }
}

/// A file attached to a parcel, as persisted in the local store.
///
/// Records are only ever replaced whole. `removal_pending` records stay on
/// disk until the remote deletion is confirmed but are hidden from listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub filename: String,
    pub owner_feature_id: String,
    pub mime_type: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub authorized_user_ids: BTreeSet<String>,
    #[serde(with = "super::blob")]
    pub blob: Vec<u8>,
    #[serde(default)]
    pub upload_pending: bool,
    #[serde(default)]
    pub removal_pending: bool,
}

impl FileRecord {
    /// Build a record for a locally uploaded file. The mime type is inferred
    /// from the filename and the size from the blob.
    pub fn new_upload(
        owner_feature_id: impl Into<String>,
        filename: impl Into<String>,
        authorized_user_ids: BTreeSet<String>,
        blob: Vec<u8>,
    ) -> Self {
        let filename = filename.into();
        let mime_type = FileKind::from_filename(&filename).mime_type().to_string();
        Self {
            owner_feature_id: owner_feature_id.into(),
            mime_type,
            size_bytes: blob.len() as u64,
            authorized_user_ids,
            blob,
            filename,
            upload_pending: false,
            removal_pending: false,
        }
    }

    /// Build a record for a file pulled from the remote service.
    pub fn from_remote(meta: &RemoteFileMetadata, blob: Vec<u8>) -> Self {
        Self {
            filename: meta.filename.clone(),
            owner_feature_id: meta.owner_feature_id.clone(),
            mime_type: meta.mime_type.clone(),
            size_bytes: meta.size_bytes,
            authorized_user_ids: meta.authorized_user_ids.clone(),
            blob,
            upload_pending: false,
            removal_pending: false,
        }
    }

    pub fn metadata(&self) -> RemoteFileMetadata {
        RemoteFileMetadata {
            filename: self.filename.clone(),
            size_bytes: self.size_bytes,
            mime_type: self.mime_type.clone(),
            authorized_user_ids: self.authorized_user_ids.clone(),
            owner_feature_id: self.owner_feature_id.clone(),
        }
    }

    pub fn kind(&self) -> FileKind {
        FileKind::from_mime(&self.mime_type)
    }

    pub fn has_pending_change(&self) -> bool {
        self.upload_pending || self.removal_pending
    }

    /// Whether the record may appear in a user-facing listing.
    pub fn is_listed(&self) -> bool {
        !self.removal_pending
    }
}
