use async_trait::async_trait;

use super::RemoteError;
use crate::models::RemoteFileMetadata;

/// The backend that stores file blobs and their metadata, keyed by filename
/// and owning feature.
#[async_trait]
pub trait RemoteFileService: Send + Sync {
    /// List file metadata, optionally restricted to one owning feature.
    async fn list_metadata(
        &self,
        owner_feature_id: Option<&str>,
    ) -> Result<Vec<RemoteFileMetadata>, RemoteError>;

    async fn get_blob(&self, filename: &str) -> Result<Vec<u8>, RemoteError>;

    async fn put_blob(&self, meta: &RemoteFileMetadata, blob: &[u8]) -> Result<(), RemoteError>;

    async fn delete_blob(&self, filename: &str) -> Result<(), RemoteError>;
}
