//! Offline-first parcel file sync, caching and task grid rendering.
//!
//! The session starts with a connectivity probe. When online, one sync pass
//! reconciles local file records with the remote file service before any
//! listing is shown. Tile and text reads go through the cache-aside helper,
//! so they keep working offline with whatever was fetched last.

pub mod api;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod files;
pub mod grid;
pub mod models;
pub mod sync;
pub mod utils;

#[cfg(test)]
mod testing;

pub use api::{Credentials, RemoteError, RemoteFileService, WfsClient};
pub use cache::{fetch_cached, CacheError, CacheMissError, FileIndex, LocalStore, Namespace, StoreError};
pub use config::{Config, ServiceConfig};
pub use connectivity::{probe, Connectivity, ConnectivityError};
pub use files::{DeleteOutcome, FileError, FileListing, FileManager, SyncState, UploadOutcome};
pub use models::{FileKind, FileRecord, RemoteFileMetadata, TextEntry, TileEntry};
pub use sync::{SyncEngine, SyncError, SyncOperation, SyncReport};
