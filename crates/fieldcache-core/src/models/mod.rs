//! Data models for parcel files and cached responses.
//!
//! This module contains the records persisted by the local store:
//!
//! - `FileRecord`: a file attached to a parcel, with its sync flags
//! - `RemoteFileMetadata`: one row of the remote file listing
//! - `TileEntry`, `TextEntry`: cache-aside entries keyed by URL
//! - `FileKind`: classification of attached files by mime type

pub mod cache_entry;
pub mod file;

pub(crate) mod blob;

pub use cache_entry::{TextEntry, TileEntry};
pub use file::{FileKind, FileRecord, RemoteFileMetadata};
