//! Local caching module for offline data access.
//!
//! This module provides the `LocalStore` for persisting records across
//! restarts and the cache-aside helper built on top of it. Records live in
//! three namespaces:
//!
//! - Tiles: map tile images keyed by URL
//! - Text: text responses keyed by URL
//! - Files: parcel files keyed by filename, with secondary indexes by owner
//!   feature and by pending flags
//!
//! Nothing expires. Each online read overwrites the entry for its key.

pub mod error;
pub mod index;
pub mod manager;
pub mod read_through;

pub use error::{StoreError, StoreResult};
pub use index::FileIndex;
pub use manager::{LocalStore, Namespace, Record};
pub use read_through::{fetch_cached, CacheError, CacheMissError};
