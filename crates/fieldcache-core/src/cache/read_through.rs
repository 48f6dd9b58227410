//! Cache-aside reads: refresh on every online read, serve the last fetched
//! value while offline.
//!
//! There is no freshness bound. Two concurrent online reads of the same key
//! may both fetch and both write; the writes are whole-record overwrites, so
//! the last one wins and the entry is never corrupted.

use std::future::Future;

use thiserror::Error;
use tracing::{debug, warn};

use super::{LocalStore, Namespace, Record, StoreError};
use crate::api::RemoteError;
use crate::connectivity::Connectivity;

/// Offline read of a key that was never fetched while online.
#[derive(Error, Debug)]
#[error("No cached {namespace} entry for {key}")]
pub struct CacheMissError {
    pub namespace: Namespace,
    pub key: String,
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error(transparent)]
    Miss(#[from] CacheMissError),

    #[error("Online fetch failed: {0}")]
    Fetch(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Read `key` through the cache.
///
/// Online, `fetch` is always invoked and its result overwrites the cached
/// entry before being returned. Offline, the cached entry is returned or a
/// `CacheMissError` if there is none.
pub async fn fetch_cached<R, F, Fut>(
    store: &LocalStore,
    mode: Connectivity,
    key: &str,
    fetch: F,
) -> Result<R, CacheError>
where
    R: Record,
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<R, RemoteError>>,
{
    match mode {
        Connectivity::Online => {
            let record = fetch(key.to_string()).await?;
            if let Err(e) = store.put(&record) {
                // The caller still gets the fresh value
                warn!(namespace = %R::NAMESPACE, key, error = %e, "Failed to write cache entry");
            }
            Ok(record)
        }
        Connectivity::Offline => match store.get::<R>(key)? {
            Some(record) => {
                debug!(namespace = %R::NAMESPACE, key, "Serving cached entry offline");
                Ok(record)
            }
            None => Err(CacheMissError {
                namespace: R::NAMESPACE,
                key: key.to_string(),
            }
            .into()),
        },
    }
}
