//! Remote file service interface and its WFS transport.
//!
//! The sync engine only sees the `RemoteFileService` trait. `WfsClient`
//! implements it against a GeoServer-style WFS files layer using HTTP basic
//! authentication, and also serves the connectivity probe and the
//! credentialed GETs behind the cache-aside readers.

pub mod client;
pub mod error;
pub mod remote;

pub use client::{Credentials, WfsClient};
pub use error::RemoteError;
pub use remote::RemoteFileService;
