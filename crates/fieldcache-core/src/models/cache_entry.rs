//! Cache-aside entries for map tiles and text responses.
//!
//! Entries are keyed by the URL they were fetched from and overwritten on
//! every online read. `fetched_at` is informational only; nothing expires.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::age_display;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileEntry {
    pub url: String,
    #[serde(with = "super::blob")]
    pub data: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

impl TileEntry {
    pub fn new(url: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            url: url.into(),
            data,
            fetched_at: Utc::now(),
        }
    }

    pub fn age_display(&self) -> String {
        age_display(self.fetched_at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEntry {
    pub url: String,
    pub data: String,
    pub fetched_at: DateTime<Utc>,
}

impl TextEntry {
    pub fn new(url: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            data: data.into(),
            fetched_at: Utc::now(),
        }
    }

    pub fn age_display(&self) -> String {
        age_display(self.fetched_at)
    }
}
