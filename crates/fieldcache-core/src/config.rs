//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! the WFS server and layer names, the tile URL template, the connectivity
//! probe deadline, and the last used username.
//!
//! Configuration is stored at `~/.config/fieldcache/config.json`. Any field
//! can be overridden through `FIELDCACHE_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "fieldcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// The probe gives up after one second; a slower link is treated as offline.
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1000;

const DEFAULT_TILE_URL_TEMPLATE: &str =
    "https://mapproxy.rest-gdi.geo-data.space/tiles/osm/webmercator/{z}/{x}/{y}.png";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server_address: Option<String>,
    pub namespace: Option<String>,
    pub namespace_uri: Option<String>,
    pub files_view_name: Option<String>,
    pub feature_id_property: Option<String>,
    pub tile_url_template: Option<String>,
    pub probe_timeout_ms: u64,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_address: None,
            namespace: None,
            namespace_uri: None,
            files_view_name: None,
            feature_id_property: None,
            tile_url_template: None,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            last_username: None,
        }
    }
}

/// Fully resolved WFS service settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub server_address: String,
    pub namespace: String,
    pub namespace_uri: String,
    /// Qualified type name of the files layer (`namespace:name`).
    pub files_type: String,
    pub feature_id_property: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            Ok(serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?)
        } else {
            Ok(Self::default())
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply `FIELDCACHE_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from any variable lookup; blank values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("FIELDCACHE_SERVER") {
            self.server_address = Some(v);
        }
        if let Some(v) = get("FIELDCACHE_NAMESPACE") {
            self.namespace = Some(v);
        }
        if let Some(v) = get("FIELDCACHE_NAMESPACE_URI") {
            self.namespace_uri = Some(v);
        }
        if let Some(v) = get("FIELDCACHE_FILES_VIEW") {
            self.files_view_name = Some(v);
        }
        if let Some(v) = get("FIELDCACHE_ID_PROPERTY") {
            self.feature_id_property = Some(v);
        }
        if let Some(v) = get("FIELDCACHE_TILE_URL") {
            self.tile_url_template = Some(v);
        }
        if let Some(v) = get("FIELDCACHE_PROBE_TIMEOUT_MS") {
            match v.trim().parse() {
                Ok(ms) => self.probe_timeout_ms = ms,
                Err(_) => tracing::warn!(value = %v, "Ignoring invalid FIELDCACHE_PROBE_TIMEOUT_MS"),
            }
        }
        if let Some(v) = get("FIELDCACHE_USERNAME") {
            self.last_username = Some(v);
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn tile_url_template(&self) -> &str {
        self.tile_url_template
            .as_deref()
            .unwrap_or(DEFAULT_TILE_URL_TEMPLATE)
    }

    /// Resolve the WFS settings, failing if a required field is missing.
    pub fn service(&self) -> Result<ServiceConfig> {
        fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
            value
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("Missing configuration value: {}", name))
        }

        let server_address = required(&self.server_address, "server_address")?
            .trim_end_matches('/')
            .to_string();
        let namespace = required(&self.namespace, "namespace")?.to_string();
        let files_view = required(&self.files_view_name, "files_view_name")?;
        let feature_id_property = required(&self.feature_id_property, "feature_id_property")?;

        let namespace_uri = self
            .namespace_uri
            .clone()
            .unwrap_or_else(|| format!("{}/{}", server_address, namespace));

        Ok(ServiceConfig {
            files_type: format!("{}:{}", namespace, files_view),
            feature_id_property: feature_id_property.to_string(),
            server_address,
            namespace,
            namespace_uri,
        })
    }

    /// Cache directory, one per WFS namespace.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;

        let mut path = cache_dir.join(APP_NAME);
        if let Some(ref ns) = self.namespace {
            path = path.join(ns);
        }
        Ok(path)
    }

    /// Directory for rolling log files.
    pub fn log_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME).join("logs"))
    }
}
