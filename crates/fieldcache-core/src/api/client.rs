//! WFS client for the parcel files layer.
//!
//! Reads go through `GetFeature` requests with JSON output; writes are WFS-T
//! `Transaction` documents. File contents travel base64-encoded in the
//! `fdata` property of the files layer.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{header, Client, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{RemoteError, RemoteFileService};
use crate::config::ServiceConfig;
use crate::models::file::{join_user_ids, parse_user_ids};
use crate::models::{FileKind, RemoteFileMetadata};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// Uploads carry whole files, so this is generous.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Properties fetched when listing; `fdata` is left out on purpose.
const LISTING_PROPERTIES: [&str; 4] = ["filename", "filesize", "mimetype", "userids"];

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    properties: Map<String, Value>,
}

/// A file row from the files layer, with its content when it was requested.
#[derive(Debug, Clone)]
pub struct WfsFile {
    pub meta: RemoteFileMetadata,
    pub data: Option<Vec<u8>>,
}

/// API client for the WFS files layer.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct WfsClient {
    client: Client,
    service: ServiceConfig,
    credentials: Option<Credentials>,
}

impl WfsClient {
    pub fn new(service: ServiceConfig, credentials: Option<Credentials>) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            service,
            credentials,
        })
    }

    fn wfs_endpoint(&self) -> String {
        format!("{}/geoserver/wfs", self.service.server_address)
    }

    fn with_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match self.credentials {
            Some(ref c) => request.basic_auth(&c.username, Some(&c.password)),
            None => request,
        }
    }

    // ===== URLs =====

    /// Capabilities document used as the connectivity probe target.
    pub fn capabilities_url(&self) -> String {
        format!(
            "{}?service=WFS&version=1.1.0&request=GetCapabilities",
            self.wfs_endpoint()
        )
    }

    fn get_feature_url(&self, params: &[(&str, String)]) -> Result<Url, RemoteError> {
        let mut all: Vec<(&str, String)> = vec![
            ("service", "WFS".to_string()),
            ("version", "2.0.0".to_string()),
            ("request", "GetFeature".to_string()),
            ("typeNames", self.service.files_type.clone()),
            ("outputformat", "json".to_string()),
        ];
        all.extend(params.iter().cloned());
        Url::parse_with_params(&self.wfs_endpoint(), &all)
            .map_err(|e| RemoteError::InvalidResponse(format!("Invalid service URL: {}", e)))
    }

    fn listing_url(&self, owner_feature_id: Option<&str>) -> Result<Url, RemoteError> {
        let mut properties: Vec<&str> = LISTING_PROPERTIES.to_vec();
        properties.push(&self.service.feature_id_property);

        let mut params = vec![("propertyName", properties.join(","))];
        if let Some(id) = owner_feature_id {
            params.push((
                "cql_filter",
                cql_equals(&self.service.feature_id_property, id),
            ));
        }
        self.get_feature_url(&params)
    }

    fn blob_url(&self, filename: &str) -> Result<Url, RemoteError> {
        self.get_feature_url(&[
            ("propertyName", "filename,fdata".to_string()),
            ("cql_filter", cql_equals("filename", filename)),
        ])
    }

    /// Listing of every file of one kind, contents included. This is the
    /// response the track and task readers cache as text.
    pub fn files_by_kind_url(&self, kind: FileKind) -> Result<String, RemoteError> {
        let url = self.get_feature_url(&[("cql_filter", cql_equals("mimetype", kind.mime_type()))])?;
        Ok(url.to_string())
    }

    // ===== Transport =====

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(None) for rate limit (should retry).
    async fn check_response_for_retry(response: Response) -> Result<Option<Response>, RemoteError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(RemoteError::from_status(status, &body))
        }
    }

    /// Send a request, backing off on rate limiting.
    async fn send(&self, build: impl Fn() -> RequestBuilder) -> Result<Response, RemoteError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = build().send().await?;
            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(RemoteError::RateLimited);
                    }
                    warn!(retry = retries, backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }

    /// Credentialed GET returning the body as text.
    pub async fn get_text(&self, url: &str) -> Result<String, RemoteError> {
        let response = self
            .send(|| self.with_auth(self.client.get(url)))
            .await?;
        Ok(response.text().await?)
    }

    /// Plain GET returning the body bytes (map tiles need no credentials).
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        let response = self.send(|| self.client.get(url)).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Probe request: fetch the capabilities document and discard it.
    ///
    /// Any HTTP answer, error statuses included, shows the server is
    /// reachable. Only transport failures are errors.
    pub async fn fetch_capabilities(&self) -> Result<(), RemoteError> {
        let response = self.client.get(self.capabilities_url()).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Capabilities request answered with an error status");
        }
        Ok(())
    }

    async fn transaction(&self, body: String) -> Result<String, RemoteError> {
        let endpoint = self.wfs_endpoint();
        let response = self
            .send(|| {
                self.with_auth(self.client.post(&endpoint))
                    .header(header::CONTENT_TYPE, "text/xml")
                    .body(body.clone())
            })
            .await?;
        let text = response.text().await?;
        check_transaction_response(&text)?;
        Ok(text)
    }

    // ===== Parsing =====

    /// Parse a files-layer feature collection.
    pub fn parse_files(&self, json: &str) -> Result<Vec<WfsFile>, RemoteError> {
        let collection: FeatureCollection = serde_json::from_str(json)
            .map_err(|e| RemoteError::InvalidResponse(format!("Bad feature collection: {}", e)))?;

        let mut files = Vec::with_capacity(collection.features.len());
        for feature in collection.features {
            let props = feature.properties;
            let Some(filename) = prop_string(&props, "filename") else {
                warn!("Skipping file feature without filename");
                continue;
            };

            let data = match prop_string(&props, "fdata") {
                Some(encoded) => Some(STANDARD.decode(encoded.trim()).map_err(|e| {
                    RemoteError::InvalidResponse(format!("Bad fdata for {}: {}", filename, e))
                })?),
                None => None,
            };

            let meta = RemoteFileMetadata {
                size_bytes: prop_u64(&props, "filesize").unwrap_or(0),
                mime_type: prop_string(&props, "mimetype")
                    .unwrap_or_else(|| FileKind::Other.mime_type().to_string()),
                authorized_user_ids: prop_string(&props, "userids")
                    .map(|ids| parse_user_ids(&ids))
                    .unwrap_or_default(),
                owner_feature_id: prop_string(&props, &self.service.feature_id_property)
                    .unwrap_or_default(),
                filename,
            };
            files.push(WfsFile { meta, data });
        }
        Ok(files)
    }

    fn insert_document(&self, meta: &RemoteFileMetadata, blob: &[u8]) -> String {
        let ns = &self.service.namespace;
        let property = |name: &str, value: &str| {
            format!("<{ns}:{name}>{}</{ns}:{name}>", xml_escape(value))
        };

        format!(
            concat!(
                r#"<wfs:Transaction service="WFS" version="1.1.0" "#,
                r#"xmlns:wfs="http://www.opengis.net/wfs" "#,
                r#"xmlns:{ns}="{uri}">"#,
                "<wfs:Insert><{ty}>{id}{name}{size}{mime}{users}{data}</{ty}></wfs:Insert>",
                "</wfs:Transaction>"
            ),
            ns = ns,
            uri = xml_escape(&self.service.namespace_uri),
            ty = self.service.files_type,
            id = property(&self.service.feature_id_property, &meta.owner_feature_id),
            name = property("filename", &meta.filename),
            size = property("filesize", &meta.size_bytes.to_string()),
            mime = property("mimetype", &meta.mime_type),
            users = property("userids", &join_user_ids(&meta.authorized_user_ids)),
            data = property("fdata", &STANDARD.encode(blob)),
        )
    }

    fn delete_document(&self, filename: &str) -> String {
        format!(
            concat!(
                r#"<wfs:Transaction service="WFS" version="1.1.0" "#,
                r#"xmlns:wfs="http://www.opengis.net/wfs" "#,
                r#"xmlns:ogc="http://www.opengis.net/ogc" "#,
                r#"xmlns:{ns}="{uri}">"#,
                r#"<wfs:Delete typeName="{ty}"><ogc:Filter><ogc:PropertyIsEqualTo>"#,
                "<ogc:PropertyName>filename</ogc:PropertyName>",
                "<ogc:Literal>{name}</ogc:Literal>",
                "</ogc:PropertyIsEqualTo></ogc:Filter></wfs:Delete>",
                "</wfs:Transaction>"
            ),
            ns = self.service.namespace,
            uri = xml_escape(&self.service.namespace_uri),
            ty = self.service.files_type,
            name = xml_escape(filename),
        )
    }
}

#[async_trait]
impl RemoteFileService for WfsClient {
    async fn list_metadata(
        &self,
        owner_feature_id: Option<&str>,
    ) -> Result<Vec<RemoteFileMetadata>, RemoteError> {
        let url = self.listing_url(owner_feature_id)?;
        let text = self.get_text(url.as_str()).await?;
        let files = self.parse_files(&text)?;
        debug!(count = files.len(), owner = ?owner_feature_id, "Remote files listed");
        Ok(files.into_iter().map(|f| f.meta).collect())
    }

    async fn get_blob(&self, filename: &str) -> Result<Vec<u8>, RemoteError> {
        let url = self.blob_url(filename)?;
        let text = self.get_text(url.as_str()).await?;
        self.parse_files(&text)?
            .into_iter()
            .find(|f| f.meta.filename == filename)
            .and_then(|f| f.data)
            .ok_or_else(|| RemoteError::NotFound(filename.to_string()))
    }

    async fn put_blob(&self, meta: &RemoteFileMetadata, blob: &[u8]) -> Result<(), RemoteError> {
        self.transaction(self.insert_document(meta, blob)).await?;
        debug!(filename = %meta.filename, bytes = blob.len(), "File inserted");
        Ok(())
    }

    async fn delete_blob(&self, filename: &str) -> Result<(), RemoteError> {
        let response = self.transaction(self.delete_document(filename)).await?;
        if transaction_total(&response, "totalDeleted") == Some(0) {
            return Err(RemoteError::NotFound(filename.to_string()));
        }
        debug!(filename, "File deleted");
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// CQL equality filter with single quotes doubled inside the literal.
fn cql_equals(property: &str, value: &str) -> String {
    format!("{}='{}'", property, value.replace('\'', "''"))
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Properties may come back as strings or numbers depending on the column type.
fn prop_string(props: &Map<String, Value>, name: &str) -> Option<String> {
    match props.get(name)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn prop_u64(props: &Map<String, Value>, name: &str) -> Option<u64> {
    match props.get(name)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A 200 response can still carry an OGC exception report.
fn check_transaction_response(body: &str) -> Result<(), RemoteError> {
    if body.contains("ExceptionReport") || body.contains("ServiceException") {
        let snippet: String = body.chars().take(300).collect();
        return Err(RemoteError::InvalidResponse(format!(
            "Transaction rejected: {}",
            snippet
        )));
    }
    Ok(())
}

/// Read a `<wfs:totalX>n</wfs:totalX>` summary count from a transaction response.
fn transaction_total(body: &str, element: &str) -> Option<u64> {
    let open = format!("{}>", element);
    let start = body.find(&open)? + open.len();
    let end = start + body[start..].find('<')?;
    body[start..end].trim().parse().ok()
}

// ============================================================================
// Tests
// ============================================================================
