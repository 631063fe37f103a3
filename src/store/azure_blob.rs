//! Azure Blob Storage container.
//!
//! Talks to the Blob service REST API directly and signs every request with
//! [Shared Key](https://learn.microsoft.com/rest/api/storageservices/authorize-with-shared-key)
//! authorization (HMAC-SHA256 over a canonical string), using `hmac`,
//! `sha2` and `base64` only.
//!
//! # Connection strings
//!
//! ```text
//! DefaultEndpointsProtocol=https;AccountName=acme;AccountKey=<base64>;EndpointSuffix=core.windows.net
//! AccountName=devstoreaccount1;AccountKey=<base64>;BlobEndpoint=http://127.0.0.1:10000/devstoreaccount1
//! UseDevelopmentStorage=true
//! ```
//!
//! `BlobEndpoint` wins over protocol/suffix, which is how Azurite and other
//! path-style endpoints are addressed.
//!
//! # Operations
//!
//! | Operation | Request |
//! |-----------|---------|
//! | create container | `PUT /{container}?restype=container` |
//! | list | `GET /{container}?restype=container&comp=list[&marker=]` |
//! | put | `PUT /{container}/{blob}` (`x-ms-blob-type: BlockBlob`) |
//! | get | `GET /{container}/{blob}` |
//! | delete | `DELETE /{container}/{blob}` |

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Method, StatusCode};
use sha2::Sha256;

use super::ObjectStore;
use crate::config::BlobStorageConfig;
use crate::error::RepoKbError;

type HmacSha256 = Hmac<Sha256>;

const API_VERSION: &str = "2021-08-06";

const DEV_ACCOUNT_NAME: &str = "devstoreaccount1";
const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

/// Account credentials and endpoint parsed from a connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobConnection {
    pub account_name: String,
    account_key: Vec<u8>,
    /// Base URL of the blob service, without a trailing slash.
    pub endpoint: String,
}

impl BlobConnection {
    pub fn parse(connection_string: &str) -> Result<Self> {
        let mut protocol = "https".to_string();
        let mut suffix = "core.windows.net".to_string();
        let mut account_name = None;
        let mut account_key = None;
        let mut blob_endpoint = None;

        for part in connection_string.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| RepoKbError::Config(format!("malformed connection string segment: {}", part)))?;
            match key {
                "UseDevelopmentStorage" if value.eq_ignore_ascii_case("true") => {
                    account_name = Some(DEV_ACCOUNT_NAME.to_string());
                    account_key = Some(DEV_ACCOUNT_KEY.to_string());
                    blob_endpoint = Some(DEV_BLOB_ENDPOINT.to_string());
                }
                "DefaultEndpointsProtocol" => protocol = value.to_string(),
                "EndpointSuffix" => suffix = value.to_string(),
                "AccountName" => account_name = Some(value.to_string()),
                "AccountKey" => account_key = Some(value.to_string()),
                "BlobEndpoint" => blob_endpoint = Some(value.to_string()),
                _ => {}
            }
        }

        let account_name = account_name
            .ok_or_else(|| RepoKbError::Config("connection string has no AccountName".into()))?;
        let account_key = account_key
            .ok_or_else(|| RepoKbError::Config("connection string has no AccountKey".into()))?;
        let account_key = STANDARD
            .decode(account_key.as_bytes())
            .context("AccountKey is not valid base64")?;

        let endpoint = blob_endpoint
            .unwrap_or_else(|| format!("{}://{}.blob.{}", protocol, account_name, suffix))
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            account_name,
            account_key,
            endpoint,
        })
    }
}

/// A single blob container addressed through a [`BlobConnection`].
pub struct AzureBlobStore {
    connection: BlobConnection,
    container: String,
    /// URL path of the endpoint (`""` for virtual-host style,
    /// `"/devstoreaccount1"` for path style).
    endpoint_path: String,
    client: reqwest::Client,
}

impl AzureBlobStore {
    pub fn new(connection: BlobConnection, container: impl Into<String>) -> Result<Self> {
        let url = reqwest::Url::parse(&connection.endpoint)
            .with_context(|| format!("Invalid blob endpoint: {}", connection.endpoint))?;
        let endpoint_path = url.path().trim_end_matches('/').to_string();

        Ok(Self {
            connection,
            container: container.into(),
            endpoint_path,
            client: reqwest::Client::new(),
        })
    }

    pub fn from_config(config: &BlobStorageConfig) -> Result<Self> {
        let connection = BlobConnection::parse(&config.resolved_connection_string()?)?;
        Self::new(connection, config.container_name.clone())
    }

    fn resource_path(&self, blob: Option<&str>) -> String {
        match blob {
            Some(name) => format!(
                "{}/{}/{}",
                self.endpoint_path,
                self.container,
                encode_blob_name(name)
            ),
            None => format!("{}/{}", self.endpoint_path, self.container),
        }
    }

    /// Sign and send one request against the container or one of its blobs.
    async fn send(
        &self,
        method: Method,
        blob: Option<&str>,
        query: &[(&str, &str)],
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response> {
        let path = self.resource_path(blob);
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();

        let is_blob_put = method == Method::PUT && blob.is_some();
        let content_length = body.as_ref().map(|b| b.len()).unwrap_or(0);
        let content_type = if is_blob_put {
            "application/octet-stream"
        } else {
            ""
        };

        let mut ms_headers = vec![
            ("x-ms-date".to_string(), date),
            ("x-ms-version".to_string(), API_VERSION.to_string()),
        ];
        if is_blob_put {
            ms_headers.push(("x-ms-blob-type".to_string(), "BlockBlob".to_string()));
        }
        ms_headers.sort_by(|a, b| a.0.cmp(&b.0));

        let resource = canonical_resource(&self.connection.account_name, &path, query);
        let to_sign = string_to_sign(
            method.as_str(),
            content_length,
            content_type,
            &ms_headers,
            &resource,
        );
        let signature = sign(&self.connection.account_key, &to_sign);
        let authorization = format!("SharedKey {}:{}", self.connection.account_name, signature);

        let base = reqwest::Url::parse(&self.connection.endpoint)?;
        let mut url = base.join(&path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter());
        }

        let target = url.to_string();
        let mut req = self
            .client
            .request(method.clone(), url)
            .header("Authorization", authorization);
        for (name, value) in &ms_headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if is_blob_put {
            req = req.header("Content-Type", content_type);
        }
        if let Some(bytes) = body {
            req = req.body(bytes);
        } else if method == Method::PUT {
            req = req.header("Content-Length", "0");
        }

        req.send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to {} {}: {}", method, target, e))
    }

    async fn list_page(&self, marker: Option<&str>) -> Result<(Vec<String>, Option<String>)> {
        let mut query = vec![("comp", "list"), ("restype", "container")];
        if let Some(m) = marker {
            query.push(("marker", m));
        }

        let resp = self.send(Method::GET, None, &query, None).await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok((Vec::new(), None));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(store_error("List Blobs", status, &body).into());
        }

        let xml = resp.text().await?;
        parse_list_blobs_response(&xml)
    }
}

#[async_trait]
impl ObjectStore for AzureBlobStore {
    fn container(&self) -> &str {
        &self.container
    }

    async fn ensure_container(&self) -> Result<()> {
        let resp = self
            .send(Method::PUT, None, &[("restype", "container")], None)
            .await?;
        let status = resp.status();
        // 409: ContainerAlreadyExists
        if status.is_success() || status == StatusCode::CONFLICT {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(store_error("Create Container", status, &body).into())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let (batch, next) = self.list_page(marker.as_deref()).await?;
            keys.extend(batch);
            match next {
                Some(m) => marker = Some(m),
                None => break,
            }
        }
        Ok(keys)
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let resp = self.send(Method::PUT, Some(key), &[], Some(bytes)).await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(store_error(&format!("Put Blob '{}'", key), status, &body).into());
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let resp = self.send(Method::GET, Some(key), &[], None).await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(store_error(&format!("Get Blob '{}'", key), status, &body).into());
        }
        Ok(resp.bytes().await?.to_vec())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let resp = self.send(Method::DELETE, Some(key), &[], None).await?;
        let status = resp.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(store_error(&format!("Delete Blob '{}'", key), status, &body).into())
    }
}

fn store_error(operation: &str, status: StatusCode, body: &str) -> RepoKbError {
    RepoKbError::Store(format!(
        "{} failed (HTTP {}): {}",
        operation,
        status,
        body.chars().take(500).collect::<String>()
    ))
}

// ============ Shared Key signing ============

/// Build the Shared Key string-to-sign for the Blob service.
///
/// ```text
/// VERB \n Content-Encoding \n Content-Language \n Content-Length \n
/// Content-MD5 \n Content-Type \n Date \n If-Modified-Since \n If-Match \n
/// If-None-Match \n If-Unmodified-Since \n Range \n
/// CanonicalizedHeaders CanonicalizedResource
/// ```
///
/// Content-Length is left empty when zero. `Date` stays empty because
/// `x-ms-date` is always sent. `ms_headers` must already be sorted.
fn string_to_sign(
    method: &str,
    content_length: usize,
    content_type: &str,
    ms_headers: &[(String, String)],
    canonical_resource: &str,
) -> String {
    let length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };

    let canonical_headers: String = ms_headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k.to_ascii_lowercase(), v.trim()))
        .collect();

    format!(
        "{}\n\n\n{}\n\n{}\n\n\n\n\n\n\n{}{}",
        method, length, content_type, canonical_headers, canonical_resource
    )
}

/// `/{account}{path}` followed by one `\nname:value` line per query
/// parameter, names lowercased and sorted.
fn canonical_resource(account: &str, path: &str, query: &[(&str, &str)]) -> String {
    let mut params: Vec<(String, &str)> = query
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), *v))
        .collect();
    params.sort_by(|a, b| a.0.cmp(&b.0));

    let mut resource = format!("/{}{}", account, path);
    for (k, v) in params {
        resource.push('\n');
        resource.push_str(&k);
        resource.push(':');
        resource.push_str(v);
    }
    resource
}

/// Base64(HMAC-SHA256(key, string_to_sign)).
fn sign(key: &[u8], string_to_sign: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(string_to_sign.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Percent-encode each `/`-separated segment of a blob name (RFC 3986
/// unreserved characters pass through).
fn encode_blob_name(name: &str) -> String {
    name.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
}

fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

// ============ List Blobs XML ============

/// Parse a List Blobs `EnumerationResults` document into blob names and the
/// continuation marker (if the listing continues).
fn parse_list_blobs_response(xml: &str) -> Result<(Vec<String>, Option<String>)> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut names = Vec::new();
    let mut next_marker = None;
    let mut in_blob = false;
    let mut current: Option<&'static str> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"Blob" => in_blob = true,
                b"Name" if in_blob => current = Some("Name"),
                b"NextMarker" => current = Some("NextMarker"),
                _ => current = None,
            },
            Ok(Event::Text(t)) => {
                let text = t.unescape()?.to_string();
                match current {
                    Some("Name") => names.push(text),
                    Some("NextMarker") if !text.is_empty() => next_marker = Some(text),
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"Blob" {
                    in_blob = false;
                }
                current = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => bail!("Malformed List Blobs response: {}", e),
            _ => {}
        }
    }

    Ok((names, next_marker))
}
