//! Knowledge engine capability.
//!
//! The engine owns embedding, vector storage, ranking and answer synthesis.
//! This crate consumes it through the four operations of
//! [`KnowledgeEngine`]; the ingestion pipeline and the HTTP service depend
//! only on the trait.
//!
//! [`KernelMemoryClient`] talks to a Kernel-Memory-compatible web service:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | import | `POST /upload` (multipart: `index`, `documentId`, `content.txt`) |
//! | readiness | `GET /upload-status?index=&documentId=` |
//! | search | `POST /search` `{index, query, minRelevance, limit}` |
//! | ask | `POST /ask` `{index, question, minRelevance}` |
//!
//! There is no retry: a connectivity failure ends the calling flow.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::RepoKbError;

/// Operations the orchestrator and the retrieval service need from the
/// knowledge engine.
#[async_trait]
pub trait KnowledgeEngine: Send + Sync {
    /// Submit `text` for ingestion under `document_id`. Returns once the
    /// engine has accepted it, not when it is queryable.
    async fn import_text(&self, text: &str, document_id: &str) -> Result<()>;

    /// Whether ingestion of `document_id` has completed.
    async fn is_document_ready(&self, document_id: &str) -> Result<bool>;

    /// Nearest-neighbor search. Result objects are passed through untouched;
    /// their shape belongs to the engine.
    async fn search(&self, query: &str, min_relevance: f64, limit: usize) -> Result<Vec<Value>>;

    /// Synthesized answer to `question` from sources at or above
    /// `min_relevance`.
    async fn ask(&self, question: &str, min_relevance: f64) -> Result<String>;
}

/// HTTP client for a Kernel Memory web service.
pub struct KernelMemoryClient {
    base_url: String,
    index: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl KernelMemoryClient {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client for the knowledge engine")?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            api_key: config.resolved_api_key(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("Authorization", key),
            None => req,
        }
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let resp = self
            .authorize(self.client.post(self.url(path)).json(body))
            .send()
            .await
            .with_context(|| format!("Failed to reach knowledge engine at {}", self.base_url))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RepoKbError::Engine(format!(
                "POST /{} failed (HTTP {}): {}",
                path,
                status,
                text.chars().take(500).collect::<String>()
            ))
            .into());
        }

        Ok(resp.json().await?)
    }
}

#[async_trait]
impl KnowledgeEngine for KernelMemoryClient {
    async fn import_text(&self, text: &str, document_id: &str) -> Result<()> {
        let file = reqwest::multipart::Part::bytes(text.as_bytes().to_vec())
            .file_name("content.txt")
            .mime_str("text/plain")?;
        let form = reqwest::multipart::Form::new()
            .text("index", self.index.clone())
            .text("documentId", document_id.to_string())
            .part("file1", file);

        let resp = self
            .authorize(self.client.post(self.url("upload")).multipart(form))
            .send()
            .await
            .with_context(|| format!("Failed to upload document `{}`", document_id))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(RepoKbError::Engine(format!(
                "upload of `{}` failed (HTTP {}): {}",
                document_id,
                status,
                body.chars().take(500).collect::<String>()
            ))
            .into());
        }

        Ok(())
    }

    async fn is_document_ready(&self, document_id: &str) -> Result<bool> {
        let resp = self
            .authorize(
                self.client
                    .get(self.url("upload-status"))
                    .query(&[("index", self.index.as_str()), ("documentId", document_id)]),
            )
            .send()
            .await
            .with_context(|| format!("Failed to query status of `{}`", document_id))?;

        let status = resp.status();
        let body: Option<Value> = if status.is_success() {
            Some(resp.json().await?)
        } else {
            None
        };
        parse_upload_status(document_id, status, body.as_ref())
    }

    async fn search(&self, query: &str, min_relevance: f64, limit: usize) -> Result<Vec<Value>> {
        let body = serde_json::json!({
            "index": self.index,
            "query": query,
            "filters": [],
            "minRelevance": min_relevance,
            "limit": limit,
        });
        let json = self.post_json("search", &body).await?;
        Ok(extract_results(json, limit))
    }

    async fn ask(&self, question: &str, min_relevance: f64) -> Result<String> {
        let body = serde_json::json!({
            "index": self.index,
            "question": question,
            "filters": [],
            "minRelevance": min_relevance,
        });
        let json = self.post_json("ask", &body).await?;
        Ok(json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string())
    }
}

/// Interpret an `upload-status` response.
///
/// 404 means the engine has not registered the document yet, which is
/// "not ready" rather than an error. A pipeline that reports `failed` will
/// never complete, so it is surfaced instead of being polled forever.
fn parse_upload_status(document_id: &str, status: StatusCode, body: Option<&Value>) -> Result<bool> {
    if status == StatusCode::NOT_FOUND {
        return Ok(false);
    }
    if !status.is_success() {
        return Err(RepoKbError::Engine(format!(
            "upload-status for `{}` failed (HTTP {})",
            document_id, status
        ))
        .into());
    }

    let body = body.ok_or_else(|| anyhow::anyhow!("Empty upload-status response"))?;
    if body.get("failed").and_then(|v| v.as_bool()).unwrap_or(false) {
        return Err(RepoKbError::Engine(format!(
            "ingestion pipeline for `{}` failed",
            document_id
        ))
        .into());
    }
    Ok(body
        .get("completed")
        .and_then(|v| v.as_bool())
        .unwrap_or(false))
}

/// Pull the `results` array out of a search response, capped at `limit`.
fn extract_results(json: Value, limit: usize) -> Vec<Value> {
    let mut results = match json {
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        Value::Array(items) => items,
        _ => Vec::new(),
    };
    results.truncate(limit);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_not_found_is_not_ready() {
        assert!(!parse_upload_status("d", StatusCode::NOT_FOUND, None).unwrap());
    }

    #[test]
    fn test_status_completed() {
        let body = json!({ "completed": true, "failed": false });
        assert!(parse_upload_status("d", StatusCode::OK, Some(&body)).unwrap());

        let body = json!({ "completed": false, "failed": false });
        assert!(!parse_upload_status("d", StatusCode::OK, Some(&body)).unwrap());
    }

    #[test]
    fn test_status_failed_is_error() {
        let body = json!({ "completed": false, "failed": true });
        let err = parse_upload_status("doc", StatusCode::OK, Some(&body)).unwrap_err();
        assert!(err.to_string().contains("doc"));
    }

    #[test]
    fn test_status_server_error() {
        assert!(parse_upload_status("d", StatusCode::BAD_GATEWAY, None).is_err());
    }

    #[test]
    fn test_extract_results_truncates() {
        let json = json!({
            "query": "foo",
            "noResult": false,
            "results": [ { "link": "a" }, { "link": "b" }, { "link": "c" } ]
        });
        let results = extract_results(json, 2);
        assert_eq!(results, vec![json!({ "link": "a" }), json!({ "link": "b" })]);
    }

    #[test]
    fn test_extract_results_missing_array() {
        assert!(extract_results(json!({ "noResult": true }), 10).is_empty());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let cfg = EngineConfig {
            url: "http://localhost:9001/".to_string(),
            index: "default".to_string(),
            api_key: Some("k".to_string()),
            timeout_secs: 5,
        };
        let client = KernelMemoryClient::new(&cfg).unwrap();
        assert_eq!(client.url("ask"), "http://localhost:9001/ask");
    }
}
