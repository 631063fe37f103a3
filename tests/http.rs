//! Retrieval service over a real socket.
//!
//! The service runs on a free port with a fake knowledge engine; requests
//! go through reqwest exactly as an external client would send them.

use anyhow::{bail, Result};
use async_trait::async_trait;
use repo_kb::engine::KnowledgeEngine;
use repo_kb::server;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

/// Returns more results than asked for and records the parameters it saw.
#[derive(Default)]
struct FakeEngine {
    searches: Mutex<Vec<(String, f64, usize)>>,
    asks: Mutex<Vec<(String, f64)>>,
    fail: bool,
}

#[async_trait]
impl KnowledgeEngine for FakeEngine {
    async fn import_text(&self, _text: &str, _document_id: &str) -> Result<()> {
        Ok(())
    }

    async fn is_document_ready(&self, _document_id: &str) -> Result<bool> {
        Ok(true)
    }

    async fn search(&self, query: &str, min_relevance: f64, limit: usize) -> Result<Vec<Value>> {
        if self.fail {
            bail!("engine unavailable");
        }
        self.searches
            .lock()
            .unwrap()
            .push((query.to_string(), min_relevance, limit));
        Ok((0..limit + 2)
            .map(|i| json!({ "sourceName": format!("doc{}.txt", i), "partitions": [{ "relevance": 0.9 }] }))
            .collect())
    }

    async fn ask(&self, question: &str, min_relevance: f64) -> Result<String> {
        if self.fail {
            bail!("engine unavailable");
        }
        self.asks
            .lock()
            .unwrap()
            .push((question.to_string(), min_relevance));
        Ok("The answer is \"42\".\nSee doc0.txt".to_string())
    }
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    for _ in 0..50 {
        if client
            .get(format!("http://127.0.0.1:{}/health", port))
            .send()
            .await
            .is_ok()
        {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    panic!("server did not start on port {}", port);
}

async fn start(engine: Arc<FakeEngine>) -> (u16, tokio::task::JoinHandle<()>) {
    let port = find_free_port();
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap();
    let handle = tokio::spawn(async move {
        server::serve(listener, engine).await.unwrap();
    });
    wait_for_server(port).await;
    (port, handle)
}

#[tokio::test]
async fn test_search_forwards_parameters_and_caps_results() {
    let engine = Arc::new(FakeEngine::default());
    let (port, handle) = start(engine.clone()).await;

    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/search", port))
        .json(&json!({ "query": "foo", "relevance": 0.9, "limit": 3 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(body.len(), 3);
    assert_eq!(body[0]["sourceName"], "doc0.txt");
    assert_eq!(body[0]["partitions"][0]["relevance"], 0.9);

    assert_eq!(
        *engine.searches.lock().unwrap(),
        vec![("foo".to_string(), 0.9, 3)]
    );

    handle.abort();
}

#[tokio::test]
async fn test_search_defaults() {
    let engine = Arc::new(FakeEngine::default());
    let (port, handle) = start(engine.clone()).await;

    let body: Vec<Value> = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/search", port))
        .json(&json!({ "query": "bar" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body.len(), 10);
    assert_eq!(
        *engine.searches.lock().unwrap(),
        vec![("bar".to_string(), 0.5, 10)]
    );

    handle.abort();
}

#[tokio::test]
async fn test_ask_returns_plain_text_verbatim() {
    let engine = Arc::new(FakeEngine::default());
    let (port, handle) = start(engine.clone()).await;

    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/ask", port))
        .json(&json!({ "query": "foo" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let content_type = resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/plain"));
    assert_eq!(resp.text().await.unwrap(), "The answer is \"42\".\nSee doc0.txt");

    assert_eq!(
        *engine.asks.lock().unwrap(),
        vec![("foo".to_string(), 0.5)]
    );

    handle.abort();
}

#[tokio::test]
async fn test_engine_failure_is_bad_gateway() {
    let engine = Arc::new(FakeEngine {
        fail: true,
        ..Default::default()
    });
    let (port, handle) = start(engine).await;

    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/ask", port))
        .json(&json!({ "query": "foo" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "engine_error");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("engine unavailable"));

    handle.abort();
}

#[tokio::test]
async fn test_missing_query_is_rejected_before_engine() {
    let engine = Arc::new(FakeEngine::default());
    let (port, handle) = start(engine.clone()).await;

    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/search", port))
        .json(&json!({ "limit": 3 }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_client_error());
    assert!(engine.searches.lock().unwrap().is_empty());

    handle.abort();
}

#[tokio::test]
async fn test_health() {
    let engine = Arc::new(FakeEngine::default());
    let (port, handle) = start(engine).await;

    let body: Value = reqwest::get(format!("http://127.0.0.1:{}/health", port))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");

    handle.abort();
}
