//! Ingestion orchestration.
//!
//! Drives every eligible file through the knowledge engine: submit the
//! content, then poll readiness until the engine reports the document as
//! queryable. Files are processed strictly one at a time, in enumeration
//! order; document *n+1* is not submitted until document *n* is ready. The
//! embedding provider behind the engine is rate limited, so this stays
//! sequential even though each step is async.
//!
//! The readiness wait is bounded by [`PollPolicy::timeout`]. A document that
//! does not become ready in time ends the run with
//! [`RepoKbError::TimedOut`]. There is no checkpoint: an interrupted or
//! failed run is restarted from the first file.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::IndexConfig;
use crate::doc_id::{document_id, IdScheme};
use crate::engine::KnowledgeEngine;
use crate::error::RepoKbError;
use crate::models::{Document, DocumentState, IngestReport};
use crate::progress::{IngestProgressEvent, IngestProgressReporter, NoProgress};

/// How often and for how long readiness is polled.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn from_config(config: &IndexConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.poll_interval_ms),
            timeout: Duration::from_secs(config.ready_timeout_secs),
        }
    }
}

/// Sequential ingestion driver over a [`KnowledgeEngine`].
pub struct Ingestor<'a> {
    engine: &'a dyn KnowledgeEngine,
    policy: PollPolicy,
    id_scheme: IdScheme,
    progress: Box<dyn IngestProgressReporter>,
}

impl<'a> Ingestor<'a> {
    pub fn new(engine: &'a dyn KnowledgeEngine, config: &IndexConfig) -> Self {
        Self {
            engine,
            policy: PollPolicy::from_config(config),
            id_scheme: config.id_scheme,
            progress: Box::new(NoProgress),
        }
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn IngestProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Ingest every path, in order, from files under `repo_root`.
    pub async fn ingest_all<I>(&self, repo_root: &Path, paths: I) -> Result<IngestReport>
    where
        I: IntoIterator<Item = String>,
    {
        let paths: Vec<String> = paths.into_iter().collect();
        let total = paths.len() as u64;
        let mut report = IngestReport::default();
        let mut seen: HashMap<String, String> = HashMap::new();

        tracing::info!(total, "starting ingestion");

        for (i, rel_path) in paths.into_iter().enumerate() {
            let n = i as u64 + 1;
            let mut doc = self.load_document(repo_root, &rel_path).await?;

            if let Some(previous) = seen.get(&doc.id) {
                tracing::warn!(
                    id = %doc.id,
                    first = %previous,
                    second = %rel_path,
                    "document id collision; the later file replaces the earlier one"
                );
                report
                    .collisions
                    .push((previous.clone(), rel_path.clone(), doc.id.clone()));
            }
            seen.insert(doc.id.clone(), rel_path.clone());

            self.submit(&mut doc).await?;
            self.progress.report(IngestProgressEvent::Submitted {
                document_id: doc.id.clone(),
                n,
                total,
            });

            self.wait_until_ready(&mut doc).await?;
            self.progress.report(IngestProgressEvent::Ready {
                path: rel_path.clone(),
                n,
                total,
            });
            tracing::info!(path = %rel_path, id = %doc.id, "imported");

            report.ingested.push(doc.id);
        }

        Ok(report)
    }

    /// Read a tracked file into an unsubmitted [`Document`].
    pub async fn load_document(&self, repo_root: &Path, rel_path: &str) -> Result<Document> {
        let full_path = repo_root.join(rel_path);
        let bytes = tokio::fs::read(&full_path)
            .await
            .with_context(|| format!("Failed to read {}", full_path.display()))?;
        let content = String::from_utf8_lossy(&bytes).to_string();

        Ok(Document::new(
            document_id(rel_path, self.id_scheme),
            rel_path.to_string(),
            content,
        ))
    }

    /// `Unsubmitted → Submitted`.
    pub async fn submit(&self, doc: &mut Document) -> Result<()> {
        self.engine
            .import_text(&doc.content, &doc.id)
            .await
            .with_context(|| format!("Failed to import {}", doc.source_path))?;
        doc.state = DocumentState::Submitted;
        Ok(())
    }

    /// `Submitted → Ready`, or `Submitted → TimedOut` once the policy's
    /// timeout has elapsed without a positive reading.
    pub async fn wait_until_ready(&self, doc: &mut Document) -> Result<()> {
        let started = Instant::now();
        loop {
            if self.engine.is_document_ready(&doc.id).await? {
                doc.state = DocumentState::Ready;
                return Ok(());
            }

            let waited = started.elapsed();
            if waited >= self.policy.timeout {
                doc.state = DocumentState::TimedOut;
                return Err(RepoKbError::TimedOut {
                    document_id: doc.id.clone(),
                    waited,
                }
                .into());
            }

            tracing::debug!(id = %doc.id, ?waited, "not ready yet");
            tokio::time::sleep(self.policy.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;

    /// Engine that turns ready after a fixed number of negative readings.
    struct CountdownEngine {
        not_ready_readings: usize,
        readings: Mutex<usize>,
        imported: Mutex<Vec<String>>,
    }

    impl CountdownEngine {
        fn new(not_ready_readings: usize) -> Self {
            Self {
                not_ready_readings,
                readings: Mutex::new(0),
                imported: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl KnowledgeEngine for CountdownEngine {
        async fn import_text(&self, _text: &str, document_id: &str) -> Result<()> {
            self.imported.lock().unwrap().push(document_id.to_string());
            Ok(())
        }

        async fn is_document_ready(&self, _document_id: &str) -> Result<bool> {
            let mut readings = self.readings.lock().unwrap();
            *readings += 1;
            Ok(*readings > self.not_ready_readings)
        }

        async fn search(&self, _q: &str, _r: f64, _l: usize) -> Result<Vec<Value>> {
            Ok(Vec::new())
        }

        async fn ask(&self, _q: &str, _r: f64) -> Result<String> {
            Ok(String::new())
        }
    }

    fn fast_policy(timeout_ms: u64) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    fn doc(id: &str) -> Document {
        Document::new(id.to_string(), id.to_string(), "body".to_string())
    }

    #[tokio::test]
    async fn test_ready_only_after_positive_reading() {
        let engine = CountdownEngine::new(3);
        let ingestor = Ingestor::new(&engine, &IndexConfig::default()).with_policy(fast_policy(5_000));

        let mut d = doc("a.rs");
        ingestor.submit(&mut d).await.unwrap();
        assert_eq!(d.state, DocumentState::Submitted);

        ingestor.wait_until_ready(&mut d).await.unwrap();
        assert_eq!(d.state, DocumentState::Ready);
        assert_eq!(*engine.readings.lock().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_never_ready_times_out() {
        let engine = CountdownEngine::new(usize::MAX);
        let ingestor = Ingestor::new(&engine, &IndexConfig::default()).with_policy(fast_policy(20));

        let mut d = doc("stuck.rs");
        let err = ingestor.wait_until_ready(&mut d).await.unwrap_err();
        assert_eq!(d.state, DocumentState::TimedOut);
        match err.downcast_ref::<RepoKbError>() {
            Some(RepoKbError::TimedOut { document_id, .. }) => assert_eq!(document_id, "stuck.rs"),
            other => panic!("expected TimedOut, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_default_policy_matches_reference_interval() {
        let policy = PollPolicy::from_config(&IndexConfig::default());
        assert_eq!(policy.interval, Duration::from_millis(1500));
        assert_eq!(policy.timeout, Duration::from_secs(900));
    }

    #[tokio::test]
    async fn test_collisions_reported() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("a")).unwrap();
        std::fs::create_dir_all(tmp.path().join("ab")).unwrap();
        std::fs::write(tmp.path().join("a/bc.rs"), "one").unwrap();
        std::fs::write(tmp.path().join("ab/c.rs"), "two").unwrap();

        let engine = CountdownEngine::new(0);
        let ingestor = Ingestor::new(&engine, &IndexConfig::default()).with_policy(fast_policy(1_000));
        let report = ingestor
            .ingest_all(tmp.path(), vec!["a/bc.rs".to_string(), "ab/c.rs".to_string()])
            .await
            .unwrap();

        assert_eq!(report.ingested, vec!["abc.rs", "abc.rs"]);
        assert_eq!(
            report.collisions,
            vec![("a/bc.rs".to_string(), "ab/c.rs".to_string(), "abc.rs".to_string())]
        );
    }

    #[tokio::test]
    async fn test_missing_file_fails_before_submit() {
        let tmp = tempfile::TempDir::new().unwrap();
        let engine = CountdownEngine::new(0);
        let ingestor = Ingestor::new(&engine, &IndexConfig::default()).with_policy(fast_policy(1_000));

        let result = ingestor
            .ingest_all(tmp.path(), vec!["deleted.rs".to_string()])
            .await;
        assert!(result.is_err());
        assert!(engine.imported.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_path_without_allowed_chars_never_submits_empty_id() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("目录")).unwrap();
        std::fs::write(tmp.path().join("目录/文件"), "内容").unwrap();

        let engine = CountdownEngine::new(0);
        let ingestor = Ingestor::new(&engine, &IndexConfig::default()).with_policy(fast_policy(1_000));
        let report = ingestor
            .ingest_all(tmp.path(), vec!["目录/文件".to_string()])
            .await
            .unwrap();

        let imported = engine.imported.lock().unwrap().clone();
        assert_eq!(imported.len(), 1);
        assert!(!imported[0].is_empty());
        assert_eq!(report.ingested, imported);
    }

    #[tokio::test]
    async fn test_non_utf8_content_is_lossy() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("bin.dat"), [0x66, 0x6f, 0xff, 0x6f]).unwrap();

        let engine = CountdownEngine::new(0);
        let ingestor = Ingestor::new(&engine, &IndexConfig::default());
        let d = ingestor.load_document(tmp.path(), "bin.dat").await.unwrap();
        assert_eq!(d.content, "fo\u{FFFD}o");
        assert_eq!(d.id, "bin.dat");
    }
}
