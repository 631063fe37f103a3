//! Hand-off points with the out-of-process vector database.
//!
//! The index flow must not upload the snapshot while the database is still
//! writing it, and the search flow must not serve before the database has
//! loaded a freshly downloaded snapshot. Neither process is controlled from
//! here, so both flows block on a [`LifecycleBarrier`] until the operator
//! (or a probe) confirms the transition.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::Instant;

use crate::config::{LifecycleConfig, QdrantConfig};

/// The two transitions the flows wait on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierStep {
    /// Ingestion is done; the database must be stopped before upload.
    StopIndexEngine,
    /// A snapshot was downloaded; the database must be started before
    /// serving.
    StartIndexEngine,
}

impl BarrierStep {
    pub fn instruction(&self) -> &'static str {
        match self {
            BarrierStep::StopIndexEngine => {
                "Please stop the Qdrant container now. Press Enter to continue once stopped."
            }
            BarrierStep::StartIndexEngine => {
                "Please start the Qdrant container now. Press Enter to continue once started."
            }
        }
    }
}

/// Which barrier implementation to use.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BarrierKind {
    #[default]
    Console,
    Probe,
    None,
}

/// Blocks a flow until an external transition has happened.
#[async_trait]
pub trait LifecycleBarrier: Send + Sync {
    async fn wait(&self, step: BarrierStep) -> Result<()>;
}

/// Prints the instruction and waits for a line on stdin.
pub struct ConsoleBarrier;

#[async_trait]
impl LifecycleBarrier for ConsoleBarrier {
    async fn wait(&self, step: BarrierStep) -> Result<()> {
        println!("\n{}", step.instruction());
        let mut stdin = tokio::io::BufReader::new(tokio::io::stdin());
        await_confirmation(&mut stdin, step).await
    }
}

/// Read one confirmation line. End of input is not a confirmation.
async fn await_confirmation<R>(reader: &mut R, step: BarrierStep) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        bail!(
            "stdin closed before {:?} was confirmed; use lifecycle.barrier = \"probe\" or \"none\" when running unattended",
            step
        );
    }
    Ok(())
}

/// Polls the vector database URL: waits for it to stop answering before an
/// upload, and to answer successfully before serving.
pub struct ProbeBarrier {
    url: String,
    interval: Duration,
    timeout: Duration,
    client: reqwest::Client,
}

impl ProbeBarrier {
    pub fn new(qdrant: &QdrantConfig, lifecycle: &LifecycleConfig) -> Result<Self> {
        let interval = Duration::from_millis(lifecycle.probe_interval_ms);
        let client = reqwest::Client::builder()
            .timeout(interval.max(Duration::from_secs(1)))
            .build()?;
        Ok(Self {
            url: qdrant.url.clone(),
            interval,
            timeout: Duration::from_secs(lifecycle.probe_timeout_secs),
            client,
        })
    }

    async fn is_up(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl LifecycleBarrier for ProbeBarrier {
    async fn wait(&self, step: BarrierStep) -> Result<()> {
        let want_up = step == BarrierStep::StartIndexEngine;
        println!("\n{}", step.instruction());
        tracing::info!(url = %self.url, want_up, "waiting for vector database");

        let started = Instant::now();
        loop {
            if self.is_up().await == want_up {
                tracing::info!(url = %self.url, ?step, "vector database transition observed");
                return Ok(());
            }
            if started.elapsed() >= self.timeout {
                bail!(
                    "Vector database at {} did not {} within {:?}",
                    self.url,
                    if want_up { "come up" } else { "stop" },
                    self.timeout
                );
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

/// Never blocks. For automation where the database is managed elsewhere.
pub struct NoBarrier;

#[async_trait]
impl LifecycleBarrier for NoBarrier {
    async fn wait(&self, step: BarrierStep) -> Result<()> {
        tracing::info!(?step, "lifecycle barrier disabled; continuing");
        Ok(())
    }
}

/// Build the barrier selected by `[lifecycle].barrier`.
pub fn create_barrier(
    qdrant: &QdrantConfig,
    lifecycle: &LifecycleConfig,
) -> Result<Box<dyn LifecycleBarrier>> {
    Ok(match lifecycle.barrier {
        BarrierKind::Console => Box::new(ConsoleBarrier),
        BarrierKind::Probe => Box::new(ProbeBarrier::new(qdrant, lifecycle)?),
        BarrierKind::None => Box::new(NoBarrier),
    })
}
