//! Index run progress reporting.
//!
//! The ingestion loop reports each document as it is submitted and as it
//! becomes ready, so an operator can see where a long run is. Progress goes
//! to **stderr**; stdout stays reserved for the user-facing result lines.
//! There is no persisted checkpoint: these lines are the only record of how
//! far an interrupted run got.

use std::io::Write;

/// A single progress event for an index run.
#[derive(Clone, Debug)]
pub enum IngestProgressEvent {
    /// Document `n` of `total` was handed to the knowledge engine.
    Submitted {
        document_id: String,
        n: u64,
        total: u64,
    },
    /// Document `n` of `total` reported ready.
    Ready {
        path: String,
        n: u64,
        total: u64,
    },
}

/// Receives progress events from the ingestion loop.
pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "index  submitted  12 / 1,340  srclib.rs".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Submitted {
                document_id,
                n,
                total,
            } => format!(
                "index  submitted  {} / {}  {}\n",
                format_number(*n),
                format_number(*total),
                document_id
            ),
            IngestProgressEvent::Ready { path, n, total } => format!(
                "index  imported   {} / {}  {}\n",
                format_number(*n),
                format_number(*total),
                path
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Submitted {
                document_id,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "phase": "submitted",
                "document_id": document_id,
                "n": n,
                "total": total
            }),
            IngestProgressEvent::Ready { path, n, total } => serde_json::json!({
                "event": "progress",
                "phase": "ready",
                "path": path,
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Parse the `--progress` flag value. `auto` defers to the TTY check.
    pub fn from_flag(value: &str) -> Option<Self> {
        match value {
            "auto" => Some(Self::default_for_tty()),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            "off" => Some(ProgressMode::Off),
            _ => None,
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
