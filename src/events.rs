/*!
 * Event sink for external reporting
 *
 * Emits append-only JSON Lines records consumed by the dashboard and
 * reporting collaborators: transfer metrics, verification summaries,
 * per-phase progress, resource samples, and classified errors. The sink
 * is thread-safe and crash-resistant (append-only, one line per event).
 */

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ExodusError, Result};
use crate::preflight::resources::ResourceSample;
use crate::transfer::metrics::TransferMetric;

/// Pipeline phases reported through progress events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Preflight,
    Provision,
    Transfer,
    Verify,
    Rollback,
}

/// One reportable event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// A completed (or failed) object transfer
    TransferMetric(TransferMetric),

    /// Run-level verification summary
    VerificationSummary {
        total: u64,
        verified: u64,
        failed: u64,
    },

    /// Progress percentage for a pipeline phase
    Progress { phase: Phase, percent: f64 },

    /// Point-in-time system resource usage
    ResourceSample(ResourceSample),

    /// A classified error was recorded
    ErrorRecorded {
        kind: ErrorKind,
        source: String,
        message: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    timestamp: String,
    #[serde(flatten)]
    event: Event,
}

/// Append-only JSON Lines writer shared across threads
pub struct JsonlWriter {
    writer: Mutex<BufWriter<std::fs::File>>,
}

impl JsonlWriter {
    /// Open (or create) a log file for appending
    pub fn append_to(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Serialize one record and append it as a single line
    pub fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| ExodusError::Other("event writer poisoned".to_string()))?;
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(())
    }
}

/// Read every record from a JSON Lines file, skipping blank lines
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

/// Shared handle to the event log; disabled when no path is configured
#[derive(Clone)]
pub struct EventSink {
    writer: Option<Arc<JsonlWriter>>,
}

impl EventSink {
    /// Create a sink appending to `path`, or a disabled sink for `None`
    pub fn new(path: Option<&Path>) -> Result<Self> {
        let writer = match path {
            Some(p) => Some(Arc::new(JsonlWriter::append_to(p)?)),
            None => None,
        };
        Ok(Self { writer })
    }

    /// A sink that drops every event
    pub fn disabled() -> Self {
        Self { writer: None }
    }

    /// Emit one event; failures to report are logged, never propagated
    pub fn emit(&self, event: Event) {
        let Some(writer) = &self.writer else { return };
        let envelope = Envelope {
            timestamp: Utc::now().to_rfc3339(),
            event,
        };
        if let Err(e) = writer.append(&envelope) {
            tracing::warn!("failed to append event: {}", e);
        }
    }
}

/// Read back the events of a previous run (used by `exodus status`)
pub fn read_events(path: &Path) -> Result<Vec<Event>> {
    let envelopes: Vec<Envelope> = read_jsonl(path)?;
    Ok(envelopes.into_iter().map(|e| e.event).collect())
}
