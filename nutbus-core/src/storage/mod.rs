/**
 * METRICS STORAGE - Sink interface for collected UPS snapshots
 *
 * ROLE:
 * The collector hands one row per device per flush to a MetricsSink.
 * The sink is injected at construction time (no global handle) so tests
 * can swap in a memory sink.
 *
 * HOW IT WORKS:
 * - MetricsRow = storage key + device id + timestamp + present fields
 * - insert() is blocking and must be an upsert keyed by (storage key, timestamp)
 * - RetryingSink wraps any sink with N attempts and a pause between them
 * - JsonFileSink persists rows in a JSON array file
 */

mod json_file;

pub use json_file::{JsonFileSink, DEFAULT_MAX_ROWS};

use crate::error::SinkError;
use crate::record::DeviceRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::warn;

/// One persisted snapshot of a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRow {
    pub storage_key: String,
    pub device_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Present fields only, keyed by bus field name.
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl MetricsRow {
    pub fn from_record(storage_key: impl Into<String>, record: &DeviceRecord) -> Self {
        Self {
            storage_key: storage_key.into(),
            device_id: record.device_id().to_string(),
            timestamp: record.updated_at(),
            fields: record.to_json().into_iter().collect(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.fields.get(field)
    }
}

/// Blocking storage backend. Failures are assumed retryable without side
/// effects.
pub trait MetricsSink: Send + Sync {
    fn insert(&self, row: &MetricsRow) -> Result<(), SinkError>;

    /// Outcome of the most recent write, for the health report.
    fn is_healthy(&self) -> bool {
        true
    }

    fn describe(&self) -> String;
}

/// Retries a failing insert a fixed number of times.
pub struct RetryingSink<S> {
    inner: S,
    attempts: u32,
    pause: Duration,
}

impl<S: MetricsSink> RetryingSink<S> {
    pub fn new(inner: S, attempts: u32, pause: Duration) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
            pause,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: MetricsSink> MetricsSink for RetryingSink<S> {
    fn insert(&self, row: &MetricsRow) -> Result<(), SinkError> {
        let mut attempt = 1;
        loop {
            match self.inner.insert(row) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.attempts => {
                    warn!(
                        "insert for {} failed (attempt {}/{}): {}",
                        row.storage_key, attempt, self.attempts, e
                    );
                    std::thread::sleep(self.pause);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn is_healthy(&self) -> bool {
        self.inner.is_healthy()
    }

    fn describe(&self) -> String {
        format!("{} (x{} attempts)", self.inner.describe(), self.attempts)
    }
}
