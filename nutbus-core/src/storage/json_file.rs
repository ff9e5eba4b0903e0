//! JSON file sink: all rows in one JSON array, rewritten on each insert.
//!
//! Rows are upserted on `(storage_key, timestamp)`; the oldest rows are
//! dropped past `max_rows`.

use super::{MetricsRow, MetricsSink};
use crate::error::SinkError;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

pub const DEFAULT_MAX_ROWS: usize = 50_000;

pub struct JsonFileSink {
    path: PathBuf,
    max_rows: usize,
    cache: Mutex<Vec<MetricsRow>>,
    healthy: AtomicBool,
}

impl JsonFileSink {
    /// Opens (or creates) the file and loads existing rows.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, SinkError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        if !path.exists() {
            fs::write(&path, "[]")?;
        }
        let content = fs::read_to_string(&path)?;
        let rows: Vec<MetricsRow> = if content.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&content)?
        };
        info!("metrics file {:?} opened ({} rows)", path, rows.len());
        Ok(Self {
            path,
            max_rows: DEFAULT_MAX_ROWS,
            cache: Mutex::new(rows),
            healthy: AtomicBool::new(true),
        })
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> Vec<MetricsRow> {
        self.cache.lock().clone()
    }

    fn save(&self, rows: &[MetricsRow]) -> Result<(), SinkError> {
        let json = serde_json::to_string_pretty(rows)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl MetricsSink for JsonFileSink {
    fn insert(&self, row: &MetricsRow) -> Result<(), SinkError> {
        let mut rows = self.cache.lock();
        match rows
            .iter_mut()
            .find(|r| r.storage_key == row.storage_key && r.timestamp == row.timestamp)
        {
            Some(existing) => *existing = row.clone(),
            None => rows.push(row.clone()),
        }
        if rows.len() > self.max_rows {
            let excess = rows.len() - self.max_rows;
            rows.drain(..excess);
        }
        let result = self.save(&rows);
        self.healthy.store(result.is_ok(), Ordering::Relaxed);
        if result.is_ok() {
            debug!("stored metrics row for {}", row.storage_key);
        }
        result
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    fn describe(&self) -> String {
        format!("json file {}", self.path.display())
    }
}
