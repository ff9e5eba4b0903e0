//! Telemetry sources: anything that can hand back a flat variable snapshot.

mod nut;

pub use nut::{parse_var_line, NutSource, DEFAULT_NUT_PORT};

use crate::error::SourceError;
use std::collections::BTreeMap;
use std::future::Future;

/// Flat `variable -> value` mapping, e.g. `battery.charge -> "100"`.
pub type Snapshot = BTreeMap<String, String>;

/// Connection-oriented telemetry source driven by the bridge poll loop.
///
/// The source owns its session handle: it exists only between a successful
/// `connect` and the next `disconnect` (or a failed fetch).
pub trait TelemetrySource: Send {
    fn connect(&mut self) -> impl Future<Output = Result<(), SourceError>> + Send;

    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;

    fn is_connected(&self) -> bool;

    /// Full variable snapshot. An empty map means a transient failure.
    fn fetch_all(&mut self) -> impl Future<Output = Result<Snapshot, SourceError>> + Send;

    /// Human readable target, for logs.
    fn describe(&self) -> String;
}
