//! UPS telemetry over MQTT: a poll/publish bridge, Home Assistant discovery,
//! and a collector that persists merged per-device records.

pub mod backoff;
pub mod bridge;
pub mod collector;
pub mod discovery;
pub mod error;
pub mod mqtt;
pub mod record;
pub mod registry;
pub mod storage;
pub mod telemetry;
pub mod topics;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bridge::{BridgePhase, BridgeSettings, PollOutcome, TelemetryBridge};
pub use collector::{Collector, CollectorSettings, FlushReport};
pub use discovery::{DeviceInfo, Discovery};
pub use error::{BusError, SinkError, SourceError};
pub use mqtt::{BusClient, BusSettings, BusStats, OutboundMessage, QoS};
pub use record::{DeviceRecord, Field, FieldValue};
pub use registry::{DeviceEntry, DeviceRegistry};
pub use storage::{JsonFileSink, MetricsRow, MetricsSink, RetryingSink};
pub use telemetry::{NutSource, Snapshot, TelemetrySource};
