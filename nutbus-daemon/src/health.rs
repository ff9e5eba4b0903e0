use nutbus_core::{BridgePhase, BusClient, Collector, MetricsSink, TelemetryBridge};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const SERVICE_NAME: &str = "nutbus";

#[derive(Debug, Serialize)]
pub struct ServiceHealth {
    pub service: &'static str,
    pub version: &'static str,
    /// "healthy" or "degraded"
    pub status: &'static str,
    pub components: Components,
    pub bridge_phase: BridgePhase,
    pub last_nut_poll: Option<String>,
    pub last_db_save: Option<String>,
    pub devices_monitored: usize,
    pub mqtt_reconnects: u32,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct Components {
    pub mqtt: &'static str,
    pub storage: &'static str,
    pub nut_bridge: &'static str,
    pub collector: &'static str,
}

impl ServiceHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Read-only view over the running services, cheap to clone into handlers.
#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    bus: Arc<BusClient>,
    bridge: Arc<TelemetryBridge>,
    collector: Arc<Collector>,
    sink: Arc<dyn MetricsSink>,
}

impl HealthTracker {
    pub fn new(
        bus: Arc<BusClient>,
        bridge: Arc<TelemetryBridge>,
        collector: Arc<Collector>,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            start_time: Instant::now(),
            bus,
            bridge,
            collector,
            sink,
        }
    }

    pub fn get_health(&self) -> ServiceHealth {
        let stats = self.bus.stats();
        let storage_ok = self.sink.is_healthy();
        let bridge_running = self.bridge.is_running();
        let collector_running = self.collector.is_running();
        let all_ok = stats.connected && storage_ok && bridge_running && collector_running;

        ServiceHealth {
            service: SERVICE_NAME,
            version: env!("CARGO_PKG_VERSION"),
            status: if all_ok { "healthy" } else { "degraded" },
            components: Components {
                mqtt: if stats.connected { "connected" } else { "disconnected" },
                storage: if storage_ok { "ok" } else { "failing" },
                nut_bridge: if bridge_running { "running" } else { "stopped" },
                collector: if collector_running { "running" } else { "stopped" },
            },
            bridge_phase: self.bridge.phase(),
            last_nut_poll: rfc3339(self.bridge.last_poll_time()),
            last_db_save: rfc3339(self.collector.last_save_time()),
            devices_monitored: self.collector.device_count(),
            mqtt_reconnects: stats.reconnects,
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

fn rfc3339(at: Option<OffsetDateTime>) -> Option<String> {
    at.and_then(|t| t.format(&Rfc3339).ok())
}
