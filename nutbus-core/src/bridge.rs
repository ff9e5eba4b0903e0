/**
 * TELEMETRY BRIDGE - Poll a UPS, publish one message per field
 *
 * ROLE:
 * Drives the poll/publish cycle for one device and keeps its Home
 * Assistant discovery configs published.
 *
 * HOW IT WORKS:
 * - Idle -> Connecting (backoff on failure) -> Polling -> Publishing -> Sleeping -> Polling...
 * - An empty snapshot or an incomplete record ends the cycle early
 * - Discovery is published once per bus connection epoch; while the bus is
 *   down the "published" mark is dropped so it goes out again on reconnect
 * - Sleeps are cut in ticks so stop() returns quickly
 * - A consumer announcing "online" on the status topic triggers a republish
 */

use crate::backoff::{pause_while, Backoff};
use crate::discovery::{DeviceInfo, Discovery, DEFAULT_NAMESPACE};
use crate::error::{BusError, SourceError};
use crate::mqtt::{BusClient, QoS};
use crate::record::DeviceRecord;
use crate::telemetry::TelemetrySource;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_STATUS_TOPIC: &str = "homeassistant/status";

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub namespace: String,
    pub device: DeviceInfo,
    pub poll_interval: Duration,
    pub retry_min: Duration,
    pub retry_max: Duration,
    /// Consumer presence topic; `None` disables the subscription.
    pub status_topic: Option<String>,
    /// Granularity of stop checks while sleeping.
    pub tick: Duration,
}

impl BridgeSettings {
    pub fn new(device: DeviceInfo) -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            device,
            poll_interval: Duration::from_secs(60),
            retry_min: Duration::from_secs(1),
            retry_max: Duration::from_secs(64),
            status_topic: Some(DEFAULT_STATUS_TOPIC.to_string()),
            tick: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgePhase {
    Idle,
    Connecting,
    Polling,
    Publishing,
    Sleeping,
}

#[derive(Debug)]
pub enum PollOutcome {
    Published {
        messages: usize,
        failed: usize,
        discovery: bool,
    },
    Empty,
    Incomplete(Vec<&'static str>),
    SourceFailed(SourceError),
}

struct BridgeState {
    phase: BridgePhase,
    last_poll: Option<OffsetDateTime>,
    /// Bus epoch on which discovery was last published.
    discovery_epoch: Option<u64>,
}

pub struct TelemetryBridge {
    bus: Arc<BusClient>,
    discovery: Discovery,
    settings: BridgeSettings,
    state: Mutex<BridgeState>,
    running: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TelemetryBridge {
    pub fn new(bus: Arc<BusClient>, settings: BridgeSettings) -> Arc<Self> {
        Arc::new(Self {
            discovery: Discovery::new(settings.namespace.clone(), settings.device.clone()),
            bus,
            settings,
            state: Mutex::new(BridgeState {
                phase: BridgePhase::Idle,
                last_poll: None,
                discovery_epoch: None,
            }),
            running: AtomicBool::new(false),
            worker: Mutex::new(None),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.settings.device.device_id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> BridgePhase {
        self.state.lock().phase
    }

    /// Time of the last cycle whose state messages were all accepted.
    pub fn last_poll_time(&self) -> Option<OffsetDateTime> {
        self.state.lock().last_poll
    }

    /// True when discovery went out on the current bus connection.
    pub fn discovery_published(&self) -> bool {
        let epoch = self.bus.connection_epoch();
        self.bus.is_connected() && self.state.lock().discovery_epoch == Some(epoch)
    }

    fn set_phase(&self, phase: BridgePhase) {
        self.state.lock().phase = phase;
    }

    /// Spawns the poll loop. Returns false if it is already running.
    pub fn start<S: TelemetrySource + 'static>(self: &Arc<Self>, source: S) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("telemetry bridge for {} already running", self.device_id());
            return false;
        }
        info!(
            "starting telemetry bridge for {} on {} (every {:?})",
            self.device_id(),
            source.describe(),
            self.settings.poll_interval
        );
        let task = tokio::spawn(Arc::clone(self).run(source));
        *self.worker.lock() = Some(task);
        true
    }

    /// Raises the stop flag and joins the poll loop.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let task = self.worker.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("telemetry bridge task ended abnormally: {}", e);
            }
        }
        self.set_phase(BridgePhase::Idle);
    }

    /// Subscribes to the consumer status topic; an "online" payload
    /// republishes discovery. Safe to call again after a reconnect.
    pub fn setup_subscriptions(self: &Arc<Self>) -> Result<(), BusError> {
        let Some(topic) = self.settings.status_topic.clone() else {
            return Ok(());
        };
        if self.bus.is_subscribed(&topic) {
            return Ok(());
        }
        let bridge = Arc::downgrade(self);
        self.bus.subscribe(&topic, QoS::AtLeastOnce, move |_topic: &str, payload: &str| {
            if payload.trim() != "online" {
                return Ok(());
            }
            if let Some(bridge) = bridge.upgrade() {
                info!("consumer came online, republishing discovery");
                if !bridge.republish_discovery() {
                    anyhow::bail!("discovery republish failed");
                }
            }
            Ok(())
        })?;
        info!("watching {} for consumer restarts", topic);
        Ok(())
    }

    /// Unconditional discovery publish. Returns false (without retrying)
    /// when the bus is down or a message could not be queued.
    pub fn republish_discovery(&self) -> bool {
        if !self.bus.is_connected() {
            warn!("discovery republish skipped: bus not connected");
            return false;
        }
        let epoch = self.bus.connection_epoch();
        match self.discovery.publish_all(&self.bus) {
            Ok(_) => {
                self.state.lock().discovery_epoch = Some(epoch);
                true
            }
            Err(_) => false,
        }
    }

    /// Clears this device's discovery configs from the broker.
    pub fn remove_device(&self) -> Result<(), BusError> {
        self.discovery.remove_device(&self.bus)?;
        self.state.lock().discovery_epoch = None;
        Ok(())
    }

    fn ensure_discovery(&self) -> bool {
        if !self.bus.is_connected() {
            if self.state.lock().discovery_epoch.take().is_some() {
                info!("bus unavailable, discovery will be republished on reconnection");
            }
            return false;
        }
        let epoch = self.bus.connection_epoch();
        if self.state.lock().discovery_epoch == Some(epoch) {
            return false;
        }
        self.republish_discovery()
    }

    /// One fetch/convert/publish cycle against an already connected source.
    pub async fn poll_once<S: TelemetrySource>(&self, source: &mut S) -> PollOutcome {
        self.set_phase(BridgePhase::Polling);
        let snapshot = match source.fetch_all().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("poll of {} failed: {}", source.describe(), e);
                source.disconnect().await;
                return PollOutcome::SourceFailed(e);
            }
        };
        if snapshot.is_empty() {
            warn!("empty snapshot from {}, skipping cycle", source.describe());
            return PollOutcome::Empty;
        }

        let record = DeviceRecord::from_variables(self.device_id(), &snapshot);
        if !record.is_complete() {
            let missing = record.missing_required();
            warn!(
                "incomplete data from {} (missing {}), skipping cycle",
                source.describe(),
                missing.join(", ")
            );
            return PollOutcome::Incomplete(missing);
        }

        self.set_phase(BridgePhase::Publishing);
        let discovery = self.ensure_discovery();
        let messages = record.state_messages(&self.settings.namespace);
        let total = messages.len();
        let failed = match self.bus.publish_batch(&messages) {
            Ok(()) => 0,
            Err(BusError::Incomplete { failed, .. }) => failed,
            Err(e) => {
                debug!("state publish skipped: {}", e);
                total
            }
        };

        if failed == 0 {
            self.state.lock().last_poll = Some(OffsetDateTime::now_utc());
            debug!(
                "published {} fields for {} (charge {:?}, status {:?})",
                total,
                self.device_id(),
                record.battery_charge(),
                record.ups_status()
            );
        } else {
            warn!("{} of {} state messages for {} not published", failed, total, self.device_id());
        }
        PollOutcome::Published {
            messages: total,
            failed,
            discovery,
        }
    }

    async fn run<S: TelemetrySource>(self: Arc<Self>, mut source: S) {
        let mut backoff = Backoff::new(self.settings.retry_min, self.settings.retry_max);
        while self.is_running() {
            if !source.is_connected() {
                self.set_phase(BridgePhase::Connecting);
                if let Err(e) = source.connect().await {
                    let delay = backoff.next_delay();
                    warn!(
                        "cannot reach {}: {} (attempt {}, retry in {:?})",
                        source.describe(),
                        e,
                        backoff.attempts(),
                        delay
                    );
                    if !self.pause(delay).await {
                        break;
                    }
                    continue;
                }
                backoff.reset();
            }

            let outcome = self.poll_once(&mut source).await;
            debug!("poll outcome for {}: {:?}", self.device_id(), outcome);

            self.set_phase(BridgePhase::Sleeping);
            if !self.pause(self.settings.poll_interval).await {
                break;
            }
        }
        source.disconnect().await;
        self.set_phase(BridgePhase::Idle);
        info!("telemetry bridge for {} stopped", self.device_id());
    }

    /// Sleeps `total` in ticks; false as soon as stop was requested.
    async fn pause(&self, total: Duration) -> bool {
        pause_while(total, self.settings.tick, || self.is_running()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CATALOG;
    use crate::testing::{snapshot, LoopbackLink, ScriptedSource};
    use crate::telemetry::Snapshot;

    fn healthy() -> Snapshot {
        snapshot(&[("battery.charge", "100"), ("ups.status", "OL"), ("ups.load", "20")])
    }

    fn bridge(bus: &Arc<BusClient>) -> Arc<TelemetryBridge> {
        let mut settings = BridgeSettings::new(DeviceInfo::new("apc_ups", "Test UPS"));
        settings.poll_interval = Duration::from_millis(20);
        settings.retry_min = Duration::from_millis(5);
        settings.retry_max = Duration::from_millis(20);
        settings.tick = Duration::from_millis(5);
        TelemetryBridge::new(Arc::clone(bus), settings)
    }

    async fn connected_source(source: ScriptedSource) -> ScriptedSource {
        let mut source = source;
        source.connect().await.unwrap();
        source
    }

    #[tokio::test]
    async fn test_first_poll_publishes_discovery_then_state() {
        let bus = BusClient::new("test");
        let link = LoopbackLink::attach(&bus);
        let bridge = bridge(&bus);
        let mut source = connected_source(ScriptedSource::new(healthy())).await;

        let outcome = bridge.poll_once(&mut source).await;
        assert!(matches!(
            outcome,
            PollOutcome::Published { messages: 5, failed: 0, discovery: true }
        ));
        let sent = link.sent();
        assert_eq!(sent.len(), CATALOG.len() + 5);
        assert!(sent[..CATALOG.len()].iter().all(|m| m.retain && m.topic.ends_with("/config")));
        assert!(sent[CATALOG.len()..].iter().all(|m| !m.retain && m.topic.ends_with("/state")));
        assert_eq!(
            link.sent_to("homeassistant/sensor/apc_ups/load_watts/state")[0].payload,
            "120"
        );
        assert!(bridge.last_poll_time().is_some());
        assert!(bridge.discovery_published());

        link.clear_sent();
        bridge.poll_once(&mut source).await;
        assert_eq!(link.sent().len(), 5);
    }

    #[tokio::test]
    async fn test_empty_and_incomplete_snapshots_publish_nothing() {
        let bus = BusClient::new("test");
        let link = LoopbackLink::attach(&bus);
        let bridge = bridge(&bus);
        let source = ScriptedSource::new(healthy())
            .then(Ok(Snapshot::new()))
            .then(Ok(snapshot(&[("battery.charge", "90")])));
        let mut source = connected_source(source).await;

        assert!(matches!(bridge.poll_once(&mut source).await, PollOutcome::Empty));
        match bridge.poll_once(&mut source).await {
            PollOutcome::Incomplete(missing) => assert_eq!(missing, vec!["ups_status"]),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(link.sent().is_empty());
        assert!(bridge.last_poll_time().is_none());
    }

    #[tokio::test]
    async fn test_source_failure_disconnects_source() {
        let bus = BusClient::new("test");
        let _link = LoopbackLink::attach(&bus);
        let bridge = bridge(&bus);
        let source = ScriptedSource::new(healthy()).then(Err(SourceError::Protocol("boom".into())));
        let mut source = connected_source(source).await;

        assert!(matches!(bridge.poll_once(&mut source).await, PollOutcome::SourceFailed(_)));
        assert!(!source.is_connected());
    }

    #[tokio::test]
    async fn test_rejected_state_messages_keep_last_poll_time() {
        let bus = BusClient::new("test");
        let link = LoopbackLink::attach(&bus);
        let bridge = bridge(&bus);
        let mut source = connected_source(ScriptedSource::new(healthy())).await;

        assert!(matches!(
            bridge.poll_once(&mut source).await,
            PollOutcome::Published { failed: 0, discovery: true, .. }
        ));
        let first_poll = bridge.last_poll_time();
        assert!(first_poll.is_some());

        link.clear_sent();
        link.reject_publishes(true);
        match bridge.poll_once(&mut source).await {
            PollOutcome::Published { messages, failed, discovery } => {
                assert_eq!(messages, 5);
                assert_eq!(failed, 5);
                assert!(!discovery);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(bridge.last_poll_time(), first_poll);
        assert!(link.sent().is_empty());
        assert!(bridge.discovery_published());

        link.reject_publishes(false);
        assert!(matches!(
            bridge.poll_once(&mut source).await,
            PollOutcome::Published { failed: 0, discovery: false, .. }
        ));
        assert_eq!(link.sent().len(), 5);
    }

    #[tokio::test]
    async fn test_charge_above_hundred_is_published() {
        let bus = BusClient::new("test");
        let link = LoopbackLink::attach(&bus);
        let bridge = bridge(&bus);
        let charging = snapshot(&[("battery.charge", "101"), ("ups.status", "OL CHRG")]);
        let mut source = connected_source(ScriptedSource::new(charging)).await;

        assert!(matches!(
            bridge.poll_once(&mut source).await,
            PollOutcome::Published { messages: 3, failed: 0, .. }
        ));
        assert_eq!(
            link.sent_to("homeassistant/sensor/apc_ups/battery_charge/state")[0].payload,
            "101"
        );
    }

    #[tokio::test]
    async fn test_discovery_is_republished_after_reconnect() {
        let bus = BusClient::new("test");
        let first = LoopbackLink::attach(&bus);
        let bridge = bridge(&bus);
        let mut source = connected_source(ScriptedSource::new(healthy())).await;

        bridge.poll_once(&mut source).await;
        assert!(first.retained("homeassistant/sensor/apc_ups/battery_charge/config").is_some());

        bus.connection_lost("test drop");
        match bridge.poll_once(&mut source).await {
            PollOutcome::Published { failed, discovery, .. } => {
                assert_eq!(failed, 5);
                assert!(!discovery);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(!bridge.discovery_published());

        let second = LoopbackLink::attach(&bus);
        assert!(matches!(
            bridge.poll_once(&mut source).await,
            PollOutcome::Published { discovery: true, failed: 0, .. }
        ));
        assert!(second.retained("homeassistant/sensor/apc_ups/battery_charge/config").is_some());
    }

    #[test]
    fn test_republish_while_disconnected_always_fails() {
        let bus = BusClient::new("test");
        let bridge = bridge(&bus);
        for _ in 0..5 {
            assert!(!bridge.republish_discovery());
        }
        assert!(!bridge.discovery_published());
    }

    #[test]
    fn test_status_online_triggers_republish() {
        let bus = BusClient::new("test");
        let link = LoopbackLink::attach(&bus);
        let bridge = bridge(&bus);
        bridge.setup_subscriptions().unwrap();
        bridge.setup_subscriptions().unwrap();
        assert_eq!(link.subscriptions(), vec![DEFAULT_STATUS_TOPIC.to_string()]);

        link.inject(DEFAULT_STATUS_TOPIC, "offline");
        assert!(link.sent().is_empty());

        link.inject(DEFAULT_STATUS_TOPIC, "online");
        assert_eq!(link.sent().len(), CATALOG.len());
        assert!(bridge.discovery_published());
    }

    #[test]
    fn test_remove_device_clears_discovery() {
        let bus = BusClient::new("test");
        let link = LoopbackLink::attach(&bus);
        let bridge = bridge(&bus);
        assert!(bridge.republish_discovery());
        bridge.remove_device().unwrap();
        assert!(!bridge.discovery_published());
        assert!(link.retained("homeassistant/sensor/apc_ups/ups_status/config").is_none());
    }

    #[tokio::test]
    async fn test_loop_retries_connect_then_polls_until_stopped() {
        let bus = BusClient::new("test");
        let link = LoopbackLink::attach(&bus);
        let bridge = bridge(&bus);
        let source = ScriptedSource::new(healthy()).failing_connects(2);
        let counters = source.counters();

        assert!(bridge.start(source));
        assert!(!bridge.start(ScriptedSource::new(healthy())));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while counters.fetches.load(Ordering::SeqCst) < 2 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        bridge.stop().await;

        assert_eq!(counters.connects.load(Ordering::SeqCst), 3);
        assert!(counters.fetches.load(Ordering::SeqCst) >= 2);
        assert_eq!(counters.disconnects.load(Ordering::SeqCst), 1);
        assert!(!bridge.is_running());
        assert_eq!(bridge.phase(), BridgePhase::Idle);
        assert!(bridge.last_poll_time().is_some());
        assert!(!link.sent_to("homeassistant/sensor/apc_ups/ups_status/state").is_empty());
    }
}
