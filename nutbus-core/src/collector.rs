/**
 * METRICS COLLECTOR - Merge published fields, store a row per device
 *
 * ROLE:
 * Listens to per-field state topics, rebuilds one record per device and
 * hands complete records to a metrics sink at most once per save interval.
 *
 * HOW IT WORKS:
 * - One shared handler is bound to `<ns>/sensor/<device>/+/state` per
 *   registered device; a topic matching several patterns is merged once
 *   per delivery (merges are idempotent)
 * - Devices outside the registry are collected too, up to a cap; the
 *   least recently updated one is evicted first
 * - A periodic check snapshots due records, releases the locks, then
 *   writes; a flush gate keeps writes from overlapping
 * - A failed or timed out write leaves the last-save time untouched so the
 *   next check retries
 * - Lock order: records, then last_saves
 */

use crate::backoff::pause_while;
use crate::error::{BusError, SinkError};
use crate::mqtt::{BusClient, QoS};
use crate::record::{DeviceRecord, Field, MergeOutcome};
use crate::registry::{DeviceEntry, DeviceRegistry};
use crate::storage::{MetricsRow, MetricsSink};
use crate::topics::{self, Handler};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub namespace: String,
    pub save_interval: Duration,
    pub check_interval: Duration,
    pub tick: Duration,
    pub flush_timeout: Duration,
    pub max_unknown_devices: usize,
    pub qos: QoS,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            namespace: crate::discovery::DEFAULT_NAMESPACE.to_string(),
            save_interval: Duration::from_secs(3600),
            check_interval: Duration::from_secs(60),
            tick: Duration::from_secs(1),
            flush_timeout: Duration::from_secs(30),
            max_unknown_devices: 32,
            qos: QoS::AtLeastOnce,
        }
    }
}

struct Slot {
    record: DeviceRecord,
    first_seen: OffsetDateTime,
    /// Update sequence number, for eviction order.
    touched: u64,
    known: bool,
}

/// Storage keys grouped by what a flush did with them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub saved: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.saved.is_empty() && self.skipped.is_empty() && self.failed.is_empty()
    }
}

enum FlushResult {
    Saved,
    Skipped,
    Failed,
}

pub struct Collector {
    bus: Arc<BusClient>,
    registry: Arc<DeviceRegistry>,
    sink: Arc<dyn MetricsSink>,
    settings: CollectorSettings,
    records: Mutex<HashMap<String, Slot>>,
    last_saves: Mutex<HashMap<String, OffsetDateTime>>,
    last_save: Mutex<Option<OffsetDateTime>>,
    flush_gate: tokio::sync::Mutex<()>,
    sequence: AtomicU64,
    running: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Collector {
    pub fn new(
        bus: Arc<BusClient>,
        registry: Arc<DeviceRegistry>,
        sink: Arc<dyn MetricsSink>,
        mut settings: CollectorSettings,
    ) -> Arc<Self> {
        settings.max_unknown_devices = settings.max_unknown_devices.max(1);
        Arc::new(Self {
            bus,
            registry,
            sink,
            settings,
            records: Mutex::new(HashMap::new()),
            last_saves: Mutex::new(HashMap::new()),
            last_save: Mutex::new(None),
            flush_gate: tokio::sync::Mutex::new(()),
            sequence: AtomicU64::new(0),
            running: AtomicBool::new(false),
            worker: Mutex::new(None),
        })
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn device_count(&self) -> usize {
        self.records.lock().len()
    }

    /// Most recent successful write, any device.
    pub fn last_save_time(&self) -> Option<OffsetDateTime> {
        *self.last_save.lock()
    }

    pub fn last_save_for(&self, storage_key: &str) -> Option<OffsetDateTime> {
        self.last_saves.lock().get(storage_key).copied()
    }

    pub fn record(&self, storage_key: &str) -> Option<DeviceRecord> {
        self.records.lock().get(storage_key).map(|slot| slot.record.clone())
    }

    pub fn first_seen(&self, storage_key: &str) -> Option<OffsetDateTime> {
        self.records.lock().get(storage_key).map(|slot| slot.first_seen)
    }

    fn subscription_patterns(&self) -> Vec<String> {
        self.registry
            .device_ids()
            .iter()
            .map(|id| topics::device_state_pattern(&self.settings.namespace, id))
            .collect()
    }

    /// Subscribes every registered device not yet subscribed. Returns how
    /// many subscriptions were added; the first failure is reported after
    /// the remaining devices were tried.
    pub fn setup_subscriptions(self: &Arc<Self>) -> Result<usize, BusError> {
        let collector = Arc::downgrade(self);
        let handler: Handler = Arc::new(move |topic: &str, payload: &str| {
            if let Some(collector) = collector.upgrade() {
                collector.handle_update(topic, payload);
            }
            Ok(())
        });

        let mut added = 0;
        let mut first_error = None;
        for pattern in self.subscription_patterns() {
            if self.bus.is_subscribed(&pattern) {
                continue;
            }
            match self.bus.subscribe_handler(&pattern, self.settings.qos, Arc::clone(&handler)) {
                Ok(()) => added += 1,
                Err(e) => {
                    warn!("cannot subscribe to {}: {}", pattern, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                if added > 0 {
                    info!("collector subscribed to {} device topics", added);
                }
                Ok(added)
            }
        }
    }

    /// Registers a device at runtime and subscribes to its topics.
    pub fn add_device(self: &Arc<Self>, entry: DeviceEntry) -> Result<(), BusError> {
        let device_id = entry.device_id.clone();
        if self.registry.register(entry) {
            info!("device {} added to collector", device_id);
        }
        self.setup_subscriptions().map(|_| ())
    }

    /// Merges one state message. Returns true when a value was applied;
    /// malformed topics, unknown fields and unparsable values are dropped.
    pub fn handle_update(&self, topic: &str, payload: &str) -> bool {
        let Some((device_id, field)) = topics::parse_state_topic(topic) else {
            debug!("ignoring message on {}", topic);
            return false;
        };
        if Field::lookup(field).is_none() {
            debug!("ignoring unknown field {} from {}", field, device_id);
            return false;
        }

        let key = self.registry.storage_key(device_id);
        let known = self.registry.is_known(device_id);
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);

        let outcome = {
            let mut records = self.records.lock();
            if !known && !records.contains_key(&key) {
                self.make_room(&mut records);
            }
            let slot = records.entry(key.clone()).or_insert_with(|| {
                info!("new device detected: {} (stored as {})", device_id, key);
                Slot {
                    record: DeviceRecord::new(device_id),
                    first_seen: OffsetDateTime::now_utc(),
                    touched: sequence,
                    known,
                }
            });
            let outcome = slot.record.merge(field, payload);
            if let MergeOutcome::Applied(_) = outcome {
                slot.touched = sequence;
            }
            outcome
        };

        match outcome {
            MergeOutcome::Applied(field) => {
                debug!("{}: {} = {}", key, field.name(), payload.trim());
                true
            }
            MergeOutcome::Unparsable(field) => {
                debug!("{}: unparsable value {:?} for {}", key, payload, field.name());
                false
            }
            MergeOutcome::UnknownField => false,
        }
    }

    fn make_room(&self, records: &mut HashMap<String, Slot>) {
        let unknown = records.values().filter(|slot| !slot.known).count();
        if unknown < self.settings.max_unknown_devices {
            return;
        }
        let oldest = records
            .iter()
            .filter(|(_, slot)| !slot.known)
            .min_by_key(|(_, slot)| slot.touched)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            records.remove(&key);
            self.last_saves.lock().remove(&key);
            warn!(
                "more than {} unregistered devices, dropped {}",
                self.settings.max_unknown_devices, key
            );
        }
    }

    /// Writes every record whose last save is older than the save interval
    /// (or that was never saved).
    pub async fn flush_due(&self, now: OffsetDateTime) -> FlushReport {
        let _gate = self.flush_gate.lock().await;
        let interval = time::Duration::try_from(self.settings.save_interval).unwrap_or(time::Duration::MAX);
        let due: Vec<(String, DeviceRecord)> = {
            let records = self.records.lock();
            let saves = self.last_saves.lock();
            records
                .iter()
                .filter(|(key, _)| match saves.get(key.as_str()) {
                    Some(saved) => now - *saved >= interval,
                    None => true,
                })
                .map(|(key, slot)| (key.clone(), slot.record.clone()))
                .collect()
        };
        self.write(due, now).await
    }

    /// Writes every non-empty record regardless of its last save.
    pub async fn flush_all(&self) -> FlushReport {
        let _gate = self.flush_gate.lock().await;
        let all: Vec<(String, DeviceRecord)> = self
            .records
            .lock()
            .iter()
            .filter(|(_, slot)| !slot.record.is_empty())
            .map(|(key, slot)| (key.clone(), slot.record.clone()))
            .collect();
        self.write(all, OffsetDateTime::now_utc()).await
    }

    async fn write(&self, batch: Vec<(String, DeviceRecord)>, now: OffsetDateTime) -> FlushReport {
        let mut report = FlushReport::default();
        for (key, record) in batch {
            match self.write_one(&key, record, now).await {
                FlushResult::Saved => report.saved.push(key),
                FlushResult::Skipped => report.skipped.push(key),
                FlushResult::Failed => report.failed.push(key),
            }
        }
        report
    }

    async fn write_one(&self, key: &str, record: DeviceRecord, now: OffsetDateTime) -> FlushResult {
        if !record.is_complete() {
            warn!(
                "{}: incomplete record (missing {}), not stored",
                key,
                record.missing_required().join(", ")
            );
            return FlushResult::Skipped;
        }

        let row = MetricsRow::from_record(key, &record);
        let sink = Arc::clone(&self.sink);
        let limit = self.settings.flush_timeout;
        let call = tokio::task::spawn_blocking(move || sink.insert(&row));
        let result = match tokio::time::timeout(limit, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(SinkError::Task(join.to_string())),
            Err(_) => Err(SinkError::Timeout(limit)),
        };

        match result {
            Ok(()) => {
                self.last_saves.lock().insert(key.to_string(), now);
                *self.last_save.lock() = Some(now);
                info!("{}: metrics stored ({} fields)", key, record.len());
                FlushResult::Saved
            }
            Err(e) => {
                warn!("{}: storage write failed, will retry: {}", key, e);
                FlushResult::Failed
            }
        }
    }

    /// Spawns the periodic save check. Returns false if already running.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("collector already running");
            return false;
        }
        info!(
            "starting collector (save every {:?}, check every {:?}, sink {})",
            self.settings.save_interval,
            self.settings.check_interval,
            self.sink.describe()
        );
        let task = tokio::spawn(Arc::clone(self).run());
        *self.worker.lock() = Some(task);
        true
    }

    /// Stops the check loop and writes every pending record once.
    pub async fn stop(&self) -> FlushReport {
        self.running.store(false, Ordering::SeqCst);
        let task = self.worker.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("collector task ended abnormally: {}", e);
            }
        }
        let report = self.flush_all().await;
        info!(
            "collector stopped ({} stored, {} incomplete, {} failed)",
            report.saved.len(),
            report.skipped.len(),
            report.failed.len()
        );
        report
    }

    async fn run(self: Arc<Self>) {
        while self.is_running() {
            let report = self.flush_due(OffsetDateTime::now_utc()).await;
            if !report.is_empty() {
                debug!("save check: {:?}", report);
            }
            if !self.pause(self.settings.check_interval).await {
                break;
            }
        }
    }

    async fn pause(&self, total: Duration) -> bool {
        pause_while(total, self.settings.tick, || self.is_running()).await
    }

    #[cfg(test)]
    pub(crate) fn set_last_save(&self, storage_key: &str, at: OffsetDateTime) {
        self.last_saves.lock().insert(storage_key.to_string(), at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{LoopbackLink, MemorySink};
    use serde_json::json;

    const NS: &str = "homeassistant";

    fn state(device: &str, field: &str) -> String {
        topics::state_topic(NS, device, field)
    }

    fn collector(registry: DeviceRegistry, sink: &Arc<MemorySink>) -> (Arc<Collector>, Arc<LoopbackLink>) {
        let bus = BusClient::new("collector-test");
        let link = LoopbackLink::attach(&bus);
        let settings = CollectorSettings {
            check_interval: Duration::from_secs(3600),
            tick: Duration::from_millis(5),
            max_unknown_devices: 2,
            ..CollectorSettings::default()
        };
        let collector = Collector::new(bus, Arc::new(registry), sink.clone(), settings);
        (collector, link)
    }

    fn complete(link: &LoopbackLink, device: &str) {
        link.inject(&state(device, "battery_charge"), "100");
        link.inject(&state(device, "ups_status"), "OL");
    }

    #[tokio::test]
    async fn test_two_fields_make_one_row() {
        let sink = Arc::new(MemorySink::new());
        let (collector, link) = collector(DeviceRegistry::from_entries([DeviceEntry::new("X")]), &sink);
        assert_eq!(collector.setup_subscriptions().unwrap(), 1);

        link.inject(&state("X", "battery.charge"), "100");
        link.inject(&state("X", "ups.status"), "OL");

        let report = collector.flush_due(OffsetDateTime::now_utc()).await;
        assert_eq!(report.saved, vec!["X".to_string()]);
        assert_eq!(sink.attempts(), 1);
        let rows = sink.rows();
        assert_eq!(rows[0].fields.len(), 2);
        assert_eq!(rows[0].get("battery_charge"), Some(&json!(100.0)));
        assert_eq!(rows[0].get("ups_status"), Some(&json!("OL")));
    }

    #[tokio::test]
    async fn test_only_due_devices_are_written() {
        let sink = Arc::new(MemorySink::new());
        let registry = DeviceRegistry::from_entries([DeviceEntry::new("d1"), DeviceEntry::new("d2")]);
        let (collector, link) = collector(registry, &sink);
        collector.setup_subscriptions().unwrap();
        complete(&link, "d1");
        complete(&link, "d2");

        let now = OffsetDateTime::now_utc();
        collector.set_last_save("d2", now - time::Duration::seconds(10));
        let report = collector.flush_due(now).await;
        assert_eq!(report.saved, vec!["d1".to_string()]);
        assert_eq!(sink.rows_for("d2").len(), 0);
        assert_eq!(collector.last_save_for("d1"), Some(now));

        // nothing is due again until the interval elapses
        assert!(collector.flush_due(now).await.is_empty());
        let later = now + time::Duration::hours(1);
        let report = collector.flush_due(later).await;
        assert_eq!(report.saved.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_write_is_retried() {
        let sink = Arc::new(MemorySink::new());
        let (collector, link) = collector(DeviceRegistry::from_entries([DeviceEntry::new("ups")]), &sink);
        collector.setup_subscriptions().unwrap();
        complete(&link, "ups");

        sink.fail_next(1);
        let now = OffsetDateTime::now_utc();
        let report = collector.flush_due(now).await;
        assert_eq!(report.failed, vec!["ups".to_string()]);
        assert_eq!(collector.last_save_for("ups"), None);
        assert!(collector.last_save_time().is_none());

        let report = collector.flush_due(now).await;
        assert_eq!(report.saved, vec!["ups".to_string()]);
        assert_eq!(sink.attempts(), 2);
        assert_eq!(sink.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_incomplete_record_is_not_stored() {
        let sink = Arc::new(MemorySink::new());
        let (collector, link) = collector(DeviceRegistry::from_entries([DeviceEntry::new("ups")]), &sink);
        collector.setup_subscriptions().unwrap();
        link.inject(&state("ups", "battery_charge"), "100");

        let report = collector.flush_due(OffsetDateTime::now_utc()).await;
        assert_eq!(report.skipped, vec!["ups".to_string()]);
        assert_eq!(sink.attempts(), 0);

        // charge is only required to be present, not within 0..=100
        link.inject(&state("ups", "ups_status"), "OL");
        link.inject(&state("ups", "battery_charge"), "150");
        let report = collector.flush_due(OffsetDateTime::now_utc()).await;
        assert_eq!(report.saved, vec!["ups".to_string()]);
        assert_eq!(sink.rows_for("ups")[0].get("battery_charge"), Some(&json!(150.0)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_survive_periodic_flushes() {
        use crate::record::FieldValue;

        const ROUNDS: u32 = 300;
        let sink = Arc::new(MemorySink::new());
        let registry = DeviceRegistry::from_entries([DeviceEntry::new("d1"), DeviceEntry::new("d2")]);
        let (collector, _link) = collector(registry, &sink);

        // one task per (device, field): the last value of each field is known
        let mut writers = Vec::new();
        for device in ["d1", "d2"] {
            for field in ["battery_charge", "input_voltage", "battery_runtime"] {
                let collector = Arc::clone(&collector);
                writers.push(tokio::spawn(async move {
                    for i in 1..=ROUNDS {
                        collector.handle_update(&state(device, field), &i.to_string());
                        if i % 16 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                }));
            }
            let collector = Arc::clone(&collector);
            writers.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(2)).await;
                for i in 0..ROUNDS {
                    let status = if i % 2 == 0 { "OB" } else { "OL" };
                    collector.handle_update(&state(device, "ups_status"), status);
                    if i % 16 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            }));
        }

        let done = Arc::new(AtomicBool::new(false));
        let flusher = {
            let collector = Arc::clone(&collector);
            let done = Arc::clone(&done);
            tokio::spawn(async move {
                let start = OffsetDateTime::now_utc();
                let mut flushes = 0i64;
                while !done.load(Ordering::SeqCst) {
                    flushes += 1;
                    // every record is due on every pass
                    collector.flush_due(start + time::Duration::hours(flushes)).await;
                    tokio::task::yield_now().await;
                }
                flushes
            })
        };

        for writer in writers {
            writer.await.unwrap();
        }
        done.store(true, Ordering::SeqCst);
        assert!(flusher.await.unwrap() > 0);

        for device in ["d1", "d2"] {
            let record = collector.record(device).unwrap();
            assert_eq!(record.len(), 4);
            assert_eq!(record.battery_charge(), Some(ROUNDS as f64));
            assert_eq!(record.float(Field::InputVoltage), Some(ROUNDS as f64));
            assert_eq!(record.get(Field::BatteryRuntime), Some(&FieldValue::Int(ROUNDS as i64)));
            assert_eq!(record.ups_status(), Some("OL"));
        }

        for row in sink.rows() {
            assert!(row.get("ups_status").is_some(), "incomplete row stored: {row:?}");
            assert!(row.get("battery_charge").is_some(), "incomplete row stored: {row:?}");
        }

        let report = collector.flush_all().await;
        assert_eq!(report.saved.len(), 2);
        for device in ["d1", "d2"] {
            let rows = sink.rows_for(device);
            let last = rows.last().unwrap();
            assert_eq!(last.get("battery_charge"), Some(&json!(ROUNDS as f64)));
            assert_eq!(last.get("battery_runtime"), Some(&json!(ROUNDS)));
            assert_eq!(last.get("ups_status"), Some(&json!("OL")));
        }
    }

    #[test]
    fn test_registry_maps_storage_key() {
        let sink = Arc::new(MemorySink::new());
        let registry = DeviceRegistry::from_entries([DeviceEntry::new("apc_ups").with_storage_key("rack_a")]);
        let (collector, link) = collector(registry, &sink);
        collector.setup_subscriptions().unwrap();
        complete(&link, "apc_ups");

        assert_eq!(collector.device_count(), 1);
        let record = collector.record("rack_a").unwrap();
        assert_eq!(record.device_id(), "apc_ups");
        assert!(record.is_complete());
        assert!(collector.first_seen("rack_a").is_some());
    }

    #[test]
    fn test_unknown_devices_are_capped() {
        let sink = Arc::new(MemorySink::new());
        let (collector, _link) = collector(DeviceRegistry::from_entries([DeviceEntry::new("d1")]), &sink);

        assert!(collector.handle_update(&state("d1", "battery_charge"), "50"));
        assert!(collector.handle_update(&state("u1", "battery_charge"), "50"));
        assert!(collector.handle_update(&state("u2", "battery_charge"), "50"));
        assert!(collector.handle_update(&state("u1", "ups_status"), "OL"));
        assert!(collector.handle_update(&state("u3", "battery_charge"), "50"));

        assert_eq!(collector.device_count(), 3);
        assert!(collector.record("d1").is_some());
        assert!(collector.record("u1").is_some());
        assert!(collector.record("u2").is_none());
        assert!(collector.record("u3").is_some());
    }

    #[test]
    fn test_malformed_and_unknown_messages_are_ignored() {
        let sink = Arc::new(MemorySink::new());
        let (collector, _link) = collector(DeviceRegistry::new(), &sink);

        assert!(!collector.handle_update("homeassistant/sensor/x/state", "1"));
        assert!(!collector.handle_update("homeassistant/sensor/x/battery_charge/config", "1"));
        assert!(!collector.handle_update(&state("x", "fan_speed"), "3"));
        assert_eq!(collector.device_count(), 0);

        assert!(!collector.handle_update(&state("x", "battery_charge"), "n/a"));
        assert_eq!(collector.record("x").map(|r| r.len()), Some(0));
    }

    #[test]
    fn test_setup_subscriptions_is_idempotent_and_grows() {
        let sink = Arc::new(MemorySink::new());
        let (collector, link) = collector(DeviceRegistry::from_entries([DeviceEntry::new("a")]), &sink);
        assert_eq!(collector.setup_subscriptions().unwrap(), 1);
        assert_eq!(collector.setup_subscriptions().unwrap(), 0);

        collector.add_device(DeviceEntry::new("b")).unwrap();
        assert_eq!(
            link.subscriptions(),
            vec![
                "homeassistant/sensor/a/+/state".to_string(),
                "homeassistant/sensor/b/+/state".to_string()
            ]
        );
    }

    #[test]
    fn test_setup_while_disconnected_fails_without_registering() {
        let sink = Arc::new(MemorySink::new());
        let bus = BusClient::new("offline");
        let collector = Collector::new(
            bus.clone(),
            Arc::new(DeviceRegistry::from_entries([DeviceEntry::new("a")])),
            sink,
            CollectorSettings::default(),
        );
        assert!(matches!(collector.setup_subscriptions(), Err(BusError::NotConnected)));
        assert!(bus.subscribed_patterns().is_empty());

        LoopbackLink::attach(&bus);
        assert_eq!(collector.setup_subscriptions().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stop_flushes_pending_records() {
        let sink = Arc::new(MemorySink::new());
        let (collector, link) = collector(DeviceRegistry::from_entries([DeviceEntry::new("ups")]), &sink);
        collector.setup_subscriptions().unwrap();
        assert!(collector.start());
        assert!(!collector.start());
        tokio::time::sleep(Duration::from_millis(30)).await;

        complete(&link, "ups");
        let report = collector.stop().await;
        assert_eq!(report.saved, vec!["ups".to_string()]);
        assert!(!collector.is_running());
        assert!(collector.last_save_time().is_some());
        assert_eq!(sink.rows_for("ups").len(), 1);
    }
}
