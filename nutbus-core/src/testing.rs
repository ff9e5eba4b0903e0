/*!
In-process doubles for tests: a loopback bus link, a memory sink and a
scripted telemetry source.

The loopback link behaves like a tiny broker for a single client: it
records every request, keeps retained messages, delivers publishes back to
the client when a subscription matches, and replays retained messages on
subscribe before returning.
*/

use crate::error::{BusError, SinkError, SourceError};
use crate::mqtt::{BusClient, BusLink, QoS};
use crate::storage::{MetricsRow, MetricsSink};
use crate::telemetry::{Snapshot, TelemetrySource};
use crate::topics::topic_matches;
use parking_lot::Mutex;
use rumqttc::{ClientError, Publish, Request};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

pub struct LoopbackLink {
    bus: Weak<BusClient>,
    subscriptions: Mutex<Vec<String>>,
    retained: Mutex<BTreeMap<String, String>>,
    sent: Mutex<Vec<SentMessage>>,
    reject_publish: AtomicBool,
}

impl LoopbackLink {
    pub fn new(bus: &Arc<BusClient>) -> Arc<Self> {
        Arc::new(Self {
            bus: Arc::downgrade(bus),
            subscriptions: Mutex::new(Vec::new()),
            retained: Mutex::new(BTreeMap::new()),
            sent: Mutex::new(Vec::new()),
            reject_publish: AtomicBool::new(false),
        })
    }

    /// Creates a link and installs it on `bus`, which becomes connected.
    pub fn attach(bus: &Arc<BusClient>) -> Arc<Self> {
        let link = Self::new(bus);
        bus.attach_link(link.clone());
        link
    }

    /// Stores a retained message as if another client had published it.
    pub fn seed_retained(&self, topic: &str, payload: &str) {
        self.retained.lock().insert(topic.to_string(), payload.to_string());
    }

    /// Delivers a message from "another client" to matching subscriptions.
    pub fn inject(&self, topic: &str, payload: &str) -> usize {
        self.deliver(topic, payload)
    }

    /// Makes every following publish fail as if the client queue were full.
    pub fn reject_publishes(&self, reject: bool) {
        self.reject_publish.store(reject, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, topic: &str) -> Vec<SentMessage> {
        self.sent.lock().iter().filter(|m| m.topic == topic).cloned().collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    pub fn retained(&self, topic: &str) -> Option<String> {
        self.retained.lock().get(topic).cloned()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    fn deliver(&self, topic: &str, payload: &str) -> usize {
        let subscribed = self
            .subscriptions
            .lock()
            .iter()
            .any(|pattern| topic_matches(topic, pattern));
        if !subscribed {
            return 0;
        }
        match self.bus.upgrade() {
            Some(bus) => bus.dispatch(topic, payload.as_bytes()),
            None => 0,
        }
    }
}

impl BusLink for LoopbackLink {
    fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Vec<u8>) -> Result<(), BusError> {
        if self.reject_publish.load(Ordering::SeqCst) {
            // same error a full rumqttc request queue gives back from try_publish
            let request = Request::Publish(Publish::new(topic, qos, payload));
            return Err(BusError::Client(ClientError::TryRequest(request)));
        }
        let payload = String::from_utf8_lossy(&payload).into_owned();
        self.sent.lock().push(SentMessage {
            topic: topic.to_string(),
            payload: payload.clone(),
            qos,
            retain,
        });
        if retain {
            let mut retained = self.retained.lock();
            if payload.is_empty() {
                retained.remove(topic);
            } else {
                retained.insert(topic.to_string(), payload.clone());
            }
        }
        self.deliver(topic, &payload);
        Ok(())
    }

    fn subscribe(&self, pattern: &str, _qos: QoS) -> Result<(), BusError> {
        {
            let mut subscriptions = self.subscriptions.lock();
            if !subscriptions.iter().any(|p| p == pattern) {
                subscriptions.push(pattern.to_string());
            }
        }
        let replay: Vec<(String, String)> = self
            .retained
            .lock()
            .iter()
            .filter(|(topic, _)| topic_matches(topic, pattern))
            .map(|(topic, payload)| (topic.clone(), payload.clone()))
            .collect();
        if let Some(bus) = self.bus.upgrade() {
            for (topic, payload) in replay {
                bus.dispatch(&topic, payload.as_bytes());
            }
        }
        Ok(())
    }

    fn unsubscribe(&self, pattern: &str) -> Result<(), BusError> {
        self.subscriptions.lock().retain(|p| p != pattern);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), BusError> {
        self.subscriptions.lock().clear();
        Ok(())
    }
}

/// Sink that keeps rows in memory and can be told to fail.
#[derive(Default)]
pub struct MemorySink {
    rows: Mutex<Vec<MetricsRow>>,
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` inserts fail.
    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn rows(&self) -> Vec<MetricsRow> {
        self.rows.lock().clone()
    }

    pub fn rows_for(&self, storage_key: &str) -> Vec<MetricsRow> {
        self.rows
            .lock()
            .iter()
            .filter(|row| row.storage_key == storage_key)
            .cloned()
            .collect()
    }

    /// Insert calls seen, successful or not.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl MetricsSink for MemorySink {
    fn insert(&self, row: &MetricsRow) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SinkError::Rejected("simulated failure".into()));
        }
        self.rows.lock().push(row.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Counters shared with a [`ScriptedSource`] after it moved into a task.
#[derive(Debug, Default)]
pub struct SourceCounters {
    pub connects: AtomicU32,
    pub fetches: AtomicU32,
    pub disconnects: AtomicU32,
}

/// Telemetry source replaying a script of snapshots.
///
/// Connect attempts fail `connect_failures` times first. Each fetch pops
/// the next scripted result; when the script runs dry `fallback` is served.
pub struct ScriptedSource {
    connected: bool,
    connect_failures: u32,
    script: VecDeque<Result<Snapshot, SourceError>>,
    fallback: Snapshot,
    counters: Arc<SourceCounters>,
}

impl ScriptedSource {
    pub fn new(fallback: Snapshot) -> Self {
        Self {
            connected: false,
            connect_failures: 0,
            script: VecDeque::new(),
            fallback,
            counters: Arc::new(SourceCounters::default()),
        }
    }

    pub fn failing_connects(mut self, count: u32) -> Self {
        self.connect_failures = count;
        self
    }

    pub fn then(mut self, result: Result<Snapshot, SourceError>) -> Self {
        self.script.push_back(result);
        self
    }

    pub fn counters(&self) -> Arc<SourceCounters> {
        Arc::clone(&self.counters)
    }
}

/// Snapshot from `(variable, value)` pairs.
pub fn snapshot(pairs: &[(&str, &str)]) -> Snapshot {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

impl TelemetrySource for ScriptedSource {
    async fn connect(&mut self) -> Result<(), SourceError> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        if self.connect_failures > 0 {
            self.connect_failures -= 1;
            return Err(SourceError::Protocol("scripted connect failure".into()));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn fetch_all(&mut self) -> Result<Snapshot, SourceError> {
        self.counters.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.connected {
            return Err(SourceError::NotConnected);
        }
        let result = self.script.pop_front().unwrap_or_else(|| Ok(self.fallback.clone()));
        if result.is_err() {
            self.connected = false;
        }
        result
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}
