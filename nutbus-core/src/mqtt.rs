/**
 * BUS CLIENT - Non-blocking MQTT publish/subscribe core
 *
 * ROLE:
 * Owns the broker session, the connected flag and the topic router. Every
 * other component talks to the bus through this client and only observes
 * the connection state through accessors.
 *
 * HOW IT WORKS:
 * - connect() spawns the rumqttc event loop and waits (bounded) for CONNACK
 * - The event loop keeps polling after errors with 1s..64s backoff; each
 *   CONNACK bumps a connection epoch and re-issues registered subscriptions
 * - publish/subscribe/unsubscribe only hand requests to the client queue
 *   (try_* calls) and never wait for broker acknowledgment
 * - subscribe registers the handler BEFORE the network request so retained
 *   messages delivered right after SUBSCRIBE are not lost
 * - Calls made while disconnected fail fast with BusError::NotConnected
 *
 * LOCKS:
 * The connection state lock only guards a flag, the settings and an Arc to
 * the link. It is released before any request is handed to the link and
 * before any handler runs.
 */

use crate::backoff::Backoff;
use crate::error::BusError;
use crate::topics::{self, Handler, TopicRouter};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use rumqttc::QoS;

/// A message ready to be handed to the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

impl OutboundMessage {
    /// QoS 1, not retained.
    pub fn state(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtLeastOnce,
            retain: false,
        }
    }

    /// QoS 1, retained.
    pub fn retained(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            retain: true,
            ..Self::state(topic, payload)
        }
    }
}

/// Address, credentials and tuning needed to (re)establish a session.
#[derive(Debug, Clone)]
pub struct BusSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub keep_alive: Duration,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
    pub connect_timeout: Duration,
    /// Capacity of the outgoing request queue.
    pub capacity: usize,
}

impl BusSettings {
    pub fn new(client_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            client_id: client_id.into(),
            keep_alive: Duration::from_secs(60),
            reconnect_min: crate::backoff::DEFAULT_INITIAL,
            reconnect_max: crate::backoff::DEFAULT_MAX,
            connect_timeout: Duration::from_secs(10),
            capacity: 512,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn mqtt_options(&self) -> MqttOptions {
        // random suffix so a restart never collides with a lingering session
        let suffix = Uuid::new_v4().simple().to_string();
        let session_id = format!("{}-{}", self.client_id, &suffix[..8]);
        let mut options = MqttOptions::new(session_id, self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        if let Some(username) = self.username.as_deref().filter(|u| !u.is_empty()) {
            options.set_credentials(username, self.password.clone().unwrap_or_default());
        }
        options
    }
}

/// Request side of a broker session. Every call must return without
/// waiting on the network.
pub trait BusLink: Send + Sync {
    fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Vec<u8>) -> Result<(), BusError>;
    fn subscribe(&self, pattern: &str, qos: QoS) -> Result<(), BusError>;
    fn unsubscribe(&self, pattern: &str) -> Result<(), BusError>;
    fn disconnect(&self) -> Result<(), BusError>;
}

impl BusLink for AsyncClient {
    fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Vec<u8>) -> Result<(), BusError> {
        Ok(self.try_publish(topic, qos, retain, payload)?)
    }

    fn subscribe(&self, pattern: &str, qos: QoS) -> Result<(), BusError> {
        Ok(self.try_subscribe(pattern, qos)?)
    }

    fn unsubscribe(&self, pattern: &str) -> Result<(), BusError> {
        Ok(self.try_unsubscribe(pattern)?)
    }

    fn disconnect(&self) -> Result<(), BusError> {
        Ok(self.try_disconnect()?)
    }
}

/// Called after every successful handshake with the connection epoch.
pub type ConnectHook = Arc<dyn Fn(u64) + Send + Sync>;

/// Snapshot of client counters for the health report.
#[derive(Debug, Clone, Serialize)]
pub struct BusStats {
    pub connected: bool,
    pub broker: Option<String>,
    pub epoch: u64,
    pub reconnects: u32,
    pub published: u64,
    pub delivered: u64,
    pub subscriptions: usize,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct ConnectionState {
    connected: bool,
    settings: Option<BusSettings>,
    link: Option<Arc<dyn BusLink>>,
    epoch: u64,
    last_error: Option<String>,
}

pub struct BusClient {
    client_id: String,
    router: TopicRouter,
    subscriptions: Mutex<BTreeMap<String, QoS>>,
    state: Mutex<ConnectionState>,
    hooks: Mutex<Vec<ConnectHook>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
    stopping: AtomicBool,
    reconnects: AtomicU32,
    published: AtomicU64,
    delivered: AtomicU64,
}

impl BusClient {
    pub fn new(client_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            client_id: client_id.into(),
            router: TopicRouter::new(),
            subscriptions: Mutex::new(BTreeMap::new()),
            state: Mutex::new(ConnectionState::default()),
            hooks: Mutex::new(Vec::new()),
            event_task: Mutex::new(None),
            stopping: AtomicBool::new(false),
            reconnects: AtomicU32::new(0),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Opens a session and waits for the first CONNACK.
    ///
    /// On failure the event loop keeps retrying in the background, so the
    /// caller may log the error and carry on.
    pub async fn connect(self: &Arc<Self>, settings: BusSettings) -> Result<(), BusError> {
        if let Some(previous) = self.event_task.lock().take() {
            previous.abort();
        }

        let (client, eventloop) = AsyncClient::new(settings.mqtt_options(), settings.capacity);
        let address = settings.address();
        let timeout = settings.connect_timeout;
        let backoff = Backoff::new(settings.reconnect_min, settings.reconnect_max);
        {
            let mut state = self.state.lock();
            state.connected = false;
            state.link = Some(Arc::new(client));
            state.settings = Some(settings);
        }
        self.stopping.store(false, Ordering::SeqCst);

        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(Arc::clone(self).run_event_loop(eventloop, backoff, ready_tx));
        *self.event_task.lock() = Some(task);

        info!("connecting to MQTT broker {}", address);
        match tokio::time::timeout(timeout, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BusError::Closed),
            Err(_) => Err(BusError::Timeout(timeout)),
        }
    }

    /// Best-effort shutdown of the session. Errors are logged, not returned.
    pub async fn disconnect(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let link = {
            let mut state = self.state.lock();
            state.connected = false;
            state.link.take()
        };
        if let Some(link) = link {
            if let Err(e) = link.disconnect() {
                debug!("disconnect request not queued: {}", e);
            }
        }

        let task = self.event_task.lock().take();
        if let Some(mut task) = task {
            if tokio::time::timeout(Duration::from_secs(2), &mut task).await.is_err() {
                task.abort();
            }
        }
        info!("disconnected from MQTT broker");
    }

    /// Last known state; may lag the network by one round trip.
    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Incremented on every successful handshake. A change means the broker
    /// session (and its subscriptions) was re-created.
    pub fn connection_epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    pub fn broker_address(&self) -> Option<String> {
        self.state.lock().settings.as_ref().map(BusSettings::address)
    }

    pub fn stats(&self) -> BusStats {
        let (connected, broker, epoch, last_error) = {
            let state = self.state.lock();
            (
                state.connected,
                state.settings.as_ref().map(BusSettings::address),
                state.epoch,
                state.last_error.clone(),
            )
        };
        BusStats {
            connected,
            broker,
            epoch,
            reconnects: self.reconnects.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            subscriptions: self.router.len(),
            last_error,
        }
    }

    /// Registers `handler` for `pattern`, then requests the subscription.
    pub fn subscribe<F>(&self, pattern: &str, qos: QoS, handler: F) -> Result<(), BusError>
    where
        F: Fn(&str, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_handler(pattern, qos, Arc::new(handler))
    }

    /// Same as [`subscribe`](Self::subscribe) with an already shared handler,
    /// so one callback can be bound to many patterns.
    pub fn subscribe_handler(&self, pattern: &str, qos: QoS, handler: Handler) -> Result<(), BusError> {
        if !topics::is_valid_pattern(pattern) {
            return Err(BusError::InvalidTopic(pattern.to_string()));
        }
        let link = self.connected_link()?;

        // handler goes in first: the broker may deliver retained messages
        // before this function returns
        let previous = self.router.insert(pattern, handler);
        let previous_qos = self.subscriptions.lock().insert(pattern.to_string(), qos);

        if let Err(e) = link.subscribe(pattern, qos) {
            match (previous, previous_qos) {
                (Some(handler), Some(qos)) => {
                    self.router.insert(pattern, handler);
                    self.subscriptions.lock().insert(pattern.to_string(), qos);
                }
                _ => {
                    self.router.remove(pattern);
                    self.subscriptions.lock().remove(pattern);
                }
            }
            return Err(e);
        }
        debug!("subscribe requested for {}", pattern);
        Ok(())
    }

    /// Drops the handler and requests removal from the broker.
    pub fn unsubscribe(&self, pattern: &str) -> Result<(), BusError> {
        self.router.remove(pattern);
        self.subscriptions.lock().remove(pattern);
        let link = self.connected_link()?;
        link.unsubscribe(pattern)?;
        debug!("unsubscribe requested for {}", pattern);
        Ok(())
    }

    pub fn is_subscribed(&self, pattern: &str) -> bool {
        self.router.contains(pattern)
    }

    pub fn subscribed_patterns(&self) -> Vec<String> {
        self.router.patterns()
    }

    /// Hands the message to the transport. Success means "accepted for
    /// send", not delivered.
    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>, qos: QoS, retain: bool) -> Result<(), BusError> {
        if topic.is_empty() || topic.contains(['+', '#']) {
            return Err(BusError::InvalidTopic(topic.to_string()));
        }
        let link = self.connected_link()?;
        link.publish(topic, qos, retain, payload.into())?;
        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn publish_message(&self, message: &OutboundMessage) -> Result<(), BusError> {
        self.publish(&message.topic, message.payload.as_bytes(), message.qos, message.retain)
    }

    /// Publishes every message, continuing past individual failures.
    pub fn publish_batch(&self, messages: &[OutboundMessage]) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }
        let mut failed = 0;
        for message in messages {
            if let Err(e) = self.publish_message(message) {
                debug!("publish to {} failed: {}", message.topic, e);
                failed += 1;
            }
        }
        if failed == 0 {
            Ok(())
        } else {
            Err(BusError::Incomplete {
                failed,
                total: messages.len(),
            })
        }
    }

    /// Runs `hook` after every successful handshake, with no client lock held.
    pub fn on_connect<F>(&self, hook: F)
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.hooks.lock().push(Arc::new(hook));
    }

    /// Entry point for incoming messages: fans out to every matching handler.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> usize {
        let text = String::from_utf8_lossy(payload);
        let delivered = self.router.dispatch(topic, &text);
        self.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    /// Installs an already established link (in-process transports, tests)
    /// and runs the same bookkeeping as a broker CONNACK.
    pub fn attach_link(&self, link: Arc<dyn BusLink>) -> u64 {
        self.state.lock().link = Some(link);
        let epoch = self.mark_connected();
        self.after_connect(epoch);
        epoch
    }

    /// Connection-lost hook: flips the flag and logs the cause.
    pub fn connection_lost(&self, cause: &str) {
        let was_connected = {
            let mut state = self.state.lock();
            let was = state.connected;
            state.connected = false;
            state.last_error = Some(cause.to_string());
            was
        };
        if was_connected {
            warn!("MQTT connection lost: {}", cause);
        } else {
            debug!("MQTT still unavailable: {}", cause);
        }
    }

    fn connected_link(&self) -> Result<Arc<dyn BusLink>, BusError> {
        let state = self.state.lock();
        match (&state.link, state.connected) {
            (Some(link), true) => Ok(Arc::clone(link)),
            _ => Err(BusError::NotConnected),
        }
    }

    fn mark_connected(&self) -> u64 {
        let (epoch, address) = {
            let mut state = self.state.lock();
            state.connected = true;
            state.epoch += 1;
            state.last_error = None;
            let address = state
                .settings
                .as_ref()
                .map(BusSettings::address)
                .unwrap_or_else(|| "in-process".to_string());
            (state.epoch, address)
        };
        if epoch > 1 {
            self.reconnects.fetch_add(1, Ordering::Relaxed);
            info!("reconnected to MQTT broker {} (epoch {})", address, epoch);
        } else {
            info!("connected to MQTT broker {}", address);
        }
        epoch
    }

    fn after_connect(&self, epoch: u64) {
        if epoch > 1 {
            self.resubscribe();
        }
        let hooks: Vec<ConnectHook> = self.hooks.lock().clone();
        for hook in hooks {
            hook(epoch);
        }
    }

    /// Clean sessions lose their subscriptions; replay them on the new one.
    fn resubscribe(&self) {
        let wanted: Vec<(String, QoS)> = self
            .subscriptions
            .lock()
            .iter()
            .map(|(pattern, qos)| (pattern.clone(), *qos))
            .collect();
        if wanted.is_empty() {
            return;
        }
        let Ok(link) = self.connected_link() else {
            return;
        };
        let mut restored = 0;
        for (pattern, qos) in &wanted {
            match link.subscribe(pattern, *qos) {
                Ok(()) => restored += 1,
                Err(e) => warn!("re-subscribe to {} failed: {}", pattern, e),
            }
        }
        info!("re-subscribed to {}/{} patterns", restored, wanted.len());
    }

    async fn run_event_loop(
        self: Arc<Self>,
        mut eventloop: EventLoop,
        mut backoff: Backoff,
        ready: oneshot::Sender<Result<(), BusError>>,
    ) {
        let mut ready = Some(ready);
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        let cause = format!("{:?}", ack.code);
                        self.connection_lost(&cause);
                        if let Some(tx) = ready.take() {
                            let _ = tx.send(Err(BusError::Refused(cause)));
                        }
                        tokio::time::sleep(backoff.next_delay()).await;
                        continue;
                    }
                    backoff.reset();
                    let epoch = self.mark_connected();
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Ok(()));
                    }
                    self.after_connect(epoch);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.dispatch(&publish.topic, &publish.payload);
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    self.connection_lost("broker sent DISCONNECT");
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    if self.stopping.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    if self.stopping.load(Ordering::SeqCst) {
                        break;
                    }
                    let cause = e.to_string();
                    self.connection_lost(&cause);
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Err(BusError::Connection(cause)));
                    }
                    let delay = backoff.next_delay();
                    warn!("MQTT reconnect attempt {} in {:?}", backoff.attempts(), delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
        debug!("MQTT event loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::LoopbackLink;
    use std::time::Instant;

    /// Link that records subscribe requests and can refuse them.
    #[derive(Default)]
    struct RecordingLink {
        subscribes: Mutex<Vec<String>>,
        refuse_subscribe: AtomicBool,
    }

    impl RecordingLink {
        fn subscribes(&self) -> Vec<String> {
            self.subscribes.lock().clone()
        }
    }

    impl BusLink for RecordingLink {
        fn publish(&self, _topic: &str, _qos: QoS, _retain: bool, _payload: Vec<u8>) -> Result<(), BusError> {
            Ok(())
        }

        fn subscribe(&self, pattern: &str, qos: QoS) -> Result<(), BusError> {
            if self.refuse_subscribe.load(Ordering::SeqCst) {
                let request = rumqttc::Request::Subscribe(rumqttc::Subscribe::new(pattern, qos));
                return Err(BusError::Client(rumqttc::ClientError::TryRequest(request)));
            }
            self.subscribes.lock().push(pattern.to_string());
            Ok(())
        }

        fn unsubscribe(&self, _pattern: &str) -> Result<(), BusError> {
            Ok(())
        }

        fn disconnect(&self) -> Result<(), BusError> {
            Ok(())
        }
    }

    fn counter() -> (Arc<AtomicU32>, impl Fn(&str, &str) -> anyhow::Result<()> + Send + Sync + 'static) {
        let hits = Arc::new(AtomicU32::new(0));
        let inner = Arc::clone(&hits);
        (hits, move |_: &str, _: &str| {
            inner.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_calls_fail_fast_when_disconnected() {
        let bus = BusClient::new("test");
        let (hits, handler) = counter();

        assert!(!bus.is_connected());
        assert!(matches!(bus.subscribe("a/+", QoS::AtLeastOnce, handler), Err(BusError::NotConnected)));
        assert!(!bus.is_subscribed("a/+"));
        assert!(matches!(
            bus.publish("a/b", "1", QoS::AtLeastOnce, false),
            Err(BusError::NotConnected)
        ));
        assert!(matches!(bus.unsubscribe("a/+"), Err(BusError::NotConnected)));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_subscribe_does_not_wait_for_broker() {
        // event loop is never polled: nothing will ever acknowledge
        let options = MqttOptions::new("unacked", "127.0.0.1", 1);
        let (client, _eventloop) = AsyncClient::new(options, 16);
        let bus = BusClient::new("test");
        bus.attach_link(Arc::new(client));

        let started = Instant::now();
        for i in 0..8 {
            let (_, handler) = counter();
            bus.subscribe(&format!("devices/{i}/+"), QoS::AtLeastOnce, handler).unwrap();
        }
        bus.publish("devices/0/x", "1", QoS::AtLeastOnce, false).unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(bus.subscribed_patterns().len(), 8);
        assert_eq!(bus.stats().published, 1);
    }

    #[test]
    fn test_retained_message_reaches_handler_during_subscribe() {
        let bus = BusClient::new("test");
        let link = LoopbackLink::attach(&bus);
        link.seed_retained("homeassistant/status", "online");

        let (hits, handler) = counter();
        bus.subscribe("homeassistant/status", QoS::AtLeastOnce, handler).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_single_level_wildcard_delivery() {
        let bus = BusClient::new("test");
        let _link = LoopbackLink::attach(&bus);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe("a/+/c", QoS::AtLeastOnce, move |topic: &str, _: &str| {
            sink.lock().push(topic.to_string());
            Ok(())
        })
        .unwrap();

        bus.publish("a/b/c", "x", QoS::AtLeastOnce, false).unwrap();
        assert_eq!(seen.lock().as_slice(), ["a/b/c"]);
    }

    #[test]
    fn test_multi_level_wildcard_delivery() {
        let bus = BusClient::new("test");
        let _link = LoopbackLink::attach(&bus);
        let (hits, handler) = counter();
        bus.subscribe("a/#", QoS::AtLeastOnce, handler).unwrap();

        bus.publish("a/b/c/d", "x", QoS::AtLeastOnce, false).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.stats().delivered, 1);
    }

    #[test]
    fn test_handler_may_publish_from_dispatch() {
        let bus = BusClient::new("test");
        let link = LoopbackLink::attach(&bus);
        let inner = Arc::downgrade(&bus);
        bus.subscribe("ping", QoS::AtLeastOnce, move |_: &str, payload: &str| {
            if let Some(bus) = inner.upgrade() {
                bus.publish("pong", payload, QoS::AtLeastOnce, false)?;
            }
            Ok(())
        })
        .unwrap();

        bus.publish("ping", "42", QoS::AtLeastOnce, false).unwrap();
        let pongs = link.sent_to("pong");
        assert_eq!(pongs.len(), 1);
        assert_eq!(pongs[0].payload, "42");
    }

    #[test]
    fn test_reconnect_replays_subscriptions_and_runs_hooks() {
        let bus = BusClient::new("test");
        let epochs = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&epochs);
        bus.on_connect(move |epoch| seen.lock().push(epoch));

        let first = LoopbackLink::attach(&bus);
        let (_, handler) = counter();
        bus.subscribe("x/+/state", QoS::AtLeastOnce, handler).unwrap();
        assert_eq!(first.subscriptions(), vec!["x/+/state".to_string()]);

        bus.connection_lost("test drop");
        assert!(!bus.is_connected());
        assert!(bus.is_subscribed("x/+/state"));

        let second = LoopbackLink::attach(&bus);
        assert_eq!(second.subscriptions(), vec!["x/+/state".to_string()]);
        assert_eq!(bus.connection_epoch(), 2);
        assert_eq!(bus.stats().reconnects, 1);
        assert_eq!(epochs.lock().as_slice(), [1, 2]);
    }

    #[test]
    fn test_only_reconnects_replay_subscriptions() {
        let bus = BusClient::new("test");
        let link = Arc::new(RecordingLink::default());
        let hooked = Arc::downgrade(&bus);
        bus.on_connect(move |_| {
            if let Some(bus) = hooked.upgrade() {
                if !bus.is_subscribed("s/#") {
                    let _ = bus.subscribe("s/#", QoS::AtLeastOnce, |_: &str, _: &str| Ok(()));
                }
            }
        });

        // first session: only the hook subscribes, nothing is replayed
        assert_eq!(bus.attach_link(link.clone()), 1);
        assert_eq!(link.subscribes(), vec!["s/#".to_string()]);
        assert_eq!(bus.stats().reconnects, 0);

        bus.connection_lost("test drop");
        assert!(bus.publish("s/x", "1", QoS::AtLeastOnce, false).is_err());

        // second session: the client replays, the hook sees it already routed
        assert_eq!(bus.attach_link(link.clone()), 2);
        assert_eq!(link.subscribes(), vec!["s/#".to_string(), "s/#".to_string()]);
        assert_eq!(bus.stats().reconnects, 1);
        bus.publish("s/x", "1", QoS::AtLeastOnce, false).unwrap();
    }

    #[test]
    fn test_refused_subscribe_restores_previous_state() {
        let bus = BusClient::new("test");
        let link = Arc::new(RecordingLink::default());
        bus.attach_link(link.clone());
        let (bound_hits, bound) = counter();
        bus.subscribe("a/+", QoS::AtMostOnce, bound).unwrap();

        link.refuse_subscribe.store(true, Ordering::SeqCst);

        // new pattern: nothing stays registered
        let (fresh_hits, fresh) = counter();
        assert!(matches!(
            bus.subscribe("b/+", QoS::AtLeastOnce, fresh),
            Err(BusError::Client(rumqttc::ClientError::TryRequest(_)))
        ));
        assert!(!bus.is_subscribed("b/+"));
        assert!(!bus.subscriptions.lock().contains_key("b/+"));

        // re-bound pattern: the previous handler and QoS come back
        let (rebound_hits, rebound) = counter();
        assert!(bus.subscribe("a/+", QoS::ExactlyOnce, rebound).is_err());
        assert_eq!(bus.subscribed_patterns(), vec!["a/+".to_string()]);
        assert_eq!(bus.subscriptions.lock().get("a/+"), Some(&QoS::AtMostOnce));

        assert_eq!(bus.dispatch("a/x", b"1"), 1);
        assert_eq!(bus.dispatch("b/x", b"1"), 0);
        assert_eq!(bound_hits.load(Ordering::SeqCst), 1);
        assert_eq!(rebound_hits.load(Ordering::SeqCst), 0);
        assert_eq!(fresh_hits.load(Ordering::SeqCst), 0);
        assert_eq!(link.subscribes(), vec!["a/+".to_string()]);
    }

    #[test]
    fn test_publish_batch_reports_rejected_messages() {
        let bus = BusClient::new("test");
        let link = LoopbackLink::attach(&bus);
        let batch = vec![OutboundMessage::state("a/b", "1"), OutboundMessage::retained("a/c", "2")];

        link.reject_publishes(true);
        assert!(matches!(
            bus.publish("a/b", "1", QoS::AtLeastOnce, false),
            Err(BusError::Client(rumqttc::ClientError::TryRequest(_)))
        ));
        assert!(matches!(
            bus.publish_batch(&batch),
            Err(BusError::Incomplete { failed: 2, total: 2 })
        ));
        assert_eq!(bus.stats().published, 0);

        link.reject_publishes(false);
        bus.publish_batch(&batch).unwrap();
        assert_eq!(bus.stats().published, 2);
        assert_eq!(link.retained("a/c").as_deref(), Some("2"));
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = BusClient::new("test");
        let link = LoopbackLink::attach(&bus);
        let (hits, handler) = counter();
        bus.subscribe("a/b", QoS::AtLeastOnce, handler).unwrap();
        bus.unsubscribe("a/b").unwrap();
        bus.publish("a/b", "1", QoS::AtLeastOnce, false).unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(link.subscriptions().is_empty());
    }

    #[test]
    fn test_invalid_topics_are_rejected() {
        let bus = BusClient::new("test");
        let _link = LoopbackLink::attach(&bus);
        let (_, handler) = counter();
        assert!(matches!(
            bus.subscribe("a/#/b", QoS::AtLeastOnce, handler),
            Err(BusError::InvalidTopic(_))
        ));
        assert!(matches!(
            bus.publish("a/+", "1", QoS::AtLeastOnce, false),
            Err(BusError::InvalidTopic(_))
        ));
    }

    #[test]
    fn test_publish_batch_requires_connection() {
        let bus = BusClient::new("test");
        let batch = vec![OutboundMessage::state("a/b", "1")];
        assert!(matches!(bus.publish_batch(&batch), Err(BusError::NotConnected)));

        let link = LoopbackLink::attach(&bus);
        bus.publish_batch(&batch).unwrap();
        assert_eq!(link.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_broker_reports_failure() {
        let bus = BusClient::new("test");
        let mut settings = BusSettings::new("test", "127.0.0.1", 1);
        settings.reconnect_min = Duration::from_millis(50);
        settings.reconnect_max = Duration::from_millis(100);
        settings.connect_timeout = Duration::from_secs(5);

        let result = bus.connect(settings).await;
        assert!(result.is_err());
        assert!(!bus.is_connected());
        assert_eq!(bus.broker_address().as_deref(), Some("127.0.0.1:1"));

        bus.disconnect().await;
        assert!(!bus.is_connected());
    }
}
