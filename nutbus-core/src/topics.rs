/**
 * TOPIC ROUTER - Wildcard matching and fan-out dispatch
 *
 * ROLE:
 * Maps topic patterns (with MQTT `+` and `#` wildcards) to handlers and
 * delivers every incoming message to ALL matching handlers, not just the
 * first one.
 *
 * HOW IT WORKS:
 * - One handler per pattern, stored in a BTreeMap under an RwLock
 * - dispatch() clones the matching handlers, releases the lock, then calls
 *   them, so a handler may subscribe/publish without deadlocking
 * - A handler error or panic is logged and does not stop delivery to others
 *
 * TOPIC LAYOUT:
 * `<namespace>/sensor/<device>/<field>/state` per field,
 * `<namespace>/sensor/<device>/<field>/config` for discovery.
 */

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Matches exactly one level.
pub const SINGLE_LEVEL: &str = "+";
/// Matches the remaining levels (zero or more). Only valid as the last level.
pub const MULTI_LEVEL: &str = "#";

/// Callback bound to a pattern: `(topic, payload)`.
pub type Handler = Arc<dyn Fn(&str, &str) -> anyhow::Result<()> + Send + Sync>;

/// Returns true when `topic` matches `pattern`.
///
/// Levels are `/`-delimited. `+` matches any single level, a trailing `#`
/// matches the rest of the topic provided the topic has at least as many
/// levels as the pattern before the `#`. Wildcards never match inside a level.
pub fn topic_matches(topic: &str, pattern: &str) -> bool {
    let topic_levels: Vec<&str> = topic.split('/').collect();
    let mut pattern_levels: Vec<&str> = pattern.split('/').collect();

    if pattern_levels.last() == Some(&MULTI_LEVEL) {
        pattern_levels.pop();
        if topic_levels.len() < pattern_levels.len() {
            return false;
        }
    } else if topic_levels.len() != pattern_levels.len() {
        return false;
    }

    pattern_levels
        .iter()
        .zip(topic_levels.iter())
        .all(|(p, t)| *p == SINGLE_LEVEL || p == t)
}

/// Validates a subscription pattern: `#` only as the whole last level,
/// `+` only as a whole level.
pub fn is_valid_pattern(pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    let levels: Vec<&str> = pattern.split('/').collect();
    let last = levels.len() - 1;
    levels.iter().enumerate().all(|(i, level)| {
        if level.contains('#') {
            *level == MULTI_LEVEL && i == last
        } else if level.contains('+') {
            *level == SINGLE_LEVEL
        } else {
            true
        }
    })
}

/// Per-field state topic for a device.
pub fn state_topic(namespace: &str, device_id: &str, field: &str) -> String {
    format!("{namespace}/sensor/{device_id}/{field}/state")
}

/// Pattern matching every field state topic of one device.
pub fn device_state_pattern(namespace: &str, device_id: &str) -> String {
    format!("{namespace}/sensor/{device_id}/{SINGLE_LEVEL}/state")
}

/// Splits a field state topic into `(device_id, field)`.
///
/// Anything that is not exactly `<ns>/sensor/<device>/<field>/state` is
/// rejected.
pub fn parse_state_topic(topic: &str) -> Option<(&str, &str)> {
    let levels: Vec<&str> = topic.split('/').collect();
    match levels.as_slice() {
        [_, "sensor", device, field, "state"] if !device.is_empty() && !field.is_empty() => {
            Some((*device, *field))
        }
        _ => None,
    }
}

/// Registry of pattern -> handler with fan-out dispatch.
#[derive(Default)]
pub struct TopicRouter {
    routes: RwLock<BTreeMap<String, Handler>>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `handler` to `pattern`, returning the handler it replaced.
    pub fn insert(&self, pattern: impl Into<String>, handler: Handler) -> Option<Handler> {
        self.routes.write().insert(pattern.into(), handler)
    }

    pub fn remove(&self, pattern: &str) -> Option<Handler> {
        self.routes.write().remove(pattern)
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.routes.read().contains_key(pattern)
    }

    pub fn patterns(&self) -> Vec<String> {
        self.routes.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }

    /// Snapshot of every route matching `topic`.
    pub fn matching(&self, topic: &str) -> Vec<(String, Handler)> {
        self.routes
            .read()
            .iter()
            .filter(|(pattern, _)| topic_matches(topic, pattern))
            .map(|(pattern, handler)| (pattern.clone(), Arc::clone(handler)))
            .collect()
    }

    /// Invokes every handler whose pattern matches `topic`.
    ///
    /// Returns how many handlers completed successfully.
    pub fn dispatch(&self, topic: &str, payload: &str) -> usize {
        // read lock is released here, before any handler runs
        let targets = self.matching(topic);
        if targets.is_empty() {
            debug!("no handler for topic {}", topic);
            return 0;
        }

        let mut delivered = 0;
        for (pattern, handler) in targets {
            match catch_unwind(AssertUnwindSafe(|| handler(topic, payload))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!("handler for '{}' failed on {}: {:#}", pattern, topic, e),
                Err(_) => error!("handler for '{}' panicked on {}", pattern, topic),
            }
        }
        delivered
    }
}
