//! Device registry: external device id -> storage key + display label.
//!
//! Filled from configuration at startup and read on every incoming field
//! update, so it sits behind an RwLock. Unknown ids map to themselves.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub device_id: String,
    pub storage_key: String,
    pub label: String,
}

impl DeviceEntry {
    /// Entry whose storage key is the id itself and whose label is derived
    /// from the id.
    pub fn new(device_id: impl Into<String>) -> Self {
        let device_id = device_id.into();
        Self {
            storage_key: device_id.clone(),
            label: default_label(&device_id),
            device_id,
        }
    }

    pub fn with_storage_key(mut self, storage_key: impl Into<String>) -> Self {
        self.storage_key = storage_key.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// `"my_custom_ups"` -> `"My custom ups"`.
pub fn default_label(device_id: &str) -> String {
    let spaced = device_id.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Default)]
struct Entries {
    order: Vec<String>,
    by_device: HashMap<String, DeviceEntry>,
    by_storage: HashMap<String, String>,
}

#[derive(Default)]
pub struct DeviceRegistry {
    inner: RwLock<Entries>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = DeviceEntry>) -> Self {
        let registry = Self::new();
        for entry in entries {
            registry.register(entry);
        }
        registry
    }

    /// Adds or replaces an entry. Returns true when the id was new.
    pub fn register(&self, entry: DeviceEntry) -> bool {
        let mut inner = self.inner.write();
        let is_new = !inner.by_device.contains_key(&entry.device_id);
        if is_new {
            inner.order.push(entry.device_id.clone());
        } else if let Some(old) = inner.by_device.get(&entry.device_id).cloned() {
            inner.by_storage.remove(&old.storage_key);
        }
        inner
            .by_storage
            .insert(entry.storage_key.clone(), entry.device_id.clone());
        info!(
            "device {} registered (storage key {}, label '{}')",
            entry.device_id, entry.storage_key, entry.label
        );
        inner.by_device.insert(entry.device_id.clone(), entry);
        is_new
    }

    pub fn is_known(&self, device_id: &str) -> bool {
        self.inner.read().by_device.contains_key(device_id)
    }

    /// Configured ids in registration order.
    pub fn device_ids(&self) -> Vec<String> {
        self.inner.read().order.clone()
    }

    pub fn entries(&self) -> Vec<DeviceEntry> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.by_device.get(id).cloned())
            .collect()
    }

    pub fn storage_key(&self, device_id: &str) -> String {
        self.inner
            .read()
            .by_device
            .get(device_id)
            .map(|entry| entry.storage_key.clone())
            .unwrap_or_else(|| device_id.to_string())
    }

    /// Reverse lookup; unknown keys map to themselves.
    pub fn device_id_for(&self, storage_key: &str) -> String {
        self.inner
            .read()
            .by_storage
            .get(storage_key)
            .cloned()
            .unwrap_or_else(|| storage_key.to_string())
    }

    pub fn label(&self, device_id: &str) -> String {
        self.inner
            .read()
            .by_device
            .get(device_id)
            .map(|entry| entry.label.clone())
            .unwrap_or_else(|| default_label(device_id))
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
