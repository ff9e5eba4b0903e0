//! Home Assistant MQTT discovery payloads.
//!
//! One retained QoS-1 config message per sensor field plus one for the
//! power-failure binary sensor. Removing a device publishes empty retained
//! payloads on the same topics.

use crate::error::BusError;
use crate::mqtt::{BusClient, OutboundMessage};
use crate::record::{Field, FieldSpec, CATALOG};
use crate::topics;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

pub const DEFAULT_NAMESPACE: &str = "homeassistant";

/// Device block shared by every config payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
}

impl DeviceInfo {
    pub fn new(device_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            name: name.into(),
            manufacturer: "American Power Conversion".to_string(),
            model: "Back-UPS XS 1000M".to_string(),
        }
    }
}

/// Builds the discovery messages for one device.
#[derive(Debug, Clone)]
pub struct Discovery {
    namespace: String,
    device: DeviceInfo,
}

impl Discovery {
    pub fn new(namespace: impl Into<String>, device: DeviceInfo) -> Self {
        Self {
            namespace: namespace.into(),
            device,
        }
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    fn component(field: Field) -> &'static str {
        if field == Field::PowerFailure {
            "binary_sensor"
        } else {
            "sensor"
        }
    }

    fn config_topic(&self, field: Field) -> String {
        format!(
            "{}/{}/{}/{}/config",
            self.namespace,
            Self::component(field),
            self.device.device_id,
            field.name()
        )
    }

    fn config_payload(&self, spec: &FieldSpec) -> Value {
        let id = &self.device.device_id;
        let mut config = json!({
            "name": spec.meta.label,
            "unique_id": format!("{id}_{}", spec.name),
            // binary sensor state is published under sensor/ like the others
            "state_topic": topics::state_topic(&self.namespace, id, spec.name),
            "device": {
                "identifiers": [id],
                "name": self.device.name,
                "manufacturer": self.device.manufacturer,
                "model": self.device.model,
            },
        });
        if spec.field == Field::PowerFailure {
            config["payload_on"] = json!("1");
            config["payload_off"] = json!("0");
        } else {
            for (key, value) in [("unit_of_measurement", spec.meta.unit), ("state_class", spec.meta.state_class)] {
                if !value.is_empty() {
                    config[key] = json!(value);
                }
            }
        }
        for (key, value) in [("device_class", spec.meta.device_class), ("icon", spec.meta.icon)] {
            if !value.is_empty() {
                config[key] = json!(value);
            }
        }
        config
    }

    /// Every config message, in catalog order.
    pub fn config_messages(&self) -> Vec<OutboundMessage> {
        CATALOG
            .iter()
            .map(|spec| OutboundMessage::retained(self.config_topic(spec.field), self.config_payload(spec).to_string()))
            .collect()
    }

    /// Empty retained payloads that clear every config topic.
    pub fn removal_messages(&self) -> Vec<OutboundMessage> {
        Field::all()
            .map(|field| OutboundMessage::retained(self.config_topic(field), ""))
            .collect()
    }

    /// Publishes every config message. Fails fast when disconnected.
    pub fn publish_all(&self, bus: &BusClient) -> Result<usize, BusError> {
        let messages = self.config_messages();
        match bus.publish_batch(&messages) {
            Ok(()) => {
                info!(
                    "discovery published for {} ({} configs)",
                    self.device.device_id,
                    messages.len()
                );
                Ok(messages.len())
            }
            Err(e) => {
                warn!("discovery publish for {} failed: {}", self.device.device_id, e);
                Err(e)
            }
        }
    }

    pub fn remove_device(&self, bus: &BusClient) -> Result<(), BusError> {
        bus.publish_batch(&self.removal_messages())?;
        info!("discovery removed for {}", self.device.device_id);
        Ok(())
    }
}
