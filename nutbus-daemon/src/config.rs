use nutbus_core::bridge::DEFAULT_STATUS_TOPIC;
use nutbus_core::discovery::DEFAULT_NAMESPACE;
use nutbus_core::storage::DEFAULT_MAX_ROWS;
use nutbus_core::telemetry::DEFAULT_NUT_PORT;
use nutbus_core::{
    BridgeSettings, BusSettings, CollectorSettings, DeviceEntry, DeviceInfo, DeviceRegistry, NutSource,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

pub const CONFIG_ENV: &str = "NUTBUS_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "nutbus.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid value for {name} ({value:?}): {reason}")]
    Env {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub mqtt: MqttConf,
    pub nut: NutConf,
    pub collector: CollectorConf,
    pub http: HttpConf,
    /// Devices the collector follows. Empty means "the bridged device only".
    pub devices: Vec<DeviceConf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub namespace: String,
    pub status_topic: Option<String>,
    pub keep_alive_secs: u64,
    pub reconnect_min_secs: u64,
    pub reconnect_max_secs: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NutConf {
    pub host: String,
    pub port: u16,
    pub ups_name: String,
    pub device_id: String,
    pub device_name: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConf {
    pub save_interval_secs: u64,
    pub check_interval_secs: u64,
    pub storage_path: PathBuf,
    pub max_rows: usize,
    pub write_attempts: u32,
    pub write_retry_pause_ms: u64,
    pub max_unknown_devices: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConf {
    pub id: String,
    #[serde(default)]
    pub storage_key: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            username: None,
            password: None,
            client_id: "nutbus".into(),
            namespace: DEFAULT_NAMESPACE.into(),
            status_topic: Some(DEFAULT_STATUS_TOPIC.into()),
            keep_alive_secs: 60,
            reconnect_min_secs: 1,
            reconnect_max_secs: 64,
            connect_timeout_secs: 10,
        }
    }
}

impl Default for NutConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: DEFAULT_NUT_PORT,
            ups_name: "apc_bx@localhost".into(),
            device_id: "apc_ups".into(),
            device_name: "NUT UPS".into(),
            manufacturer: None,
            model: None,
            poll_interval_secs: 60,
            timeout_secs: 10,
        }
    }
}

impl Default for CollectorConf {
    fn default() -> Self {
        Self {
            save_interval_secs: 3600,
            check_interval_secs: 60,
            storage_path: PathBuf::from("data/ups_metrics.json"),
            max_rows: DEFAULT_MAX_ROWS,
            write_attempts: 3,
            write_retry_pause_ms: 1000,
            max_unknown_devices: 32,
        }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8892,
        }
    }
}

pub fn config_path() -> PathBuf {
    std::env::var(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// File (if any), then process environment, then validation.
pub async fn load_config() -> Result<ServiceConfig, ConfigError> {
    let path = config_path();
    let mut cfg = read_config_file(&path).await?;
    cfg.apply_env(|name| std::env::var(name).ok())?;
    cfg.validate()?;
    Ok(cfg)
}

pub async fn read_config_file(path: &Path) -> Result<ServiceConfig, ConfigError> {
    if !path.exists() {
        info!("no {} found, using default configuration", path.display());
        return Ok(ServiceConfig::default());
    }
    let txt = fs::read_to_string(path).await.map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    if txt.trim().is_empty() {
        return Ok(ServiceConfig::default());
    }
    serde_yaml::from_str(&txt).map_err(|source| ConfigError::Yaml {
        path: path.display().to_string(),
        source,
    })
}

fn parse_env<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::Env {
        name,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_json_map(name: &'static str, raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    serde_json::from_str(raw).map_err(|e| ConfigError::Env {
        name,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

impl ServiceConfig {
    /// Applies environment overrides. `lookup` returns the raw value of a
    /// variable; empty values count as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("MQTT_BROKER") {
            self.mqtt.host = v;
        }
        if let Some(v) = var("MQTT_PORT") {
            self.mqtt.port = parse_env("MQTT_PORT", &v)?;
        }
        if let Some(v) = var("MQTT_USER") {
            self.mqtt.username = Some(v);
        }
        if let Some(v) = var("MQTT_PASSWORD") {
            self.mqtt.password = Some(v);
        }
        if let Some(v) = var("MQTT_CLIENT_ID") {
            self.mqtt.client_id = v;
        }

        if let Some(v) = var("NUT_HOST") {
            self.nut.host = v;
        }
        if let Some(v) = var("NUT_PORT") {
            self.nut.port = parse_env("NUT_PORT", &v)?;
        }
        if let Some(v) = var("NUT_UPS_NAME") {
            self.nut.ups_name = v;
        }
        if let Some(v) = var("NUT_DEVICE_ID") {
            self.nut.device_id = v;
        }
        if let Some(v) = var("NUT_DEVICE_NAME") {
            self.nut.device_name = v;
        }
        if let Some(v) = var("NUT_POLL_INTERVAL") {
            self.nut.poll_interval_secs = parse_env("NUT_POLL_INTERVAL", &v)?;
        }

        if let Some(v) = var("COLLECTOR_SAVE_INTERVAL") {
            self.collector.save_interval_secs = parse_env("COLLECTOR_SAVE_INTERVAL", &v)?;
        }
        if let Some(v) = var("STORAGE_PATH") {
            self.collector.storage_path = PathBuf::from(v);
        }
        if let Some(v) = var("HEALTH_CHECK_PORT") {
            self.http.port = parse_env("HEALTH_CHECK_PORT", &v)?;
        }

        if let Some(v) = var("UPS_DEVICE_IDS") {
            let previous = std::mem::take(&mut self.devices);
            self.devices = v
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(|id| {
                    previous.iter().find(|d| d.id == id).cloned().unwrap_or_else(|| DeviceConf {
                        id: id.to_string(),
                        storage_key: None,
                        label: None,
                    })
                })
                .collect();
        }
        if let Some(v) = var("UPS_DB_MAPPING") {
            for (id, key) in parse_json_map("UPS_DB_MAPPING", &v)? {
                match self.device_mut(&id) {
                    Some(device) => device.storage_key = Some(key),
                    None => warn!("UPS_DB_MAPPING: {} is not a configured device, ignored", id),
                }
            }
        }
        if let Some(v) = var("UPS_FRIENDLY_NAMES") {
            for (id, label) in parse_json_map("UPS_FRIENDLY_NAMES", &v)? {
                match self.device_mut(&id) {
                    Some(device) => device.label = Some(label),
                    None => warn!("UPS_FRIENDLY_NAMES: {} is not a configured device, ignored", id),
                }
            }
        }
        Ok(())
    }

    /// Device list with the bridged device as implicit single entry.
    fn device_mut(&mut self, id: &str) -> Option<&mut DeviceConf> {
        if self.devices.is_empty() {
            self.devices.push(DeviceConf {
                id: self.nut.device_id.clone(),
                storage_key: None,
                label: None,
            });
        }
        self.devices.iter_mut().find(|d| d.id == id)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::Invalid(msg));

        if self.mqtt.host.trim().is_empty() {
            return fail("mqtt.host is empty".into());
        }
        if self.mqtt.client_id.trim().is_empty() {
            return fail("mqtt.client_id is empty".into());
        }
        if !is_valid_id(&self.mqtt.namespace) {
            return fail(format!("mqtt.namespace {:?} is not a valid topic level", self.mqtt.namespace));
        }
        if self.mqtt.reconnect_min_secs == 0 || self.mqtt.reconnect_min_secs > self.mqtt.reconnect_max_secs {
            return fail(format!(
                "reconnect bounds {}s..{}s are inverted or zero",
                self.mqtt.reconnect_min_secs, self.mqtt.reconnect_max_secs
            ));
        }
        if self.mqtt.connect_timeout_secs == 0 {
            return fail("mqtt.connect_timeout_secs must be positive".into());
        }

        if self.nut.ups_name.trim().is_empty() {
            return fail("nut.ups_name is empty".into());
        }
        if !is_valid_id(&self.nut.device_id) {
            return fail(format!("nut.device_id {:?} is not a valid device id", self.nut.device_id));
        }
        if self.nut.poll_interval_secs == 0 || self.nut.timeout_secs == 0 {
            return fail("nut poll interval and timeout must be positive".into());
        }

        if self.collector.save_interval_secs == 0 || self.collector.check_interval_secs == 0 {
            return fail("collector intervals must be positive".into());
        }
        if self.collector.write_attempts == 0 {
            return fail("collector.write_attempts must be at least 1".into());
        }
        if self.collector.max_rows == 0 {
            return fail("collector.max_rows must be at least 1".into());
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if !is_valid_id(&device.id) {
                return fail(format!("device id {:?} is empty or contains '/', '+' or '#'", device.id));
            }
            if !seen.insert(device.id.as_str()) {
                return fail(format!("device {} listed twice", device.id));
            }
            if device.storage_key.as_deref().is_some_and(|key| key.trim().is_empty()) {
                return fail(format!("device {} has an empty storage key", device.id));
            }
        }
        Ok(())
    }

    pub fn device_entries(&self) -> Vec<DeviceEntry> {
        if self.devices.is_empty() {
            return vec![DeviceEntry::new(&self.nut.device_id)];
        }
        self.devices
            .iter()
            .map(|device| {
                let mut entry = DeviceEntry::new(&device.id);
                if let Some(key) = &device.storage_key {
                    entry = entry.with_storage_key(key);
                }
                if let Some(label) = &device.label {
                    entry = entry.with_label(label);
                }
                entry
            })
            .collect()
    }

    pub fn registry(&self) -> DeviceRegistry {
        DeviceRegistry::from_entries(self.device_entries())
    }

    pub fn bus_settings(&self) -> BusSettings {
        let mut settings = BusSettings::new(&self.mqtt.client_id, &self.mqtt.host, self.mqtt.port);
        if let Some(user) = &self.mqtt.username {
            settings = settings.with_credentials(user, self.mqtt.password.clone().unwrap_or_default());
        }
        settings.keep_alive = Duration::from_secs(self.mqtt.keep_alive_secs);
        settings.reconnect_min = Duration::from_secs(self.mqtt.reconnect_min_secs);
        settings.reconnect_max = Duration::from_secs(self.mqtt.reconnect_max_secs);
        settings.connect_timeout = Duration::from_secs(self.mqtt.connect_timeout_secs);
        settings
    }

    pub fn device_info(&self) -> DeviceInfo {
        let mut info = DeviceInfo::new(&self.nut.device_id, &self.nut.device_name);
        if let Some(manufacturer) = &self.nut.manufacturer {
            info.manufacturer = manufacturer.clone();
        }
        if let Some(model) = &self.nut.model {
            info.model = model.clone();
        }
        info
    }

    pub fn bridge_settings(&self) -> BridgeSettings {
        let mut settings = BridgeSettings::new(self.device_info());
        settings.namespace = self.mqtt.namespace.clone();
        settings.status_topic = self.mqtt.status_topic.clone();
        settings.poll_interval = Duration::from_secs(self.nut.poll_interval_secs);
        settings.retry_min = Duration::from_secs(self.mqtt.reconnect_min_secs);
        settings.retry_max = Duration::from_secs(self.mqtt.reconnect_max_secs);
        settings
    }

    pub fn collector_settings(&self) -> CollectorSettings {
        CollectorSettings {
            namespace: self.mqtt.namespace.clone(),
            save_interval: Duration::from_secs(self.collector.save_interval_secs),
            check_interval: Duration::from_secs(self.collector.check_interval_secs),
            max_unknown_devices: self.collector.max_unknown_devices,
            ..CollectorSettings::default()
        }
    }

    pub fn nut_source(&self) -> NutSource {
        NutSource::new(&self.nut.host, self.nut.port, &self.nut.ups_name)
            .with_timeout(Duration::from_secs(self.nut.timeout_secs))
    }
}

/// Usable as a single topic level.
fn is_valid_id(id: &str) -> bool {
    !id.trim().is_empty() && !id.contains(['/', '+', '#'])
}
