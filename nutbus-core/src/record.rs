//! Canonical per-device UPS record and the field catalog behind it.
//!
//! Every field the system knows about is described once in [`CATALOG`]:
//! its bus name, the aliases other publishers use, the NUT variable it is
//! read from, its value kind and its discovery metadata.

use crate::mqtt::OutboundMessage;
use crate::topics;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use time::OffsetDateTime;

/// Used to derive load in watts when the UPS does not report its nominal power.
pub const DEFAULT_NOMINAL_WATTS: f64 = 600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    BatteryCharge,
    BatteryVoltage,
    BatteryRuntime,
    BatteryNominalVoltage,
    BatteryLowChargeThreshold,
    BatteryWarningChargeThreshold,
    BatteryType,
    BatteryMfrDate,
    InputVoltage,
    InputNominalVoltage,
    HighVoltageTransfer,
    LowVoltageTransfer,
    InputSensitivity,
    LastTransferReason,
    LoadPercentage,
    LoadWatts,
    UpsStatus,
    PowerFailure,
    UpsNominalPower,
    BeeperStatus,
    SelfTestResult,
    FirmwareVersion,
    DelayShutdown,
    TimerReboot,
    TimerShutdown,
    DriverName,
    DriverVersion,
    DriverState,
    Temperature,
    OutputVoltage,
    OutputNominalVoltage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Float,
    Int,
    Text,
    Flag,
}

/// Discovery metadata; empty strings are omitted from the payload.
#[derive(Debug, Clone, Copy)]
pub struct SensorMeta {
    pub label: &'static str,
    pub unit: &'static str,
    pub device_class: &'static str,
    pub state_class: &'static str,
    pub icon: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub field: Field,
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    /// NUT variable the value is read from; `None` for derived fields.
    pub source_key: Option<&'static str>,
    pub kind: FieldKind,
    pub meta: SensorMeta,
}

const fn meta(
    label: &'static str,
    unit: &'static str,
    device_class: &'static str,
    state_class: &'static str,
    icon: &'static str,
) -> SensorMeta {
    SensorMeta {
        label,
        unit,
        device_class,
        state_class,
        icon,
    }
}

/// Ordered like [`Field`]; `Field::spec` indexes into it.
pub static CATALOG: [FieldSpec; 31] = [
    FieldSpec {
        field: Field::BatteryCharge,
        name: "battery_charge",
        aliases: &[],
        source_key: Some("battery.charge"),
        kind: FieldKind::Float,
        meta: meta("Battery Charge", "%", "battery", "measurement", ""),
    },
    FieldSpec {
        field: Field::BatteryVoltage,
        name: "battery_voltage",
        aliases: &[],
        source_key: Some("battery.voltage"),
        kind: FieldKind::Float,
        meta: meta("Battery Voltage", "V", "voltage", "measurement", ""),
    },
    FieldSpec {
        field: Field::BatteryRuntime,
        name: "battery_runtime",
        aliases: &[],
        source_key: Some("battery.runtime"),
        kind: FieldKind::Int,
        meta: meta("Battery Runtime", "s", "duration", "measurement", "mdi:timer-outline"),
    },
    FieldSpec {
        field: Field::BatteryNominalVoltage,
        name: "battery_nominal_voltage",
        aliases: &["battery_voltage_nominal"],
        source_key: Some("battery.voltage.nominal"),
        kind: FieldKind::Float,
        meta: meta("Battery Nominal Voltage", "V", "voltage", "measurement", ""),
    },
    FieldSpec {
        field: Field::BatteryLowChargeThreshold,
        name: "battery_low_charge_threshold",
        aliases: &["battery_charge_low"],
        source_key: Some("battery.charge.low"),
        kind: FieldKind::Float,
        meta: meta("Battery Low Charge Threshold", "%", "battery", "measurement", ""),
    },
    FieldSpec {
        field: Field::BatteryWarningChargeThreshold,
        name: "battery_warning_charge_threshold",
        aliases: &["battery_charge_warning"],
        source_key: Some("battery.charge.warning"),
        kind: FieldKind::Float,
        meta: meta("Battery Warning Charge Threshold", "%", "battery", "measurement", ""),
    },
    FieldSpec {
        field: Field::BatteryType,
        name: "battery_type",
        aliases: &[],
        source_key: Some("battery.type"),
        kind: FieldKind::Text,
        meta: meta("Battery Type", "", "", "", "mdi:battery"),
    },
    FieldSpec {
        field: Field::BatteryMfrDate,
        name: "battery_mfr_date",
        aliases: &[],
        source_key: Some("battery.mfr.date"),
        kind: FieldKind::Text,
        meta: meta("Battery Manufacture Date", "", "", "", "mdi:calendar"),
    },
    FieldSpec {
        field: Field::InputVoltage,
        name: "input_voltage",
        aliases: &[],
        source_key: Some("input.voltage"),
        kind: FieldKind::Float,
        meta: meta("Input Voltage", "V", "voltage", "measurement", ""),
    },
    FieldSpec {
        field: Field::InputNominalVoltage,
        name: "input_nominal_voltage",
        aliases: &["input_voltage_nominal"],
        source_key: Some("input.voltage.nominal"),
        kind: FieldKind::Int,
        meta: meta("Input Nominal Voltage", "V", "voltage", "measurement", ""),
    },
    FieldSpec {
        field: Field::HighVoltageTransfer,
        name: "high_voltage_transfer",
        aliases: &["input_transfer_high"],
        source_key: Some("input.transfer.high"),
        kind: FieldKind::Float,
        meta: meta("High Voltage Transfer", "V", "voltage", "measurement", ""),
    },
    FieldSpec {
        field: Field::LowVoltageTransfer,
        name: "low_voltage_transfer",
        aliases: &["input_transfer_low"],
        source_key: Some("input.transfer.low"),
        kind: FieldKind::Float,
        meta: meta("Low Voltage Transfer", "V", "voltage", "measurement", ""),
    },
    FieldSpec {
        field: Field::InputSensitivity,
        name: "input_sensitivity",
        aliases: &[],
        source_key: Some("input.sensitivity"),
        kind: FieldKind::Text,
        meta: meta("Input Sensitivity", "", "", "", "mdi:tune"),
    },
    FieldSpec {
        field: Field::LastTransferReason,
        name: "last_transfer_reason",
        aliases: &["input_transfer_reason"],
        source_key: Some("input.transfer.reason"),
        kind: FieldKind::Text,
        meta: meta("Last Transfer Reason", "", "", "", "mdi:information-outline"),
    },
    FieldSpec {
        field: Field::LoadPercentage,
        name: "load_percentage",
        aliases: &["load_percent"],
        source_key: Some("ups.load"),
        kind: FieldKind::Float,
        meta: meta("Load", "%", "power_factor", "measurement", "mdi:gauge"),
    },
    FieldSpec {
        field: Field::LoadWatts,
        name: "load_watts",
        aliases: &[],
        source_key: None,
        kind: FieldKind::Float,
        meta: meta("Load Power", "W", "power", "measurement", ""),
    },
    FieldSpec {
        field: Field::UpsStatus,
        name: "ups_status",
        aliases: &["status"],
        source_key: Some("ups.status"),
        kind: FieldKind::Text,
        meta: meta("UPS Status", "", "", "", "mdi:information"),
    },
    FieldSpec {
        field: Field::PowerFailure,
        name: "power_failure",
        aliases: &[],
        source_key: None,
        kind: FieldKind::Flag,
        meta: meta("Power Failure", "", "power", "", "mdi:power-plug-off"),
    },
    FieldSpec {
        field: Field::UpsNominalPower,
        name: "ups_nominal_power",
        aliases: &[],
        source_key: Some("ups.realpower.nominal"),
        kind: FieldKind::Float,
        meta: meta("Nominal Power", "W", "power", "measurement", ""),
    },
    FieldSpec {
        field: Field::BeeperStatus,
        name: "beeper_status",
        aliases: &[],
        source_key: Some("ups.beeper.status"),
        kind: FieldKind::Text,
        meta: meta("Beeper Status", "", "", "", "mdi:volume-high"),
    },
    FieldSpec {
        field: Field::SelfTestResult,
        name: "self_test_result",
        aliases: &[],
        source_key: Some("ups.test.result"),
        kind: FieldKind::Text,
        meta: meta("Self Test Result", "", "", "", "mdi:clipboard-check"),
    },
    FieldSpec {
        field: Field::FirmwareVersion,
        name: "firmware_version",
        aliases: &[],
        source_key: Some("ups.firmware"),
        kind: FieldKind::Text,
        meta: meta("Firmware Version", "", "", "", "mdi:chip"),
    },
    FieldSpec {
        field: Field::DelayShutdown,
        name: "delay_shutdown",
        aliases: &[],
        source_key: Some("ups.delay.shutdown"),
        kind: FieldKind::Int,
        meta: meta("Shutdown Delay", "s", "duration", "", "mdi:timer-cog-outline"),
    },
    FieldSpec {
        field: Field::TimerReboot,
        name: "timer_reboot",
        aliases: &[],
        source_key: Some("ups.timer.reboot"),
        kind: FieldKind::Int,
        meta: meta("Reboot Timer", "s", "duration", "", "mdi:timer-refresh-outline"),
    },
    FieldSpec {
        field: Field::TimerShutdown,
        name: "timer_shutdown",
        aliases: &[],
        source_key: Some("ups.timer.shutdown"),
        kind: FieldKind::Int,
        meta: meta("Shutdown Timer", "s", "duration", "", "mdi:timer-off-outline"),
    },
    FieldSpec {
        field: Field::DriverName,
        name: "driver_name",
        aliases: &[],
        source_key: Some("driver.name"),
        kind: FieldKind::Text,
        meta: meta("Driver Name", "", "", "", "mdi:application"),
    },
    FieldSpec {
        field: Field::DriverVersion,
        name: "driver_version",
        aliases: &[],
        source_key: Some("driver.version"),
        kind: FieldKind::Text,
        meta: meta("Driver Version", "", "", "", "mdi:tag"),
    },
    FieldSpec {
        field: Field::DriverState,
        name: "driver_state",
        aliases: &[],
        source_key: Some("driver.state"),
        kind: FieldKind::Text,
        meta: meta("Driver State", "", "", "", "mdi:state-machine"),
    },
    FieldSpec {
        field: Field::Temperature,
        name: "temperature",
        aliases: &[],
        source_key: Some("ups.temperature"),
        kind: FieldKind::Float,
        meta: meta("Temperature", "°C", "temperature", "measurement", ""),
    },
    FieldSpec {
        field: Field::OutputVoltage,
        name: "output_voltage",
        aliases: &[],
        source_key: Some("output.voltage"),
        kind: FieldKind::Float,
        meta: meta("Output Voltage", "V", "voltage", "measurement", ""),
    },
    FieldSpec {
        field: Field::OutputNominalVoltage,
        name: "output_nominal_voltage",
        aliases: &[],
        source_key: Some("output.voltage.nominal"),
        kind: FieldKind::Int,
        meta: meta("Output Nominal Voltage", "V", "voltage", "measurement", ""),
    },
];

impl Field {
    pub fn spec(self) -> &'static FieldSpec {
        &CATALOG[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    pub fn kind(self) -> FieldKind {
        self.spec().kind
    }

    pub fn all() -> impl Iterator<Item = Field> {
        CATALOG.iter().map(|spec| spec.field)
    }

    /// Resolves a bus field name, a known alias, or a NUT variable name.
    pub fn lookup(name: &str) -> Option<Field> {
        CATALOG
            .iter()
            .find(|spec| {
                spec.name == name || spec.aliases.iter().any(|alias| *alias == name) || spec.source_key == Some(name)
            })
            .map(|spec| spec.field)
    }

    /// Type-aware parse of a raw string value. `None` when unparsable.
    pub fn parse(self, raw: &str) -> Option<FieldValue> {
        let raw = raw.trim();
        match self.kind() {
            FieldKind::Float => parse_float(raw).map(FieldValue::Float),
            FieldKind::Int => raw
                .parse::<i64>()
                .ok()
                .or_else(|| parse_float(raw).map(|v| v.trunc() as i64))
                .map(FieldValue::Int),
            FieldKind::Text => (!raw.is_empty()).then(|| FieldValue::Text(raw.to_string())),
            FieldKind::Flag => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => Some(FieldValue::Flag(true)),
                "0" | "false" | "off" | "no" => Some(FieldValue::Flag(false)),
                _ => None,
            },
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn parse_float(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Float(f64),
    Int(i64),
    Text(String),
    Flag(bool),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Flag(v) => Some(*v),
            _ => None,
        }
    }
}

/// Bus payload form: shortest float, plain integer, `1`/`0`, raw text.
impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Text(v) => f.write_str(v),
            FieldValue::Flag(v) => f.write_str(if *v { "1" } else { "0" }),
        }
    }
}

/// Result of merging one `(field, raw value)` update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied(Field),
    UnknownField,
    Unparsable(Field),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    device_id: String,
    updated_at: OffsetDateTime,
    values: BTreeMap<Field, FieldValue>,
}

impl DeviceRecord {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            updated_at: OffsetDateTime::now_utc(),
            values: BTreeMap::new(),
        }
    }

    /// Builds a record from a NUT variable snapshot and derives
    /// `load_watts` and `power_failure`.
    pub fn from_variables(device_id: impl Into<String>, vars: &BTreeMap<String, String>) -> Self {
        let mut record = Self::new(device_id);
        for spec in CATALOG.iter() {
            let Some(key) = spec.source_key else { continue };
            if let Some(value) = vars.get(key).and_then(|raw| spec.field.parse(raw)) {
                record.values.insert(spec.field, value);
            }
        }
        record.derive_fields();
        record
    }

    fn derive_fields(&mut self) {
        if let Some(load) = self.float(Field::LoadPercentage) {
            let nominal = self
                .float(Field::UpsNominalPower)
                .filter(|watts| *watts > 0.0)
                .unwrap_or(DEFAULT_NOMINAL_WATTS);
            let watts = (load / 100.0 * nominal * 10.0).round() / 10.0;
            self.values.insert(Field::LoadWatts, FieldValue::Float(watts));
        }
        if let Some(status) = self.ups_status() {
            let on_battery = status.split_whitespace().any(|flag| flag == "OB");
            self.values.insert(Field::PowerFailure, FieldValue::Flag(on_battery));
        }
    }

    /// Last-write-wins merge of one update. Unparsable values leave the
    /// current value untouched; the timestamp only moves when a value lands.
    pub fn merge(&mut self, name: &str, raw: &str) -> MergeOutcome {
        let Some(field) = Field::lookup(name) else {
            return MergeOutcome::UnknownField;
        };
        match field.parse(raw) {
            Some(value) => {
                self.set(field, value);
                MergeOutcome::Applied(field)
            }
            None => MergeOutcome::Unparsable(field),
        }
    }

    pub fn set(&mut self, field: Field, value: FieldValue) {
        self.values.insert(field, value);
        self.updated_at = OffsetDateTime::now_utc();
    }

    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.values.get(&field)
    }

    pub fn float(&self, field: Field) -> Option<f64> {
        self.get(field).and_then(FieldValue::as_f64)
    }

    pub fn text(&self, field: Field) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_str)
    }

    pub fn battery_charge(&self) -> Option<f64> {
        self.float(Field::BatteryCharge)
    }

    pub fn ups_status(&self) -> Option<&str> {
        self.text(Field::UpsStatus)
    }

    pub fn power_failure(&self) -> Option<bool> {
        self.get(Field::PowerFailure).and_then(FieldValue::as_bool)
    }

    /// Eligible for persistence: a status and a battery charge are present.
    /// Charge is not range checked; some units report slightly above 100 %.
    pub fn is_complete(&self) -> bool {
        self.missing_required().is_empty()
    }

    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.ups_status().is_none() {
            missing.push(Field::UpsStatus.name());
        }
        if self.battery_charge().is_none() {
            missing.push(Field::BatteryCharge.name());
        }
        missing
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn updated_at(&self) -> OffsetDateTime {
        self.updated_at
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &FieldValue)> {
        self.values.iter().map(|(field, value)| (*field, value))
    }

    /// One QoS-1, non-retained message per present field.
    pub fn state_messages(&self, namespace: &str) -> Vec<OutboundMessage> {
        self.iter()
            .map(|(field, value)| {
                OutboundMessage::state(
                    topics::state_topic(namespace, &self.device_id, field.name()),
                    value.to_string(),
                )
            })
            .collect()
    }

    /// Present fields keyed by bus name.
    pub fn to_json(&self) -> serde_json::Map<String, serde_json::Value> {
        self.iter()
            .map(|(field, value)| {
                let json = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
                (field.name().to_string(), json)
            })
            .collect()
    }
}
