use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Id réservé du broadcast mesh (`0xFFFFFFFF`)
pub const BROADCAST_NODE_ID: u32 = u32::MAX;

/// Sentinelle pour hardware/role absents
pub const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetrySubtype {
    Device,
    Environment,
    Power,
}

impl TelemetrySubtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetrySubtype::Device => "device",
            TelemetrySubtype::Environment => "environment",
            TelemetrySubtype::Power => "power",
        }
    }
}

impl fmt::Display for TelemetrySubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    Telemetry,
    NodeInfo,
    /// Type non géré (position, text...) : ignoré sans erreur
    Other(String),
}

impl MessageType {
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "telemetry" => MessageType::Telemetry,
            "nodeinfo" => MessageType::NodeInfo,
            other => MessageType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Telemetry => "telemetry",
            MessageType::NodeInfo => "nodeinfo",
            MessageType::Other(s) => s,
        }
    }
}

/// Champs connus du payload, décodés une seule fois.
/// Un champ absent ou mal typé reste `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadFields {
    pub battery_level: Option<f64>,
    pub voltage: Option<f64>,
    pub uptime_seconds: Option<f64>,
    pub temperature: Option<f64>,
    pub relative_humidity: Option<f64>,
    pub barometric_pressure: Option<f64>,
    pub channel_utilization: Option<f64>,
    pub air_util_tx: Option<f64>,
    pub rssi: Option<f64>,
    pub snr: Option<f64>,
    pub long_name: Option<String>,
    pub short_name: Option<String>,
    /// Code hardware déjà rendu en chaîne décimale
    pub hardware: Option<String>,
    pub role: Option<String>,
}

/// Message validé, expéditeur non nul garanti.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMessage {
    pub from: u32,
    pub message_type: MessageType,
    pub subtype: TelemetrySubtype,
    pub fields: PayloadFields,
    /// rssi/snr au niveau de l'enveloppe (prioritaires sur le payload)
    pub rssi: Option<f64>,
    pub snr: Option<f64>,
    /// Horodatage unix (secondes) porté par l'enveloppe, sinon horloge locale
    pub timestamp: i64,
}

impl ParsedMessage {
    pub fn node_id(&self) -> String {
        self.from.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub node_id: String,
    pub subtype: TelemetrySubtype,
    pub timestamp: i64,
    pub battery_level: Option<f64>,
    pub voltage: Option<f64>,
    pub uptime_seconds: Option<f64>,
    pub temperature: Option<f64>,
    pub relative_humidity: Option<f64>,
    pub barometric_pressure: Option<f64>,
    pub channel_utilization: Option<f64>,
    pub air_util_tx: Option<f64>,
    pub rssi: Option<f64>,
    pub snr: Option<f64>,
}

impl TelemetryRecord {
    pub fn new(node_id: impl Into<String>, subtype: TelemetrySubtype, timestamp: i64) -> Self {
        Self {
            node_id: node_id.into(),
            subtype,
            timestamp,
            battery_level: None,
            voltage: None,
            uptime_seconds: None,
            temperature: None,
            relative_humidity: None,
            barometric_pressure: None,
            channel_utilization: None,
            air_util_tx: None,
            rssi: None,
            snr: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeInfoRecord {
    pub node_id: String,
    pub long_name: String,
    pub short_name: String,
    pub hardware: String,
    pub role: String,
    pub timestamp: i64,
}

/// Résultat de l'extraction d'un message.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Telemetry(TelemetryRecord),
    NodeInfo(NodeInfoRecord),
}

impl Record {
    pub fn node_id(&self) -> &str {
        match self {
            Record::Telemetry(r) => &r.node_id,
            Record::NodeInfo(r) => &r.node_id,
        }
    }
}

/// Entrée d'un nœud dans un snapshot persistant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub node_id: String,
    pub timestamp: i64,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Copie sérialisable de toutes les séries du store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: String,
    pub timestamp: i64,
    #[serde(default)]
    pub nodes: Vec<NodeSnapshot>,
}

/// Horloge murale en secondes unix
pub fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}
