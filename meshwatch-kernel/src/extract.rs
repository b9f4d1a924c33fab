//! Extraction des records à partir d'un `ParsedMessage`.
//!
//! Politique d'arrondi : voltage, temperature, relative_humidity,
//! barometric_pressure, channel_utilization et air_util_tx à 2 décimales.
//! battery_level, uptime_seconds, rssi et snr sont gardés bruts.

use crate::models::{
    MessageType, NodeInfoRecord, ParsedMessage, Record, TelemetryRecord, UNKNOWN,
};

/// Arrondi à 2 décimales, moitié loin de zéro (`f64::round`).
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Record correspondant au message, `None` pour un type non géré.
pub fn extract(msg: &ParsedMessage) -> Option<Record> {
    match msg.message_type {
        MessageType::Telemetry => Some(Record::Telemetry(telemetry(msg))),
        MessageType::NodeInfo => Some(Record::NodeInfo(node_info(msg))),
        MessageType::Other(_) => None,
    }
}

pub fn telemetry(msg: &ParsedMessage) -> TelemetryRecord {
    let f = &msg.fields;
    let mut record = TelemetryRecord::new(msg.node_id(), msg.subtype, msg.timestamp);
    record.battery_level = f.battery_level;
    record.voltage = f.voltage.map(round2);
    record.uptime_seconds = f.uptime_seconds;
    record.temperature = f.temperature.map(round2);
    record.relative_humidity = f.relative_humidity.map(round2);
    record.barometric_pressure = f.barometric_pressure.map(round2);
    record.channel_utilization = f.channel_utilization.map(round2);
    record.air_util_tx = f.air_util_tx.map(round2);
    // l'enveloppe l'emporte sur le payload
    record.rssi = msg.rssi.or(f.rssi);
    record.snr = msg.snr.or(f.snr);
    record
}

pub fn node_info(msg: &ParsedMessage) -> NodeInfoRecord {
    let f = &msg.fields;
    NodeInfoRecord {
        node_id: msg.node_id(),
        long_name: f.long_name.clone().unwrap_or_default(),
        short_name: f.short_name.clone().unwrap_or_default(),
        hardware: f.hardware.clone().unwrap_or_else(|| UNKNOWN.to_string()),
        role: f.role.clone().unwrap_or_else(|| UNKNOWN.to_string()),
        timestamp: msg.timestamp,
    }
}
