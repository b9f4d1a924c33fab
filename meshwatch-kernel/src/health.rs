use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MqttStatus {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

impl MqttStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MqttStatus::Connecting => "connecting",
            MqttStatus::Connected => "connected",
            MqttStatus::Reconnecting => "reconnecting",
            MqttStatus::Disconnected => "disconnected",
        }
    }
}

/// Vue JSON servie par `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterHealth {
    pub status: String,
    pub uptime_seconds: u64,
    pub mqtt_status: MqttStatus,
    pub mqtt_reconnects: u32,
    pub messages_processed: u64,
    pub messages_rejected: u64,
    pub nodes_tracked: usize,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<Mutex<MqttStatus>>,
    processed: Arc<AtomicU64>,
    rejected: Arc<AtomicU64>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: Arc::new(Mutex::new(MqttStatus::Connecting)),
            processed: Arc::new(AtomicU64::new(0)),
            rejected: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = MqttStatus::Connected;
    }

    pub fn mark_mqtt_disconnected(&self) {
        *self.mqtt_status.lock() = MqttStatus::Disconnected;
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = MqttStatus::Reconnecting;
    }

    pub fn mqtt_status(&self) -> MqttStatus {
        *self.mqtt_status.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.mqtt_status() == MqttStatus::Connected
    }

    /// Message accepté par le pipeline (enregistré ou ignoré)
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_health(&self, nodes_tracked: usize) -> ExporterHealth {
        let mqtt_status = self.mqtt_status();
        ExporterHealth {
            status: if mqtt_status == MqttStatus::Connected { "ok" } else { "degraded" }.into(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            mqtt_status,
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
            messages_processed: self.processed.load(Ordering::Relaxed),
            messages_rejected: self.rejected.load(Ordering::Relaxed),
            nodes_tracked,
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}
