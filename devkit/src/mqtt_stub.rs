/*!
Mock MQTT Client pour développement sans broker

Implémente `Publisher` : enregistre les downlinks publiés, peut simuler un bus
indisponible ou un refus au N-ième publish. Simule aussi la réception de
messages mesh via un channel que le `TestHarness` vide dans le pipeline.
*/

use meshwatch_kernel::alerts::{Downlink, Publisher};
use meshwatch_kernel::error::NetworkError;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use anyhow::Result;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Mock du client MQTT partagé (uplink simulé + downlink enregistré)
#[derive(Clone)]
pub struct MockMqttClient {
    published_messages: Arc<Mutex<Vec<MockMessage>>>,
    message_sender: Arc<Mutex<Option<mpsc::UnboundedSender<MockMessage>>>>,
    available: Arc<AtomicBool>,
    /// Refuse le publish dont l'index (0-based) est donné
    refuse_at: Arc<Mutex<Option<usize>>>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self {
            published_messages: Arc::new(Mutex::new(Vec::new())),
            message_sender: Arc::new(Mutex::new(None)),
            available: Arc::new(AtomicBool::new(true)),
            refuse_at: Arc::new(Mutex::new(None)),
        }
    }

    /// Configuration d'un channel pour recevoir les messages simulés
    pub fn setup_receiver(&self) -> mpsc::UnboundedReceiver<MockMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.message_sender.lock() = Some(sender);
        receiver
    }

    /// Simule un bus déconnecté : tout publish échoue en `Unavailable`
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn refuse_publish_at(&self, index: usize) {
        *self.refuse_at.lock() = Some(index);
    }

    /// Simule la réception d'un message mesh
    pub fn simulate_incoming<S, V>(&self, topic: S, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
        };
        let sender = self.message_sender.lock();
        let Some(sender) = sender.as_ref() else {
            anyhow::bail!("no receiver set up for simulated messages");
        };
        sender
            .send(message.clone())
            .map_err(|e| anyhow::anyhow!("Send error: {}", e))?;

        tracing::debug!("[mock] simulated incoming: {}", message.topic);
        Ok(())
    }

    /// Récupère tous les messages publiés (pour assertions de tests)
    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().clone()
    }

    /// Trouve les messages publiés sur un topic donné
    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Downlinks publiés, décodés
    pub fn downlinks(&self) -> Result<Vec<Downlink>> {
        self.published_messages
            .lock()
            .iter()
            .map(|msg| serde_json::from_slice(&msg.payload).map_err(anyhow::Error::from))
            .collect()
    }

    /// Parse le dernier message d'un topic en JSON
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        match self.find_messages_by_topic(topic).last() {
            Some(last_msg) => Ok(Some(serde_json::from_slice(&last_msg.payload)?)),
            None => Ok(None),
        }
    }

    /// Reset messages enregistrés et pannes simulées
    pub fn clear(&self) {
        self.published_messages.lock().clear();
        *self.refuse_at.lock() = None;
        self.set_available(true);
    }
}

impl Default for MockMqttClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher for MockMqttClient {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), NetworkError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(NetworkError::Unavailable("mock bus offline".into()));
        }
        let mut published = self.published_messages.lock();
        if *self.refuse_at.lock() == Some(published.len()) {
            return Err(NetworkError::Publish {
                topic: topic.to_string(),
                reason: "refused by mock".into(),
            });
        }
        published.push(MockMessage {
            topic: topic.to_string(),
            payload,
        });
        tracing::debug!("[mock] published to {}", topic);
        Ok(())
    }
}

/// Messages mesh au format JSON de la passerelle
pub struct MeshMessageBuilder {
    topic_root: String,
    channel: String,
}

impl MeshMessageBuilder {
    pub fn new<S: Into<String>>(topic_root: S, channel: S) -> Self {
        Self {
            topic_root: topic_root.into(),
            channel: channel.into(),
        }
    }

    /// Topic uplink d'un nœud, ex: `msh/US/2/json/LongFast/!075bcd15`
    pub fn topic(&self, from: u32) -> String {
        format!("{}/2/json/{}/!{:08x}", self.topic_root, self.channel, from)
    }

    pub fn telemetry(from: u32, payload: Value) -> Value {
        serde_json::json!({
            "from": from,
            "type": "telemetry",
            "timestamp": time::OffsetDateTime::now_utc().unix_timestamp(),
            "payload": payload
        })
    }

    pub fn device_telemetry(from: u32, battery_level: f64, voltage: f64) -> Value {
        Self::telemetry(
            from,
            serde_json::json!({
                "battery_level": battery_level,
                "voltage": voltage,
                "channel_utilization": 4.2,
                "air_util_tx": 0.8,
                "uptime_seconds": 3600
            }),
        )
    }

    pub fn environment_telemetry(from: u32, temperature: f64, relative_humidity: f64, barometric_pressure: f64) -> Value {
        Self::telemetry(
            from,
            serde_json::json!({
                "temperature": temperature,
                "relative_humidity": relative_humidity,
                "barometric_pressure": barometric_pressure
            }),
        )
    }

    pub fn nodeinfo(from: u32, long_name: &str, short_name: &str, hardware: u32, role: u32) -> Value {
        serde_json::json!({
            "from": from,
            "type": "nodeinfo",
            "payload": {
                "longname": long_name,
                "shortname": short_name,
                "hardware": hardware,
                "role": role
            }
        })
    }

    /// Ajoute rssi/snr au niveau de l'enveloppe
    pub fn with_signal(mut message: Value, rssi: f64, snr: f64) -> Value {
        if let Some(obj) = message.as_object_mut() {
            obj.insert("rssi".into(), rssi.into());
            obj.insert("snr".into(), snr.into());
        }
        message
    }
}
