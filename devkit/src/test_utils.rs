/*!
Test Harness pour l'exporter Meshwatch

Monte un pipeline complet sans broker :
- store + tracker d'activité + `Exporter`
- `MockMqttClient` comme bus (uplink simulé, downlink enregistré)
- `AlertDispatcher` branché sur le mock
*/

use crate::mqtt_stub::{MeshMessageBuilder, MockMessage, MockMqttClient};
use meshwatch_kernel::alerts::{dispatch_webhook, Alert, AlertDispatcher, DispatcherSettings, WebhookPayload, WebhookReport};
use meshwatch_kernel::health::HealthTracker;
use meshwatch_kernel::mqtt::dispatch_incoming;
use meshwatch_kernel::{ActivityTracker, Error, Exporter, MetricStore, Outcome, Reaper};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use anyhow::Result;

pub struct TestHarness {
    pub mqtt_client: MockMqttClient,
    pub exporter: Exporter,
    pub health: HealthTracker,
    pub dispatcher: AlertDispatcher,
    pub builder: MeshMessageBuilder,
    incoming: mpsc::UnboundedReceiver<MockMessage>,
}

impl TestHarness {
    /// Harness avec filtre `msh/#` et réglages d'alerte par défaut
    pub fn new() -> Result<Self> {
        Self::with_settings(vec!["msh/#".into()], DispatcherSettings::default())
    }

    pub fn with_settings(filters: Vec<String>, settings: DispatcherSettings) -> Result<Self> {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();

        let store = Arc::new(MetricStore::new()?);
        let exporter = Exporter::new(store, ActivityTracker::new(), filters);
        let mqtt_client = MockMqttClient::new();
        let incoming = mqtt_client.setup_receiver();
        let dispatcher = AlertDispatcher::new(settings).with_publisher(Arc::new(mqtt_client.clone()));

        Ok(Self {
            mqtt_client,
            exporter,
            health: HealthTracker::new(),
            dispatcher,
            builder: MeshMessageBuilder::new("msh/US", "LongFast"),
            incoming,
        })
    }

    pub fn store(&self) -> &MetricStore {
        self.exporter.store()
    }

    /// Envoie un message mesh directement dans le pipeline, sur le topic du nœud
    pub fn send_mesh(&self, message: &Value) -> Result<Outcome, Error> {
        let from = message
            .get("from")
            .and_then(Value::as_u64)
            .and_then(|id| u32::try_from(id).ok())
            .unwrap_or_default();
        let payload = serde_json::to_vec(message).map_err(meshwatch_kernel::ProcessingError::from)?;
        self.exporter.handle_message(&self.builder.topic(from), &payload)
    }

    pub fn send_raw(&self, topic: &str, payload: &[u8]) -> Result<Outcome, Error> {
        self.exporter.handle_message(topic, payload)
    }

    /// Vide les messages simulés sur le mock comme le ferait le listener MQTT
    pub fn process_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(msg) = self.incoming.try_recv() {
            dispatch_incoming(&self.exporter, &self.health, &msg.topic, &msg.payload);
            count += 1;
        }
        tracing::debug!("[harness] processed {} simulated messages", count);
        count
    }

    /// Un passage du reaper à `now` avec le ttl donné
    pub fn reap_at(&self, ttl: Duration, now: Instant) -> Vec<String> {
        Reaper::new(self.exporter.store().clone(), self.exporter.activity().clone(), ttl).sweep_at(now)
    }

    pub fn send_alert(&self, alert: &Alert) -> Result<usize, Error> {
        self.dispatcher.send_alert(alert)
    }

    pub fn send_webhook(&self, payload: Value) -> Result<WebhookReport> {
        let payload: WebhookPayload = serde_json::from_value(payload)?;
        Ok(dispatch_webhook(&self.dispatcher, &payload))
    }

    /// Assert qu'une série a la valeur attendue
    pub fn assert_metric(&self, metric: &str, node_id: &str, expected: f64) -> Result<()> {
        match self.store().value(metric, node_id) {
            Some(actual) if (actual - expected).abs() < 1e-9 => Ok(()),
            Some(actual) => anyhow::bail!("{}{{node_id={}}}: expected {}, got {}", metric, node_id, expected, actual),
            None => anyhow::bail!("{}{{node_id={}}} not found", metric, node_id),
        }
    }

    pub fn assert_metric_absent(&self, metric: &str, node_id: &str) -> Result<()> {
        if let Some(v) = self.store().value(metric, node_id) {
            anyhow::bail!("{}{{node_id={}}} still present ({})", metric, node_id, v);
        }
        Ok(())
    }

    /// Stats sur les downlinks publiés
    pub fn get_stats(&self) -> TestStats {
        let messages = self.mqtt_client.get_published_messages();
        let mut topic_counts = HashMap::new();
        for msg in &messages {
            *topic_counts.entry(msg.topic.clone()).or_insert(0) += 1;
        }
        TestStats {
            total_messages: messages.len(),
            topic_counts,
            nodes_tracked: self.exporter.activity().len(),
        }
    }

    /// Reset du mock (le store est gardé)
    pub fn reset(&mut self) {
        self.mqtt_client.clear();
        while self.incoming.try_recv().is_ok() {}
    }
}

#[derive(Debug)]
pub struct TestStats {
    pub total_messages: usize,
    pub topic_counts: HashMap<String, usize>,
    pub nodes_tracked: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshwatch_kernel::alerts::DeliveryMode;
    use meshwatch_kernel::models::BROADCAST_NODE_ID;
    use meshwatch_kernel::{GaugeKind, IgnoreReason, Record, TelemetrySubtype};

    const BATTERY: &str = "meshtastic_battery_level_percent";

    #[test]
    fn test_scenarios_end_to_end() {
        let harness = TestHarness::new().unwrap();

        // A
        let a = serde_json::json!({"from":123456789,"type":"telemetry","payload":{"battery_level":85.5,"temperature":23.4,"voltage":4.1}});
        let Outcome::Recorded(Record::Telemetry(t)) = harness.send_mesh(&a).unwrap() else {
            panic!("scenario A should record telemetry");
        };
        assert_eq!(t.subtype, TelemetrySubtype::Environment);
        harness.assert_metric(BATTERY, "123456789", 85.5).unwrap();
        harness.assert_metric("meshtastic_voltage_volts", "123456789", 4.1).unwrap();
        harness.assert_metric("meshtastic_temperature_celsius", "123456789", 23.4).unwrap();

        // B
        let b = serde_json::json!({"from":123456789,"type":"nodeinfo","payload":{"longname":"Test Node","shortname":"TN01","hardware":1.0,"role":2.0}});
        let Outcome::Recorded(Record::NodeInfo(n)) = harness.send_mesh(&b).unwrap() else {
            panic!("scenario B should record node info");
        };
        assert_eq!((n.hardware.as_str(), n.role.as_str()), ("1", "2"));
        let snapshot = harness.store().snapshot();
        let node = snapshot.nodes.iter().find(|n| n.node_id == "123456789").unwrap();
        assert_eq!(node.labels["long_name"], "Test Node");

        // C
        let c = harness.send_raw("msh/US/2/json/LongFast/!1", br#"{"from":"invalid","type":"telemetry","payload":{}}"#);
        assert!(c.unwrap_err().is_validation());

        // D
        assert_eq!(
            harness.send_raw("msh/US/anything", b"plain text").unwrap(),
            Outcome::Ignored(IgnoreReason::NotJsonLike)
        );
        assert_eq!(harness.store().node_ids(), vec!["123456789".to_string()]);
    }

    #[test]
    fn test_simulated_bus_feeds_pipeline() {
        let mut harness = TestHarness::new().unwrap();
        let topic = harness.builder.topic(42);
        let msg = MeshMessageBuilder::with_signal(MeshMessageBuilder::device_telemetry(42, 90.0, 4.123), -101.0, 7.25);
        harness.mqtt_client.simulate_incoming(topic.clone(), serde_json::to_vec(&msg).unwrap()).unwrap();
        harness.mqtt_client.simulate_incoming(topic, b"{\"from\":0}".to_vec()).unwrap();
        harness.mqtt_client.simulate_incoming("other/root", b"{}".to_vec()).unwrap();

        assert_eq!(harness.process_pending(), 3);
        harness.assert_metric(BATTERY, "42", 90.0).unwrap();
        harness.assert_metric("meshtastic_voltage_volts", "42", 4.12).unwrap();
        harness.assert_metric("meshtastic_rssi_dbm", "42", -101.0).unwrap();
        harness.assert_metric("meshtastic_snr_db", "42", 7.25).unwrap();

        let health = harness.health.get_health(harness.get_stats().nodes_tracked);
        assert_eq!(health.messages_processed, 2);
        assert_eq!(health.messages_rejected, 1);
        assert_eq!(health.nodes_tracked, 1);
    }

    #[test]
    fn test_silent_node_is_reaped_but_keeps_identity() {
        let harness = TestHarness::new().unwrap();
        harness.send_mesh(&MeshMessageBuilder::device_telemetry(9, 50.0, 3.9)).unwrap();
        harness
            .send_mesh(&MeshMessageBuilder::with_signal(MeshMessageBuilder::nodeinfo(9, "Relay", "RL", 4, 1), -80.0, 2.0))
            .unwrap();

        let ttl = Duration::from_secs(600);
        assert!(harness.reap_at(ttl, Instant::now()).is_empty());
        let expired = harness.reap_at(ttl, Instant::now() + ttl + Duration::from_secs(1));
        assert_eq!(expired, vec!["9".to_string()]);

        for kind in GaugeKind::REAPABLE {
            harness.assert_metric_absent(kind.metric_name(), "9").unwrap();
        }
        let snapshot = harness.store().snapshot();
        let node = snapshot.nodes.iter().find(|n| n.node_id == "9").unwrap();
        assert_eq!(node.labels["short_name"], "RL");
        assert_eq!(harness.store().message_count("9", "telemetry"), 1);
    }

    #[test]
    fn test_broadcast_alert_reaches_mock_bus() {
        let harness = TestHarness::with_settings(
            vec!["msh/#".into()],
            DispatcherSettings {
                from_node: 0x0a0b0c0d,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(harness.send_alert(&Alert::new("critical", "relay offline")).unwrap(), 1);
        let messages = harness.mqtt_client.find_messages_by_topic("msh/US/2/json/LongFast/!0a0b0c0d");
        assert_eq!(messages.len(), 1);
        let downlinks = harness.mqtt_client.downlinks().unwrap();
        assert_eq!(downlinks[0].to, BROADCAST_NODE_ID);
        assert_eq!(downlinks[0].payload, "[ALERT] relay offline");
    }

    #[test]
    fn test_direct_alert_with_bus_failures() {
        let mut harness = TestHarness::new().unwrap();
        let mut alert = Alert::new("warning", "check antenna");
        alert.mode = Some(DeliveryMode::Direct);
        alert.target_nodes = vec![1, 2, 3];

        harness.mqtt_client.refuse_publish_at(2);
        assert!(harness.send_alert(&alert).is_err());
        assert_eq!(harness.get_stats().total_messages, 2);

        harness.reset();
        harness.mqtt_client.set_available(false);
        assert!(matches!(harness.send_alert(&alert), Err(Error::Network(_))));
        assert_eq!(harness.get_stats().total_messages, 0);
    }

    #[test]
    fn test_webhook_batch() {
        let harness = TestHarness::new().unwrap();
        let report = harness
            .send_webhook(serde_json::json!({
                "status": "firing",
                "alerts": [
                    {"status": "firing", "labels": {"alertname": "LowBattery", "targets": "!0000002a"},
                     "annotations": {"summary": "node 42 under 10%"}},
                    {"status": "resolved", "labels": {"alertname": "NodeDown", "mode": "direct", "targets": "7,8"}},
                    {"status": "firing", "labels": {"alertname": "Orphan", "mode": "direct"}}
                ]
            }))
            .unwrap();

        assert_eq!(report.received, 3);
        assert_eq!(report.sent, 2);
        assert_eq!(report.failed, 1);

        let downlinks = harness.mqtt_client.downlinks().unwrap();
        assert_eq!(downlinks.len(), 3);
        assert_eq!(downlinks[0].payload, "[ALERT] 🚨 firing: LowBattery - node 42 under 10%");
        assert_eq!(downlinks[0].to, BROADCAST_NODE_ID);
        assert_eq!(downlinks[1].to, 7);
        assert_eq!(downlinks[2].to, 8);
        assert!(downlinks[1].payload.starts_with("[ALERT] ✅ resolved: NodeDown"));
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let path = path.to_str().unwrap();

        let before = TestHarness::new().unwrap();
        before.send_mesh(&MeshMessageBuilder::environment_telemetry(3, 21.456, 40.0, 1013.25)).unwrap();
        before.send_mesh(&MeshMessageBuilder::nodeinfo(3, "Garden", "GD", 43, 0)).unwrap();
        before.exporter.save_state(path).await.unwrap();

        let after = TestHarness::new().unwrap();
        assert_eq!(after.exporter.load_state(path).await.unwrap(), 1);
        after.assert_metric("meshtastic_temperature_celsius", "3", 21.46).unwrap();
        after.assert_metric("meshtastic_barometric_pressure_hpa", "3", 1013.25).unwrap();
        assert_eq!(after.get_stats().nodes_tracked, 1);
        assert_eq!(after.store().snapshot().nodes, before.store().snapshot().nodes);
        assert_eq!(after.store().message_count("3", "telemetry"), 0);
    }
}
