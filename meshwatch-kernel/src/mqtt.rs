/**
 * MQTT - Branchement de l'exporter sur le broker
 *
 * RÔLE :
 * - uplink   : abonnement aux filtres configurés, chaque publish entre dans le pipeline
 * - downlink : `MqttPublisher` implémente `Publisher` pour les alertes
 *
 * FONCTIONNEMENT :
 * - (ré)abonnement à chaque ConnAck, le broker ne garde pas la session
 * - erreur réseau → statut "reconnecting" + pause 2s, rumqttc se reconnecte au poll suivant
 * - publish non bloquant (`try_publish`), échec immédiat si le bus est déconnecté
 */

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::watch;
use tokio::task::{self, JoinHandle};

use crate::alerts::Publisher;
use crate::config::MqttConf;
use crate::error::NetworkError;
use crate::health::HealthTracker;
use crate::pipeline::{Exporter, Outcome};

const RETRY_DELAY: Duration = Duration::from_secs(2);

pub fn client_id(cfg: &MqttConf) -> String {
    if cfg.client_id.trim().is_empty() {
        format!("meshwatch-{}", uuid::Uuid::new_v4().simple())
    } else {
        cfg.client_id.clone()
    }
}

pub fn mqtt_options(cfg: &MqttConf) -> MqttOptions {
    let mut opts = MqttOptions::new(client_id(cfg), &cfg.host, cfg.port);
    opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs.max(5)));
    opts
}

pub fn create_mqtt_client(cfg: &MqttConf) -> (AsyncClient, EventLoop) {
    AsyncClient::new(mqtt_options(cfg), cfg.capacity.max(10))
}

/// Passe un publish entrant dans le pipeline et met à jour les compteurs de santé
pub fn dispatch_incoming(exporter: &Exporter, health: &HealthTracker, topic: &str, payload: &[u8]) {
    match exporter.handle_message(topic, payload) {
        Ok(Outcome::Recorded(record)) => {
            health.record_processed();
            tracing::debug!(node = %record.node_id(), "[mqtt] recorded message from {}", topic);
        }
        Ok(Outcome::Ignored(_)) => health.record_processed(),
        Err(e) if e.is_validation() => {
            health.record_rejected();
            tracing::warn!("[mqtt] rejected message on {}: {}", topic, e);
        }
        Err(e) => {
            health.record_rejected();
            tracing::error!("[mqtt] failed to process message on {}: {}", topic, e);
        }
    }
}

fn subscribe_all(client: &AsyncClient, filters: &[String]) {
    let filters: Vec<&str> = if filters.is_empty() {
        vec!["#"]
    } else {
        filters.iter().map(String::as_str).collect()
    };
    for filter in filters {
        // try_subscribe : on est dans la boucle de poll, un await ici pourrait bloquer
        match client.try_subscribe(filter, QoS::AtMostOnce) {
            Ok(()) => tracing::info!("[mqtt] subscribed to {}", filter),
            Err(e) => tracing::error!("[mqtt] subscribe to {} failed: {}", filter, e),
        }
    }
}

pub fn spawn_mqtt_listener(
    client: AsyncClient,
    mut eventloop: EventLoop,
    exporter: Exporter,
    health: HealthTracker,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    task::spawn(async move {
        loop {
            tokio::select! {
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        tracing::info!("[mqtt] connected to broker");
                        health.mark_mqtt_connected();
                        subscribe_all(&client, exporter.filters());
                    }
                    Ok(Event::Incoming(Packet::Publish(p))) => {
                        dispatch_incoming(&exporter, &health, &p.topic, &p.payload);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!("[mqtt] connection error: {}", e);
                        health.increment_reconnects();
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        health.mark_mqtt_disconnected();
        if let Err(e) = client.try_disconnect() {
            tracing::debug!("[mqtt] disconnect: {}", e);
        }
        tracing::info!("[mqtt] listener stopped");
    })
}

/// Downlink des alertes via le client partagé
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    health: HealthTracker,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient, health: HealthTracker) -> Self {
        Self { client, health }
    }
}

impl Publisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), NetworkError> {
        if !self.health.is_connected() {
            return Err(NetworkError::Unavailable(format!(
                "mqtt is {}",
                self.health.mqtt_status().as_str()
            )));
        }
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| NetworkError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reaper::ActivityTracker;
    use crate::store::MetricStore;
    use std::sync::Arc;

    #[test]
    fn test_client_id_defaults_to_random_suffix() {
        let cfg = MqttConf::default();
        let a = client_id(&cfg);
        let b = client_id(&cfg);
        assert!(a.starts_with("meshwatch-"));
        assert_ne!(a, b);

        let fixed = MqttConf {
            client_id: "exporter-1".into(),
            ..Default::default()
        };
        assert_eq!(client_id(&fixed), "exporter-1");
    }

    #[test]
    fn test_dispatch_incoming_updates_health() {
        let exporter = Exporter::new(
            Arc::new(MetricStore::new().unwrap()),
            ActivityTracker::new(),
            vec!["msh/#".into()],
        );
        let health = HealthTracker::new();

        dispatch_incoming(&exporter, &health, "msh/US", br#"{"from":5,"type":"telemetry","payload":{"snr":3.5}}"#);
        dispatch_incoming(&exporter, &health, "msh/US", b"hello");
        dispatch_incoming(&exporter, &health, "msh/US", br#"{"from":0,"type":"telemetry"}"#);

        let report = health.get_health(exporter.activity().len());
        assert_eq!(report.messages_processed, 2);
        assert_eq!(report.messages_rejected, 1);
        assert_eq!(report.nodes_tracked, 1);
    }

    #[tokio::test]
    async fn test_publisher_fails_fast_when_disconnected() {
        let (client, _eventloop) = create_mqtt_client(&MqttConf::default());
        let health = HealthTracker::new();
        let publisher = MqttPublisher::new(client, health.clone());

        assert!(matches!(
            publisher.publish("msh/US/2/json/LongFast/!00000001", b"{}".to_vec()),
            Err(NetworkError::Unavailable(_))
        ));

        health.mark_mqtt_connected();
        publisher
            .publish("msh/US/2/json/LongFast/!00000001", b"{}".to_vec())
            .unwrap();
    }
}
