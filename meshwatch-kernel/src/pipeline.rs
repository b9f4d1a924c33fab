/**
 * PIPELINE - Chemin chaud d'un message du bus
 *
 * FONCTIONNEMENT :
 * filtre topic → validation → parsing → extraction → store (+ activité pour le reaper)
 *
 * Issues "silencieuses" (succès sans record) :
 * - topic hors filtres
 * - payload pas JSON-like
 * - type de message non géré
 * Tout le reste remonte en `Error` ; aucun message n'attend un autre.
 */

use std::sync::Arc;

use crate::error::{Error, ProcessingError, ValidationError};
use crate::extract;
use crate::models::Record;
use crate::parser;
use crate::reaper::ActivityTracker;
use crate::snapshot;
use crate::store::MetricStore;
use crate::topic;
use crate::validator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    TopicFiltered,
    NotJsonLike,
    UnhandledType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Recorded(Record),
    Ignored(IgnoreReason),
}

#[derive(Clone)]
pub struct Exporter {
    store: Arc<MetricStore>,
    activity: ActivityTracker,
    filters: Vec<String>,
}

impl Exporter {
    /// `filters` vide = tous les topics acceptés
    pub fn new(store: Arc<MetricStore>, activity: ActivityTracker, filters: Vec<String>) -> Self {
        Self {
            store,
            activity,
            filters,
        }
    }

    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    pub fn activity(&self) -> &ActivityTracker {
        &self.activity
    }

    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    pub fn handle_message(&self, topic: &str, payload: &[u8]) -> Result<Outcome, Error> {
        if !topic::matches_any(topic, &self.filters) {
            tracing::debug!("[pipeline] {} outside topic filters", topic);
            return Ok(Outcome::Ignored(IgnoreReason::TopicFiltered));
        }

        let envelope = match validator::validate(topic, payload) {
            Ok(envelope) => envelope,
            Err(ValidationError::NotJsonLike) => {
                tracing::debug!("[pipeline] non-JSON payload on {} ignored", topic);
                return Ok(Outcome::Ignored(IgnoreReason::NotJsonLike));
            }
            Err(e) => return Err(e.into()),
        };

        let message = parser::parse(&envelope)?;
        let Some(record) = extract::extract(&message) else {
            tracing::debug!(
                "[pipeline] unhandled message type '{}' from {}",
                message.message_type.as_str(),
                message.node_id()
            );
            return Ok(Outcome::Ignored(IgnoreReason::UnhandledType));
        };

        // écriture + activité sous la garde du reaper : un sweep concurrent ne peut
        // pas effacer ce record entre les deux
        self.activity.record(record.node_id(), || match &record {
            Record::Telemetry(r) => self.store.record_telemetry(r),
            Record::NodeInfo(r) => self.store.record_node_info(r),
        });
        Ok(Outcome::Recorded(record))
    }

    /// Restaure le snapshot et réarme l'activité des nœuds restaurés :
    /// un nœud restauré puis silencieux finit reapé comme les autres.
    pub async fn load_state(&self, path: &str) -> Result<usize, ProcessingError> {
        let restored = snapshot::load(&self.store, path).await?;
        for node_id in &restored {
            self.activity.touch(node_id);
        }
        Ok(restored.len())
    }

    pub async fn save_state(&self, path: &str) -> Result<(), ProcessingError> {
        snapshot::save(&self.store, path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TelemetrySubtype;
    use crate::store::GaugeKind;

    fn exporter(filters: &[&str]) -> Exporter {
        Exporter::new(
            Arc::new(MetricStore::new().unwrap()),
            ActivityTracker::new(),
            filters.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_scenario_a_environment_telemetry() {
        let ex = exporter(&["msh/#"]);
        let payload = br#"{"from":123456789,"type":"telemetry","payload":{"battery_level":85.5,"temperature":23.4,"voltage":4.1}}"#;

        let Outcome::Recorded(Record::Telemetry(record)) =
            ex.handle_message("msh/US/2/json/LongFast/!075bcd15", payload).unwrap()
        else {
            panic!("expected a telemetry record");
        };
        assert_eq!(record.node_id, "123456789");
        assert_eq!(record.subtype, TelemetrySubtype::Environment);
        assert_eq!(record.battery_level, Some(85.5));
        assert_eq!(record.voltage, Some(4.1));
        assert_eq!(record.temperature, Some(23.4));

        let store = ex.store();
        assert_eq!(store.value(GaugeKind::BatteryLevel.metric_name(), "123456789"), Some(85.5));
        assert_eq!(store.message_count("123456789", "telemetry"), 1);
        assert!(ex.activity().contains("123456789"));
    }

    #[test]
    fn test_scenario_b_nodeinfo() {
        let ex = exporter(&[]);
        let payload = br#"{"from":123456789,"type":"nodeinfo","payload":{"longname":"Test Node","shortname":"TN01","hardware":1.0,"role":2.0}}"#;

        let Outcome::Recorded(Record::NodeInfo(record)) = ex.handle_message("msh/x", payload).unwrap()
        else {
            panic!("expected a nodeinfo record");
        };
        assert_eq!(record.long_name, "Test Node");
        assert_eq!(record.short_name, "TN01");
        assert_eq!(record.hardware, "1");
        assert_eq!(record.role, "2");
        assert_eq!(ex.store().message_count("123456789", "nodeinfo"), 1);
    }

    #[test]
    fn test_scenario_c_invalid_sender() {
        let ex = exporter(&["msh/#"]);
        let err = ex
            .handle_message("msh/x", br#"{"from":"invalid","type":"telemetry","payload":{}}"#)
            .unwrap_err();
        assert!(err.is_validation());
        assert!(ex.store().node_ids().is_empty());
        assert!(ex.activity().is_empty());
    }

    #[test]
    fn test_scenario_d_plain_text_is_ignored() {
        let ex = exporter(&["#"]);
        assert_eq!(
            ex.handle_message("any/topic", b"plain text").unwrap(),
            Outcome::Ignored(IgnoreReason::NotJsonLike)
        );
        assert!(ex.store().node_ids().is_empty());
    }

    #[test]
    fn test_zero_sender_writes_nothing() {
        let ex = exporter(&[]);
        let err = ex
            .handle_message("msh/x", br#"{"from":0,"type":"telemetry","payload":{"battery_level":50}}"#)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::ZeroSender)));
        assert!(ex.store().node_ids().is_empty());
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let ex = exporter(&[]);
        let err = ex.handle_message("msh/x", br#"{"from":1,"#).unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::MalformedJson(_))));
    }

    #[test]
    fn test_filtered_topic_and_unknown_type() {
        let ex = exporter(&["msh/+/2/json/#"]);
        let payload = br#"{"from":42,"type":"telemetry","payload":{"battery_level":50}}"#;
        assert_eq!(
            ex.handle_message("other/US/2/json/x", payload).unwrap(),
            Outcome::Ignored(IgnoreReason::TopicFiltered)
        );

        let position = br#"{"from":42,"type":"position","payload":{"latitude_i":1}}"#;
        assert_eq!(
            ex.handle_message("msh/US/2/json/LongFast", position).unwrap(),
            Outcome::Ignored(IgnoreReason::UnhandledType)
        );
        assert!(ex.store().node_ids().is_empty());
    }

    #[tokio::test]
    async fn test_load_state_seeds_activity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let path = path.to_str().unwrap();

        let source = exporter(&[]);
        source
            .handle_message("msh/x", br#"{"from":7,"type":"telemetry","payload":{"battery_level":12}}"#)
            .unwrap();
        source.save_state(path).await.unwrap();

        let restored = exporter(&[]);
        assert_eq!(restored.load_state(path).await.unwrap(), 1);
        assert!(restored.activity().contains("7"));
        assert_eq!(restored.store().value(GaugeKind::BatteryLevel.metric_name(), "7"), Some(12.0));
    }
}
