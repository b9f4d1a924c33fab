/**
 * METRIC STORE - État des métriques mesh, exposable en pull (Prometheus)
 *
 * RÔLE :
 * Porte toutes les séries (gauges par nœud, compteur de messages, identité des
 * nœuds) dans un `prometheus::Registry` propre au store. Pas de registry global :
 * le store est construit explicitement puis partagé via `Arc`.
 *
 * FONCTIONNEMENT :
 * - Les familles de séries sont enregistrées une fois dans `new()`
 * - `record_*` est appelable depuis plusieurs threads (last-write-wins par série)
 * - Une gauge n'est écrite que si le champ source est présent (jamais de zéro implicite)
 * - last-seen + compteur de messages sont toujours mis à jour
 * - `snapshot()` / `restore()` : cohérence par série, pas d'atomicité globale
 */

use parking_lot::Mutex;
use prometheus::proto::MetricType;
use prometheus::{GaugeVec, IntCounterVec, Opts, Registry};
use std::collections::{BTreeMap, HashMap};

use crate::error::ProcessingError;
use crate::models::{
    unix_now, NodeInfoRecord, NodeSnapshot, StateSnapshot, TelemetryRecord, UNKNOWN,
};

pub const SNAPSHOT_VERSION: &str = "1.0";
pub const NODE_LABEL: &str = "node_id";
pub const NODE_INFO_METRIC: &str = "meshtastic_node_info";
pub const MESSAGES_METRIC: &str = "meshtastic_messages_total";

const NODE_INFO_LABELS: [&str; 5] = [NODE_LABEL, "long_name", "short_name", "hardware", "role"];

/// Gauges par nœud. Table fermée nom d'exposition ↔ série, utilisée aussi au restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GaugeKind {
    BatteryLevel,
    Voltage,
    Uptime,
    Temperature,
    RelativeHumidity,
    BarometricPressure,
    ChannelUtilization,
    AirUtilTx,
    Rssi,
    Snr,
    LastSeen,
}

impl GaugeKind {
    pub const ALL: [GaugeKind; 11] = [
        GaugeKind::BatteryLevel,
        GaugeKind::Voltage,
        GaugeKind::Uptime,
        GaugeKind::Temperature,
        GaugeKind::RelativeHumidity,
        GaugeKind::BarometricPressure,
        GaugeKind::ChannelUtilization,
        GaugeKind::AirUtilTx,
        GaugeKind::Rssi,
        GaugeKind::Snr,
        GaugeKind::LastSeen,
    ];

    /// Séries supprimées quand un nœud devient silencieux.
    /// rssi/snr, identité et compteurs restent.
    pub const REAPABLE: [GaugeKind; 9] = [
        GaugeKind::BatteryLevel,
        GaugeKind::Voltage,
        GaugeKind::ChannelUtilization,
        GaugeKind::AirUtilTx,
        GaugeKind::Uptime,
        GaugeKind::Temperature,
        GaugeKind::RelativeHumidity,
        GaugeKind::BarometricPressure,
        GaugeKind::LastSeen,
    ];

    pub fn metric_name(&self) -> &'static str {
        match self {
            GaugeKind::BatteryLevel => "meshtastic_battery_level_percent",
            GaugeKind::Voltage => "meshtastic_voltage_volts",
            GaugeKind::Uptime => "meshtastic_uptime_seconds",
            GaugeKind::Temperature => "meshtastic_temperature_celsius",
            GaugeKind::RelativeHumidity => "meshtastic_relative_humidity_percent",
            GaugeKind::BarometricPressure => "meshtastic_barometric_pressure_hpa",
            GaugeKind::ChannelUtilization => "meshtastic_channel_utilization_percent",
            GaugeKind::AirUtilTx => "meshtastic_air_util_tx_percent",
            GaugeKind::Rssi => "meshtastic_rssi_dbm",
            GaugeKind::Snr => "meshtastic_snr_db",
            GaugeKind::LastSeen => "meshtastic_node_last_seen_timestamp_seconds",
        }
    }

    fn help(&self) -> &'static str {
        match self {
            GaugeKind::BatteryLevel => "Battery level reported by the node (percent)",
            GaugeKind::Voltage => "Battery voltage reported by the node (volts)",
            GaugeKind::Uptime => "Node uptime (seconds)",
            GaugeKind::Temperature => "Environment temperature (celsius)",
            GaugeKind::RelativeHumidity => "Environment relative humidity (percent)",
            GaugeKind::BarometricPressure => "Environment barometric pressure (hPa)",
            GaugeKind::ChannelUtilization => "Channel utilization seen by the node (percent)",
            GaugeKind::AirUtilTx => "Transmit airtime utilization (percent)",
            GaugeKind::Rssi => "Received signal strength of the last packet (dBm)",
            GaugeKind::Snr => "Signal to noise ratio of the last packet (dB)",
            GaugeKind::LastSeen => "Unix time of the last message from the node",
        }
    }

    pub fn from_metric_name(name: &str) -> Option<GaugeKind> {
        GaugeKind::ALL.into_iter().find(|k| k.metric_name() == name)
    }
}

/// Labels d'identité d'un nœud (hors node_id)
#[derive(Debug, Clone, PartialEq, Eq)]
struct Identity {
    long_name: String,
    short_name: String,
    hardware: String,
    role: String,
}

impl Identity {
    fn label_values<'a>(&'a self, node_id: &'a str) -> [&'a str; 5] {
        [node_id, &self.long_name, &self.short_name, &self.hardware, &self.role]
    }
}

struct Gauges {
    battery_level: GaugeVec,
    voltage: GaugeVec,
    uptime: GaugeVec,
    temperature: GaugeVec,
    relative_humidity: GaugeVec,
    barometric_pressure: GaugeVec,
    channel_utilization: GaugeVec,
    air_util_tx: GaugeVec,
    rssi: GaugeVec,
    snr: GaugeVec,
    last_seen: GaugeVec,
}

pub struct MetricStore {
    registry: Registry,
    gauges: Gauges,
    messages: IntCounterVec,
    node_info: GaugeVec,
    /// Label set courant de `meshtastic_node_info` par nœud
    identities: Mutex<HashMap<String, Identity>>,
}

impl MetricStore {
    /// Construit le store et enregistre toutes les familles de séries.
    /// La construction n'est pas concurrente ; le store l'est ensuite.
    pub fn new() -> Result<Self, ProcessingError> {
        let registry = Registry::new();
        let gauge = |kind: GaugeKind| -> Result<GaugeVec, ProcessingError> {
            let vec = GaugeVec::new(Opts::new(kind.metric_name(), kind.help()), &[NODE_LABEL])?;
            registry.register(Box::new(vec.clone()))?;
            Ok(vec)
        };

        let gauges = Gauges {
            battery_level: gauge(GaugeKind::BatteryLevel)?,
            voltage: gauge(GaugeKind::Voltage)?,
            uptime: gauge(GaugeKind::Uptime)?,
            temperature: gauge(GaugeKind::Temperature)?,
            relative_humidity: gauge(GaugeKind::RelativeHumidity)?,
            barometric_pressure: gauge(GaugeKind::BarometricPressure)?,
            channel_utilization: gauge(GaugeKind::ChannelUtilization)?,
            air_util_tx: gauge(GaugeKind::AirUtilTx)?,
            rssi: gauge(GaugeKind::Rssi)?,
            snr: gauge(GaugeKind::Snr)?,
            last_seen: gauge(GaugeKind::LastSeen)?,
        };

        let messages = IntCounterVec::new(
            Opts::new(MESSAGES_METRIC, "Messages processed per node and type"),
            &[NODE_LABEL, "type"],
        )?;
        registry.register(Box::new(messages.clone()))?;

        let node_info = GaugeVec::new(
            Opts::new(NODE_INFO_METRIC, "Node identity, value is always 1"),
            &NODE_INFO_LABELS,
        )?;
        registry.register(Box::new(node_info.clone()))?;

        Ok(Self {
            registry,
            gauges,
            messages,
            node_info,
            identities: Mutex::new(HashMap::new()),
        })
    }

    /// Registry à exposer sur `/metrics`
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn gauge(&self, kind: GaugeKind) -> &GaugeVec {
        let g = &self.gauges;
        match kind {
            GaugeKind::BatteryLevel => &g.battery_level,
            GaugeKind::Voltage => &g.voltage,
            GaugeKind::Uptime => &g.uptime,
            GaugeKind::Temperature => &g.temperature,
            GaugeKind::RelativeHumidity => &g.relative_humidity,
            GaugeKind::BarometricPressure => &g.barometric_pressure,
            GaugeKind::ChannelUtilization => &g.channel_utilization,
            GaugeKind::AirUtilTx => &g.air_util_tx,
            GaugeKind::Rssi => &g.rssi,
            GaugeKind::Snr => &g.snr,
            GaugeKind::LastSeen => &g.last_seen,
        }
    }

    fn set(&self, kind: GaugeKind, node_id: &str, value: Option<f64>) {
        if let Some(v) = value {
            self.gauge(kind).with_label_values(&[node_id]).set(v);
        }
    }

    pub fn record_telemetry(&self, record: &TelemetryRecord) {
        let node = record.node_id.as_str();
        self.set(GaugeKind::BatteryLevel, node, record.battery_level);
        self.set(GaugeKind::Voltage, node, record.voltage);
        self.set(GaugeKind::Uptime, node, record.uptime_seconds);
        self.set(GaugeKind::Temperature, node, record.temperature);
        self.set(GaugeKind::RelativeHumidity, node, record.relative_humidity);
        self.set(GaugeKind::BarometricPressure, node, record.barometric_pressure);
        self.set(GaugeKind::ChannelUtilization, node, record.channel_utilization);
        self.set(GaugeKind::AirUtilTx, node, record.air_util_tx);
        self.set(GaugeKind::Rssi, node, record.rssi);
        self.set(GaugeKind::Snr, node, record.snr);
        self.touch(node, record.timestamp, "telemetry");
    }

    pub fn record_node_info(&self, record: &NodeInfoRecord) {
        let identity = Identity {
            long_name: record.long_name.clone(),
            short_name: record.short_name.clone(),
            hardware: record.hardware.clone(),
            role: record.role.clone(),
        };
        self.set_identity(&record.node_id, identity);
        self.touch(&record.node_id, record.timestamp, "nodeinfo");
    }

    fn touch(&self, node_id: &str, timestamp: i64, message_type: &str) {
        self.set(GaugeKind::LastSeen, node_id, Some(timestamp as f64));
        self.messages.with_label_values(&[node_id, message_type]).inc();
    }

    /// Remplace le label set d'identité du nœud (un seul par nœud)
    fn set_identity(&self, node_id: &str, identity: Identity) {
        let mut identities = self.identities.lock();
        if let Some(previous) = identities.get(node_id) {
            if *previous != identity {
                let _ = self.node_info.remove_label_values(&previous.label_values(node_id));
            }
        }
        self.node_info
            .with_label_values(&identity.label_values(node_id))
            .set(1.0);
        identities.insert(node_id.to_string(), identity);
    }

    /// Supprime les séries éphémères d'un nœud. Retourne le nombre de séries supprimées.
    pub fn expire_node(&self, node_id: &str) -> usize {
        GaugeKind::REAPABLE
            .iter()
            .filter(|kind| self.gauge(**kind).remove_label_values(&[node_id]).is_ok())
            .count()
    }

    /// Lecture d'une gauge sans créer la série.
    /// Helper d'inspection (tests, debug) : parcourt tout le registry à chaque appel,
    /// hors du chemin chaud.
    pub fn value(&self, metric_name: &str, node_id: &str) -> Option<f64> {
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == metric_name)
            .flat_map(|family| family.get_metric())
            .find(|metric| {
                metric
                    .get_label()
                    .iter()
                    .any(|l| l.get_name() == NODE_LABEL && l.get_value() == node_id)
            })
            .map(|metric| metric.get_gauge().get_value())
    }

    /// Nombre de messages comptés pour un nœud et un type.
    /// Helper d'inspection, même coût que `value`.
    pub fn message_count(&self, node_id: &str, message_type: &str) -> u64 {
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == MESSAGES_METRIC)
            .flat_map(|family| family.get_metric())
            .find(|metric| {
                let labels = metric.get_label();
                labels.iter().any(|l| l.get_name() == NODE_LABEL && l.get_value() == node_id)
                    && labels.iter().any(|l| l.get_name() == "type" && l.get_value() == message_type)
            })
            .map(|metric| metric.get_counter().get_value() as u64)
            .unwrap_or(0)
    }

    /// Copie de toutes les gauges, groupées par `node_id`.
    /// Les séries sans `node_id` et les compteurs sont ignorés.
    pub fn snapshot(&self) -> StateSnapshot {
        let mut nodes: BTreeMap<String, NodeSnapshot> = BTreeMap::new();
        let now = unix_now();

        for family in self.registry.gather() {
            if family.get_field_type() != MetricType::GAUGE {
                continue;
            }
            let name = family.get_name();
            for metric in family.get_metric() {
                let labels = metric.get_label();
                let Some(node_id) = labels
                    .iter()
                    .find(|l| l.get_name() == NODE_LABEL)
                    .map(|l| l.get_value().to_string())
                else {
                    continue;
                };

                let entry = nodes.entry(node_id.clone()).or_insert_with(|| NodeSnapshot {
                    node_id,
                    timestamp: now,
                    metrics: BTreeMap::new(),
                    labels: BTreeMap::new(),
                });
                entry
                    .metrics
                    .insert(name.to_string(), metric.get_gauge().get_value());

                if name == NODE_INFO_METRIC {
                    for label in labels.iter().filter(|l| l.get_name() != NODE_LABEL) {
                        entry
                            .labels
                            .insert(label.get_name().to_string(), label.get_value().to_string());
                    }
                }
            }
        }

        let last_seen = GaugeKind::LastSeen.metric_name();
        for node in nodes.values_mut() {
            if let Some(ts) = node.metrics.get(last_seen) {
                node.timestamp = *ts as i64;
            }
        }

        StateSnapshot {
            version: SNAPSHOT_VERSION.to_string(),
            timestamp: now,
            nodes: nodes.into_values().collect(),
        }
    }

    /// Rejoue un snapshot. Idempotent. Retourne les ids des nœuds restaurés.
    pub fn restore(&self, snapshot: &StateSnapshot) -> Vec<String> {
        let mut restored = Vec::new();
        for node in &snapshot.nodes {
            if node.node_id.is_empty() {
                continue;
            }
            let mut touched = false;
            for (name, value) in &node.metrics {
                if let Some(kind) = GaugeKind::from_metric_name(name) {
                    self.set(kind, &node.node_id, Some(*value));
                    touched = true;
                } else if name == NODE_INFO_METRIC {
                    self.set_identity(&node.node_id, identity_from_labels(&node.labels));
                    touched = true;
                } else {
                    tracing::debug!(metric = %name, node = %node.node_id, "[store] skipping unknown metric in snapshot");
                }
            }
            if touched {
                restored.push(node.node_id.clone());
            }
        }
        restored
    }

    /// Ids des nœuds présents dans au moins une gauge.
    /// Helper d'inspection : construit un snapshot complet.
    pub fn node_ids(&self) -> Vec<String> {
        self.snapshot().nodes.into_iter().map(|n| n.node_id).collect()
    }
}

fn identity_from_labels(labels: &BTreeMap<String, String>) -> Identity {
    let get = |key: &str, default: &str| {
        labels
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    };
    Identity {
        long_name: get("long_name", ""),
        short_name: get("short_name", ""),
        hardware: get("hardware", UNKNOWN),
        role: get("role", UNKNOWN),
    }
}
