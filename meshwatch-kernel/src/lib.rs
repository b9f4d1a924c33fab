/**
 * MESHWATCH KERNEL - Exporter Prometheus pour la télémétrie d'un mesh LoRa
 *
 * Chaîne : bus MQTT → filtre topic → validation → parsing → extraction → store
 * À côté : snapshot JSON du store, reaper des nœuds silencieux, alertes downlink.
 */

pub mod alerts;
pub mod config;
pub mod error;
pub mod extract;
pub mod health;
pub mod http;
pub mod models;
pub mod mqtt;
pub mod parser;
pub mod pipeline;
pub mod reaper;
pub mod schedule;
pub mod snapshot;
pub mod store;
pub mod topic;
pub mod validator;

pub use alerts::{Alert, AlertDispatcher, DeliveryMode, DispatcherSettings, Publisher};
pub use error::{ConfigError, Error, NetworkError, ProcessingError, Result, ValidationError};
pub use models::{NodeInfoRecord, ParsedMessage, Record, StateSnapshot, TelemetryRecord, TelemetrySubtype};
pub use pipeline::{Exporter, IgnoreReason, Outcome};
pub use reaper::{ActivityTracker, Reaper};
pub use store::{GaugeKind, MetricStore};
