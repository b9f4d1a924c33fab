/**
 * ERREURS - Taxonomie des erreurs de l'exporter
 *
 * RÔLE : Une enum par famille (validation, traitement, réseau, config) +
 * une enum racine `Error` qui les englobe pour le pipeline.
 *
 * RÈGLES :
 * - Validation : entrée invalide, loggée, jamais fatale
 *   (sauf `NotJsonLike` qui est avalée comme un succès par le pipeline)
 * - Processing : décodage OK mais échec en aval (registry, snapshot, encodage)
 * - Network : transport indisponible, pas de retry interne
 * - Config : config de démarrage invalide, le binaire décide si c'est fatal
 */

use crate::validator::{MAX_PAYLOAD_BYTES, MAX_TOPIC_LEN};

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("empty topic")]
    EmptyTopic,
    #[error("topic too long ({0} bytes, max {MAX_TOPIC_LEN})")]
    TopicTooLong(usize),
    #[error("topic contains a NUL byte")]
    TopicContainsNul,
    #[error("empty payload")]
    EmptyPayload,
    #[error("payload too large ({0} bytes, max {MAX_PAYLOAD_BYTES})")]
    PayloadTooLarge(usize),
    /// Le payload ne ressemble pas à du JSON : ignoré silencieusement
    #[error("payload is not JSON-like")]
    NotJsonLike,
    #[error("malformed JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("missing 'from' field")]
    MissingSender,
    #[error("invalid 'from' field: {0}")]
    InvalidSender(String),
    #[error("sender id 0 is reserved for unknown senders")]
    ZeroSender,
    #[error("direct alert without target nodes")]
    NoTargets,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("metric registry error: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot file is empty: {0}")]
    EmptySnapshot(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error("publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Processing(#[from] ProcessingError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// Vrai pour les entrées rejetées (pas une panne de l'exporter)
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
