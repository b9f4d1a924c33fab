/**
 * CONFIG - Configuration YAML de l'exporter
 *
 * Fichier : `$MESHWATCH_CONFIG` (défaut `meshwatch.yaml`).
 * Fichier absent → valeurs par défaut ; YAML invalide → `ConfigError`.
 *
 * ```yaml
 * mqtt: { host: localhost, port: 1883 }
 * topics: ["msh/#"]
 * state: { path: ./data/state.json, save_interval_secs: 60 }
 * reaper: { ttl_secs: 1800 }
 * alerts: { channel: LongFast, mode: broadcast, from_node: 0x1234abcd, targets: [] }
 * http: { listen: "0.0.0.0:9464" }
 * ```
 *
 * `alerts.from_node` absent → alertes downlink désactivées (`/alerts` en 503).
 */

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::alerts::{self, DeliveryMode, DispatcherSettings};
use crate::error::ConfigError;
use crate::reaper;

pub const CONFIG_ENV: &str = "MESHWATCH_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "meshwatch.yaml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    pub mqtt: MqttConf,
    pub topics: TopicsConf,
    pub state: StateConf,
    pub reaper: ReaperConf,
    pub alerts: AlertsConf,
    pub http: HttpConf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    /// Vide → `meshwatch-<uuid>`
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub capacity: usize,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: String::new(),
            keep_alive_secs: 15,
            capacity: 100,
        }
    }
}

/// Liste de filtres MQTT (`+`, `#`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicsConf(pub Vec<String>);

impl Default for TopicsConf {
    fn default() -> Self {
        Self(vec!["msh/#".into()])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConf {
    /// Vide → pas de persistance
    pub path: String,
    pub save_interval_secs: u64,
}

impl Default for StateConf {
    fn default() -> Self {
        Self {
            path: "./data/state.json".into(),
            save_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConf {
    /// 0 → expiration désactivée
    pub ttl_secs: u64,
    /// Absent → ttl/6
    pub interval_secs: Option<u64>,
}

impl Default for ReaperConf {
    fn default() -> Self {
        Self {
            ttl_secs: reaper::DEFAULT_TTL.as_secs(),
            interval_secs: None,
        }
    }
}

impl ReaperConf {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn interval(&self) -> Duration {
        self.interval_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| reaper::default_interval(self.ttl()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConf {
    pub channel: String,
    pub mode: String,
    /// Nœud émetteur des downlinks, non nul
    pub from_node: Option<u32>,
    pub targets: Vec<u32>,
    pub topic_root: String,
    pub max_text_len: usize,
}

impl Default for AlertsConf {
    fn default() -> Self {
        Self {
            channel: alerts::DEFAULT_CHANNEL.into(),
            mode: "broadcast".into(),
            from_node: None,
            targets: Vec::new(),
            topic_root: alerts::DEFAULT_TOPIC_ROOT.into(),
            max_text_len: alerts::DEFAULT_MAX_TEXT_LEN,
        }
    }
}

impl AlertsConf {
    /// `None` tant que `from_node` n'est pas configuré
    pub fn dispatcher_settings(&self) -> Option<DispatcherSettings> {
        Some(DispatcherSettings {
            channel: self.channel.clone(),
            mode: DeliveryMode::parse(&self.mode).unwrap_or(DeliveryMode::Broadcast),
            targets: self.targets.clone(),
            from_node: self.from_node?,
            topic_root: self.topic_root.clone(),
            max_text_len: self.max_text_len,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConf {
    pub listen: String,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:9464".into(),
        }
    }
}

impl ExporterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.host.trim().is_empty() {
            return Err(ConfigError::Invalid("mqtt.host is empty".into()));
        }
        if self.mqtt.port == 0 {
            return Err(ConfigError::Invalid("mqtt.port must be non-zero".into()));
        }
        if let Some(interval) = self.reaper.interval_secs {
            if self.reaper.ttl_secs > 0 && interval >= self.reaper.ttl_secs {
                return Err(ConfigError::Invalid(format!(
                    "reaper.interval_secs ({interval}) must be shorter than reaper.ttl_secs ({})",
                    self.reaper.ttl_secs
                )));
            }
        }
        if self.state.save_interval_secs == 0 {
            return Err(ConfigError::Invalid("state.save_interval_secs must be non-zero".into()));
        }
        if self.alerts.max_text_len < alerts::MIN_TEXT_LEN {
            return Err(ConfigError::Invalid(format!(
                "alerts.max_text_len ({}) must be at least {}",
                self.alerts.max_text_len,
                alerts::MIN_TEXT_LEN
            )));
        }
        if self.alerts.from_node == Some(0) {
            return Err(ConfigError::Invalid("alerts.from_node must be non-zero".into()));
        }
        self.listen_addr()?;
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.http
            .listen
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("http.listen '{}': {e}", self.http.listen)))
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.state.save_interval_secs)
    }
}

/// Charge la config depuis `$MESHWATCH_CONFIG` ou `meshwatch.yaml`
pub async fn load_config() -> Result<ExporterConfig, ConfigError> {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    load_config_from(&path).await
}

pub async fn load_config_from(path: &str) -> Result<ExporterConfig, ConfigError> {
    let exists = tokio::fs::try_exists(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
    if !exists {
        tracing::warn!("[config] no {}, using default config", path);
        return Ok(ExporterConfig::default());
    }
    let txt = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
    if txt.trim().is_empty() {
        return Ok(ExporterConfig::default());
    }
    serde_yaml::from_str(&txt).map_err(|source| ConfigError::Parse {
        path: path.to_string(),
        source,
    })
}
