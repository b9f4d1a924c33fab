/**
 * ALERTS - Alertes opérateur renvoyées sur le mesh (downlink)
 *
 * RÔLE :
 * Transforme une alerte (souvent issue d'un webhook Alertmanager) en messages
 * texte publiés sur le bus, que la passerelle MQTT réinjecte dans le mesh.
 *
 * FONCTIONNEMENT :
 * - broadcast : un seul message vers l'id 0xFFFFFFFF
 * - direct    : un message par nœud cible, arrêt au premier échec (pas transactionnel)
 * - channel/mode/targets vides → valeurs par défaut du dispatcher
 * - pas de file d'attente ni de retry : transport absent = échec immédiat
 *
 * DOWNLINK :
 * topic   `<topic_root>/2/json/<channel>/!<from en hex>`
 * payload `{"type":"text","payload":"[ALERT] ...","from":<id>,"to":<id>}`
 */

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, NetworkError, ProcessingError, ValidationError};
use crate::models::{unix_now, BROADCAST_NODE_ID};

pub const ALERT_PREFIX: &str = "[ALERT] ";
pub const DEFAULT_CHANNEL: &str = "LongFast";
pub const DEFAULT_TOPIC_ROOT: &str = "msh/US";
pub const DEFAULT_MAX_TEXT_LEN: usize = 200;
/// Plus petite limite qui garde le préfixe et l'ellipse
pub const MIN_TEXT_LEN: usize = ALERT_PREFIX.len() + ELLIPSIS.len();
const ELLIPSIS: &str = "...";
/// Longueur max du texte formaté depuis un webhook
pub const WEBHOOK_TEXT_LEN: usize = 200;

/// Handle de publication sur le bus (MQTT en prod, mock en test).
/// Synchrone et non bloquant : un transport indisponible échoue tout de suite.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), NetworkError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    Broadcast,
    Direct,
}

impl DeliveryMode {
    /// "broadcast" (insensible à la casse) → Broadcast, tout autre mode → Direct
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            None
        } else if raw.eq_ignore_ascii_case("broadcast") {
            Some(DeliveryMode::Broadcast)
        } else {
            Some(DeliveryMode::Direct)
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMode::Broadcast => f.write_str("broadcast"),
            DeliveryMode::Direct => f.write_str("direct"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: String,
    pub message: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub mode: Option<DeliveryMode>,
    #[serde(default)]
    pub target_nodes: Vec<u32>,
    pub timestamp: i64,
}

impl Alert {
    pub fn new(severity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: severity.into(),
            message: message.into(),
            channel: None,
            mode: None,
            target_nodes: Vec::new(),
            timestamp: unix_now(),
        }
    }
}

/// Message downlink tel que publié sur le bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Downlink {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: String,
    pub from: u32,
    pub to: u32,
}

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub channel: String,
    pub mode: DeliveryMode,
    pub targets: Vec<u32>,
    pub from_node: u32,
    pub topic_root: String,
    pub max_text_len: usize,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.into(),
            mode: DeliveryMode::Broadcast,
            targets: Vec::new(),
            from_node: 0,
            topic_root: DEFAULT_TOPIC_ROOT.into(),
            max_text_len: DEFAULT_MAX_TEXT_LEN,
        }
    }
}

pub struct AlertDispatcher {
    settings: DispatcherSettings,
    publisher: Option<Arc<dyn Publisher>>,
}

impl AlertDispatcher {
    pub fn new(settings: DispatcherSettings) -> Self {
        Self {
            settings,
            publisher: None,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// Topic downlink pour un canal donné
    pub fn downlink_topic(&self, channel: &str) -> String {
        format!(
            "{}/2/json/{}/!{:08x}",
            self.settings.topic_root.trim_end_matches('/'),
            channel,
            self.settings.from_node
        )
    }

    /// Publie l'alerte. Retourne le nombre de messages envoyés.
    pub fn send_alert(&self, alert: &Alert) -> Result<usize, Error> {
        let publisher = self
            .publisher
            .as_ref()
            .ok_or_else(|| NetworkError::Unavailable("no publisher attached".into()))?;

        let channel = alert
            .channel
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(&self.settings.channel);
        let mode = alert.mode.unwrap_or(self.settings.mode);
        let topic = self.downlink_topic(channel);
        let text = truncate(&format!("{ALERT_PREFIX}{}", alert.message), self.settings.max_text_len);

        let recipients: Vec<u32> = match mode {
            DeliveryMode::Broadcast => vec![BROADCAST_NODE_ID],
            DeliveryMode::Direct => {
                let targets = if alert.target_nodes.is_empty() {
                    &self.settings.targets
                } else {
                    &alert.target_nodes
                };
                if targets.is_empty() {
                    return Err(ValidationError::NoTargets.into());
                }
                targets.clone()
            }
        };

        let mut sent = 0;
        for to in recipients {
            let downlink = Downlink {
                kind: "text".into(),
                payload: text.clone(),
                from: self.settings.from_node,
                to,
            };
            let payload = serde_json::to_vec(&downlink).map_err(ProcessingError::from)?;
            // direct : on s'arrête au premier échec, les cibles restantes ne sont pas servies
            publisher.publish(&topic, payload)?;
            sent += 1;
        }

        tracing::info!(
            severity = %alert.severity,
            "[alerts] sent {} alert message(s) on {} ({})",
            sent,
            channel,
            mode
        );
        Ok(sent)
    }
}

/// Coupe à `max` caractères (frontière de caractère), "..." inclus.
/// Jamais plus de `max` caractères : sous 3, pas d'ellipse.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    if max < ELLIPSIS.len() {
        return text.chars().take(max).collect();
    }
    let mut out: String = text.chars().take(max - ELLIPSIS.len()).collect();
    out.push_str(ELLIPSIS);
    out
}

// ──────────────────────────────────────────────
// Webhook Alertmanager
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub alerts: Vec<WebhookAlert>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookAlert {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

impl WebhookAlert {
    /// `"<emoji> <status>: <alertname>[ - <summary>]"`, 🚨 firing / ✅ sinon
    pub fn text(&self) -> String {
        let emoji = if self.status.eq_ignore_ascii_case("firing") {
            "🚨"
        } else {
            "✅"
        };
        let name = self
            .labels
            .get("alertname")
            .map(String::as_str)
            .unwrap_or("alert");
        let mut text = format!("{emoji} {}: {name}", self.status);
        if let Some(summary) = self.annotations.get("summary").filter(|s| !s.is_empty()) {
            text.push_str(" - ");
            text.push_str(summary);
        }
        truncate(&text, WEBHOOK_TEXT_LEN)
    }

    pub fn to_alert(&self) -> Alert {
        let mut alert = Alert::new(
            self.labels
                .get("severity")
                .cloned()
                .unwrap_or_else(|| "unknown".into()),
            self.text(),
        );
        alert.channel = self.labels.get("channel").cloned();
        alert.mode = self.labels.get("mode").and_then(|m| DeliveryMode::parse(m));
        if let Some(raw) = self.labels.get("targets") {
            alert.target_nodes = parse_node_list(raw);
        }
        alert
    }
}

/// Bilan d'un webhook : une alerte par item, les échecs ne stoppent pas le lot
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookReport {
    pub received: usize,
    pub sent: usize,
    pub failed: usize,
}

pub fn dispatch_webhook(dispatcher: &AlertDispatcher, payload: &WebhookPayload) -> WebhookReport {
    let mut report = WebhookReport {
        received: payload.alerts.len(),
        ..Default::default()
    };
    for item in &payload.alerts {
        match dispatcher.send_alert(&item.to_alert()) {
            Ok(_) => report.sent += 1,
            Err(e) => {
                tracing::warn!("[alerts] webhook alert dropped: {}", e);
                report.failed += 1;
            }
        }
    }
    report
}

/// Ids de nœuds séparés par des virgules : décimal ou `!hex`
pub fn parse_node_list(raw: &str) -> Vec<u32> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.strip_prefix('!') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => s.parse().ok(),
        })
        .filter(|id| *id != 0)
        .collect()
}
