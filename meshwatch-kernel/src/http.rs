/**
 * API HTTP MESHWATCH - Surface d'exposition de l'exporter
 *
 * ROUTES :
 * - GET  /health   état du process (uptime, MQTT, compteurs pipeline)
 * - GET  /metrics  exposition texte Prometheus du store
 * - POST /alerts   webhook Alertmanager → alertes downlink sur le mesh
 *
 * Pas d'auth : l'exporter est prévu derrière le réseau de supervision.
 */

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use prometheus::{Encoder, TextEncoder};

use crate::alerts::{dispatch_webhook, AlertDispatcher, WebhookPayload, WebhookReport};
use crate::health::{ExporterHealth, HealthTracker};
use crate::pipeline::Exporter;

#[derive(Clone)]
pub struct AppState {
    pub exporter: Exporter,
    pub health: HealthTracker,
    pub dispatcher: Arc<AlertDispatcher>,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/metrics", get(get_metrics))
        .route("/alerts", post(post_alerts))
        .with_state(app_state)
}

// GET /health
async fn get_health(State(app): State<AppState>) -> Json<ExporterHealth> {
    Json(app.health.get_health(app.exporter.activity().len()))
}

// GET /metrics
async fn get_metrics(State(app): State<AppState>) -> Response {
    let encoder = TextEncoder::new();
    let families = app.exporter.store().registry().gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::error!("[http] metrics encoding failed: {}", e);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    (
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

// POST /alerts
// 503 seulement si tout le lot a échoué, sinon le bilan détaille les échecs
async fn post_alerts(
    State(app): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> (StatusCode, Json<WebhookReport>) {
    let report = dispatch_webhook(&app.dispatcher, &payload);
    tracing::info!(
        "[http] webhook ({}): {} alerts, {} sent, {} failed",
        payload.status,
        report.received,
        report.sent,
        report.failed
    );
    let code = if report.failed > 0 && report.sent == 0 {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(report))
}
