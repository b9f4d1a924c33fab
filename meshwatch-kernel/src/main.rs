/**
 * MESHWATCH KERNEL - Point d'entrée de l'exporter
 *
 * RÔLE : Orchestration : config, store, restauration d'état, MQTT, reaper,
 * sauvegarde périodique, HTTP. Arrêt propre sur Ctrl-C avec sauvegarde finale.
 */

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use meshwatch_kernel::alerts::DispatcherSettings;
use meshwatch_kernel::config::load_config;
use meshwatch_kernel::health::HealthTracker;
use meshwatch_kernel::http::{self, AppState};
use meshwatch_kernel::mqtt::{self, MqttPublisher};
use meshwatch_kernel::snapshot;
use meshwatch_kernel::{ActivityTracker, AlertDispatcher, Exporter, MetricStore, Reaper};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("meshwatch_kernel=info")),
        )
        .init();

    let cfg = load_config().await.context("loading config")?;
    cfg.validate().context("validating config")?;
    let listen = cfg.listen_addr()?;

    // store + état persistant
    let store = Arc::new(MetricStore::new().context("building metric store")?);
    let activity = ActivityTracker::new();
    let exporter = Exporter::new(store.clone(), activity.clone(), cfg.topics.0.clone());
    match exporter.load_state(&cfg.state.path).await {
        Ok(n) => tracing::info!("[kernel] {} nodes restored", n),
        // un snapshot illisible ne bloque pas le démarrage
        Err(e) => tracing::error!("[kernel] failed to restore state from {}: {}", cfg.state.path, e),
    }

    let health = HealthTracker::new();

    // MQTT : uplink vers le pipeline, downlink pour les alertes
    let (client, eventloop) = mqtt::create_mqtt_client(&cfg.mqtt);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener_task = mqtt::spawn_mqtt_listener(
        client.clone(),
        eventloop,
        exporter.clone(),
        health.clone(),
        shutdown_rx,
    );
    tracing::info!("[kernel] mqtt broker {}:{}", cfg.mqtt.host, cfg.mqtt.port);

    let dispatcher = match cfg.alerts.dispatcher_settings() {
        Some(settings) => AlertDispatcher::new(settings)
            .with_publisher(Arc::new(MqttPublisher::new(client, health.clone()))),
        None => {
            tracing::warn!("[kernel] alerts.from_node not set, downlink alerts disabled");
            AlertDispatcher::new(DispatcherSettings::default())
        }
    };

    // tâches périodiques
    let reaper_task = Reaper::new(store.clone(), activity, cfg.reaper.ttl())
        .with_interval(cfg.reaper.interval())
        .spawn();
    let save_task = (!cfg.state.path.trim().is_empty()).then(|| {
        snapshot::spawn_periodic_save(store.clone(), cfg.state.path.clone(), cfg.save_interval())
    });

    // HTTP
    let app = http::build_router(AppState {
        exporter: exporter.clone(),
        health,
        dispatcher: Arc::new(dispatcher),
    });
    let tcp = TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    tracing::info!("[kernel] listening on http://{listen}");
    axum::serve(tcp, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("[kernel] shutdown requested");
        })
        .await
        .context("http server")?;

    // arrêt : bus, tâches périodiques puis sauvegarde finale
    let _ = shutdown_tx.send(true);
    if let Err(e) = listener_task.await {
        tracing::error!("[kernel] mqtt listener ended abnormally: {}", e);
    }
    if let Some(task) = reaper_task {
        task.stop().await;
    }
    if let Some(task) = save_task {
        task.stop().await;
    }
    if let Err(e) = exporter.save_state(&cfg.state.path).await {
        tracing::error!("[kernel] final state save failed: {}", e);
    }
    tracing::info!("[kernel] bye");
    Ok(())
}
