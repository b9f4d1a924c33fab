use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Tâche périodique annulable (reaper, sauvegarde d'état).
/// Le handle appartient au code de cycle de vie du binaire.
pub struct PeriodicTask {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Lance `tick` toutes les `period`. Le premier tick part après une période complète.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (shutdown, mut stop) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => tick().await,
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("[{name}] periodic task stopped");
        });
        tracing::info!("[{name}] started (every {}s)", period.as_secs());
        Self { name, shutdown, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Demande l'arrêt et attend la fin du tick en cours.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!("[{}] task ended abnormally: {}", self.name, e);
        }
    }
}
