/**
 * SNAPSHOT - Persistance JSON du store de métriques
 *
 * RÔLE : Survivre aux redémarrages. Le snapshot est lu une fois au démarrage,
 * puis réécrit périodiquement et à l'arrêt ; il ne fait jamais autorité après le boot.
 *
 * FORMAT :
 * ```json
 * {
 *   "version": "1.0",
 *   "timestamp": 1700000000,
 *   "nodes": [
 *     {"node_id": "123456789", "timestamp": 1700000000,
 *      "metrics": {"meshtastic_battery_level_percent": 85.5},
 *      "labels": {"long_name": "Test Node", "short_name": "TN01", "hardware": "1", "role": "2"}}
 *   ]
 * }
 * ```
 */

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ProcessingError;
use crate::models::StateSnapshot;
use crate::schedule::PeriodicTask;
use crate::store::MetricStore;

/// Écrit le snapshot du store dans `path`. Chemin vide = no-op.
pub async fn save(store: &MetricStore, path: &str) -> Result<(), ProcessingError> {
    if path.trim().is_empty() {
        return Ok(());
    }
    let snapshot = store.snapshot();
    let content = serde_json::to_string_pretty(&snapshot)?;

    let target = Path::new(path);
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    // écriture dans un fichier voisin puis rename : pas de snapshot tronqué
    let tmp = target.with_extension("json.tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, target).await?;

    tracing::debug!("[state] saved {} nodes to {}", snapshot.nodes.len(), path);
    Ok(())
}

/// Lit un snapshot et le rejoue dans le store. Retourne les ids des nœuds restaurés.
/// Fichier absent (ou chemin vide) = no-op.
pub async fn load(store: &MetricStore, path: &str) -> Result<Vec<String>, ProcessingError> {
    let Some(snapshot) = read(path).await? else {
        return Ok(Vec::new());
    };
    let restored = store.restore(&snapshot);
    tracing::info!(
        "[state] restored {} nodes from {} (snapshot v{}, taken at {})",
        restored.len(),
        path,
        snapshot.version,
        snapshot.timestamp
    );
    Ok(restored)
}

/// Décode le fichier sans toucher au store.
pub async fn read(path: &str) -> Result<Option<StateSnapshot>, ProcessingError> {
    if path.trim().is_empty() || !tokio::fs::try_exists(path).await? {
        tracing::info!("[state] no existing state file, starting fresh");
        return Ok(None);
    }
    let content = tokio::fs::read_to_string(path).await?;
    if content.trim().is_empty() {
        return Err(ProcessingError::EmptySnapshot(path.to_string()));
    }
    Ok(Some(serde_json::from_str(&content)?))
}

/// Sauvegarde périodique. Un échec est loggé, le store en mémoire n'est jamais affecté.
pub fn spawn_periodic_save(store: Arc<MetricStore>, path: String, every: Duration) -> PeriodicTask {
    PeriodicTask::spawn("state", every, move || {
        let store = store.clone();
        let path = path.clone();
        async move {
            if let Err(e) = save(&store, &path).await {
                tracing::error!("[state] periodic save to {} failed: {}", path, e);
            }
        }
    })
}
