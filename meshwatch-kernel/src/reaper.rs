/**
 * REAPER - Expiration des séries des nœuds silencieux
 *
 * RÔLE : Un nœud qui ne parle plus depuis `ttl` perd ses séries éphémères
 * (batterie, tension, utilisation canal/air, uptime, environnement, last-seen).
 * L'identité (`meshtastic_node_info`), les compteurs et rssi/snr restent.
 *
 * FONCTIONNEMENT :
 * - `ActivityTracker` : dernière activité par nœud, touchée par le pipeline
 * - Sweep périodique (≈ ttl/6) : le verrou d'activité n'est pris que pour collecter
 *   les candidats, jamais pendant la suppression des séries
 * - Garde d'écriture (`RwLock`) : le pipeline écrit en lecture, le reaper prend
 *   l'écriture le temps d'expirer UN nœud. Un candidat revu depuis la collecte
 *   est épargné, un record ne peut pas être effacé à moitié écrit.
 * - ttl = 0 désactive l'expiration
 */

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::schedule::PeriodicTask;
use crate::store::MetricStore;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Dernière activité connue par nœud
#[derive(Clone)]
pub struct ActivityTracker {
    last_seen: Arc<Mutex<HashMap<String, Instant>>>,
    write_gate: Arc<RwLock<()>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            last_seen: Arc::new(Mutex::new(HashMap::new())),
            write_gate: Arc::new(RwLock::new(())),
        }
    }

    /// Écrit dans le store puis marque le nœud actif, sans sweep intercalé.
    pub fn record<R>(&self, node_id: &str, write: impl FnOnce() -> R) -> R {
        let _gate = self.write_gate.read();
        let out = write();
        self.touch(node_id);
        out
    }

    pub fn touch(&self, node_id: &str) {
        self.touch_at(node_id, Instant::now());
    }

    pub fn touch_at(&self, node_id: &str, at: Instant) {
        let mut map = self.last_seen.lock();
        match map.get_mut(node_id) {
            Some(seen) => *seen = at,
            None => {
                map.insert(node_id.to_string(), at);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.last_seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.last_seen.lock().contains_key(node_id)
    }

    /// Nœuds inactifs depuis plus de `ttl`, avec l'instant vu à la collecte.
    /// Rien n'est retiré ici.
    fn expired(&self, ttl: Duration, now: Instant) -> Vec<(String, Instant)> {
        self.last_seen
            .lock()
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) > ttl)
            .map(|(id, seen)| (id.clone(), *seen))
            .collect()
    }

    /// Retire `node_id` et lance `remove_series` seulement s'il n'a pas été revu
    /// depuis `seen`. `None` si le nœud a reparlé entre-temps.
    fn expire_if_idle<R>(&self, node_id: &str, seen: Instant, remove_series: impl FnOnce() -> R) -> Option<R> {
        let _gate = self.write_gate.write();
        {
            let mut map = self.last_seen.lock();
            if map.get(node_id) != Some(&seen) {
                return None;
            }
            map.remove(node_id);
        }
        Some(remove_series())
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Reaper {
    store: Arc<MetricStore>,
    activity: ActivityTracker,
    ttl: Duration,
    interval: Duration,
}

impl Reaper {
    /// Intervalle par défaut = ttl/6 (minimum 1s)
    pub fn new(store: Arc<MetricStore>, activity: ActivityTracker, ttl: Duration) -> Self {
        let interval = default_interval(ttl);
        Self {
            store,
            activity,
            ttl,
            interval,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Un passage d'expiration à l'instant `now`. Retourne les nœuds expirés.
    pub fn sweep_at(&self, now: Instant) -> Vec<String> {
        if !self.is_enabled() {
            return Vec::new();
        }
        self.activity
            .expired(self.ttl, now)
            .into_iter()
            .filter_map(|(node_id, seen)| self.expire(node_id, seen))
            .collect()
    }

    fn expire(&self, node_id: String, seen: Instant) -> Option<String> {
        match self
            .activity
            .expire_if_idle(&node_id, seen, || self.store.expire_node(&node_id))
        {
            Some(removed) => {
                tracing::info!("[reaper] expired node {} ({} series removed)", node_id, removed);
                Some(node_id)
            }
            None => {
                tracing::debug!("[reaper] node {} reported during sweep, kept", node_id);
                None
            }
        }
    }

    pub fn sweep(&self) -> Vec<String> {
        self.sweep_at(Instant::now())
    }

    /// Lance le sweep périodique. `None` si l'expiration est désactivée (ttl = 0).
    pub fn spawn(self) -> Option<PeriodicTask> {
        if !self.is_enabled() {
            tracing::info!("[reaper] ttl is 0, stale node expiry disabled");
            return None;
        }
        tracing::info!(
            "[reaper] ttl {}s, sweeping every {}s",
            self.ttl.as_secs(),
            self.interval.as_secs()
        );
        let period = self.interval;
        let reaper = Arc::new(self);
        Some(PeriodicTask::spawn("reaper", period, move || {
            let reaper = reaper.clone();
            async move {
                let expired = reaper.sweep();
                if !expired.is_empty() {
                    tracing::info!("[reaper] cleaned up {} stale nodes", expired.len());
                }
            }
        }))
    }
}

pub fn default_interval(ttl: Duration) -> Duration {
    (ttl / 6).max(MIN_INTERVAL)
}
