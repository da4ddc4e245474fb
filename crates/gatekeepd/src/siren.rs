//! Fire-and-forget siren playback, one blocking worker per alert key.

use gatekeep_core::AlertKey;
use gatekeep_hw::SirenPlayer;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Launches sirens without waiting for them, never twice at once for the same key.
///
/// Owned by the decision loop.
pub struct SirenRunner {
    player: Arc<dyn SirenPlayer>,
    asset: PathBuf,
    active: HashMap<AlertKey, JoinHandle<()>>,
}

impl SirenRunner {
    pub fn new(player: Arc<dyn SirenPlayer>, asset: PathBuf) -> Self {
        Self {
            player,
            asset,
            active: HashMap::new(),
        }
    }

    /// Start a siren for `key` unless one is still playing for it.
    pub fn trigger(&mut self, key: &AlertKey) -> bool {
        self.reap();
        if self.active.contains_key(key) {
            tracing::debug!(%key, "siren already playing");
            return false;
        }

        let player = Arc::clone(&self.player);
        let asset = self.asset.clone();
        let label = key.to_string();
        let handle = tokio::task::spawn_blocking(move || {
            tracing::warn!(key = %label, "siren started");
            if let Err(e) = player.play(&asset) {
                tracing::error!(error = %e, key = %label, "siren playback failed");
            }
        });
        self.active.insert(key.clone(), handle);
        true
    }

    /// Number of sirens still playing.
    pub fn active(&mut self) -> usize {
        self.reap();
        self.active.len()
    }

    fn reap(&mut self) {
        self.active.retain(|_, handle| !handle.is_finished());
    }

    /// Wait up to `grace` for playing sirens, then give up on them.
    pub async fn shutdown(mut self, grace: Duration) {
        self.reap();
        if self.active.is_empty() {
            return;
        }
        let pending = self.active.len();
        let handles: Vec<JoinHandle<()>> = self.active.drain().map(|(_, h)| h).collect();
        let wait_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(grace, wait_all).await.is_err() {
            tracing::warn!(pending, "siren still playing at shutdown; not waiting further");
        }
    }
}
