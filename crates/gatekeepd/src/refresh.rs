//! Periodic reload of the identity snapshot from the backing store.

use gatekeep_core::{IdentityBackend, IdentityStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Reload identities every `every` and publish each successful snapshot.
///
/// A failed reload is logged and the previous snapshot stays published.
pub fn spawn_refresh(
    backend: Arc<dyn IdentityBackend>,
    every: Duration,
    tx: watch::Sender<Arc<IdentityStore>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick fires immediately; the initial snapshot was loaded at startup.
        interval.tick().await;
        loop {
            interval.tick().await;
            if tx.is_closed() {
                break;
            }
            let backend = Arc::clone(&backend);
            match tokio::task::spawn_blocking(move || IdentityStore::load(backend.as_ref())).await {
                Ok(Ok(store)) => {
                    tracing::debug!(identities = store.len(), "identity snapshot refreshed");
                    tx.send_replace(Arc::new(store));
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "identity refresh failed; keeping previous snapshot");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "identity refresh task panicked");
                }
            }
        }
    })
}
