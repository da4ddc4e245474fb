use anyhow::{Context, Result};
use gatekeep_core::{DecisionEngine, IdentityBackend, IdentityStore, SensorError};
use gatekeep_hw::{find_siren_asset, CommandSiren, SilentSiren, SirenPlayer};
use gatekeep_store::SqliteStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

mod actuator;
mod config;
mod decision_loop;
mod refresh;
mod replay;
mod siren;

use config::Config;
use decision_loop::{DecisionLoop, LoopExit};
use replay::ReplaySource;
use siren::SirenRunner;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gatekeepd starting");

    // The frame source is the only fatal dependency; check it before touching hardware.
    let replay_path = config
        .replay_path
        .clone()
        .ok_or_else(|| SensorError::Unavailable("GATEKEEP_REPLAY_PATH is not set".into()))?;
    let perception = ReplaySource::open(&replay_path)?;

    let (backend, initial) = open_identities(&config);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let result = rt.block_on(serve(config.clone(), perception, backend, initial));
    // Bounds how long a detached siren can hold up exit.
    rt.shutdown_timeout(config.siren_grace);

    tracing::info!("gatekeepd stopped");
    result
}

/// Open the identity database and load the first snapshot.
///
/// Neither failure is fatal: the daemon runs with whatever it could load.
fn open_identities(config: &Config) -> (Option<Arc<SqliteStore>>, IdentityStore) {
    let db = match SqliteStore::open(&config.db_path) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %config.db_path.display(),
                "identity database unavailable; starting with no identities"
            );
            return (None, IdentityStore::new());
        }
    };
    let initial = IdentityStore::load(db.as_ref()).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "initial identity load failed; starting with no identities");
        IdentityStore::new()
    });
    tracing::info!(
        path = %config.db_path.display(),
        identities = initial.len(),
        "identities loaded"
    );
    (Some(db), initial)
}

async fn serve(
    config: Config,
    perception: ReplaySource<std::io::BufReader<std::fs::File>>,
    backend: Option<Arc<SqliteStore>>,
    initial: IdentityStore,
) -> Result<()> {
    let (identities_tx, identities_rx) = watch::channel(Arc::new(initial));
    let refresher = match &backend {
        Some(db) if !config.store_refresh.is_zero() => Some(refresh::spawn_refresh(
            Arc::clone(db) as Arc<dyn IdentityBackend>,
            config.store_refresh,
            identities_tx,
        )),
        _ => None,
    };

    let hardware = gatekeep_hw::detect(config.force_simulation);
    let (gate, actuator_task) = actuator::spawn_actuator(hardware, config.actuator());

    let (player, asset): (Arc<dyn SirenPlayer>, PathBuf) =
        match find_siren_asset(&config.assets_dir) {
            Some(asset) => {
                tracing::info!(asset = %asset.display(), "siren asset found");
                (Arc::new(CommandSiren::new()), asset)
            }
            None => {
                tracing::warn!(
                    dir = %config.assets_dir.display(),
                    "no siren asset found; sirens will be silent"
                );
                (Arc::new(SilentSiren), PathBuf::new())
            }
        };

    let engine = DecisionEngine::new(config.decision());
    let mut decision = DecisionLoop::new(
        engine,
        identities_rx,
        gate,
        SirenRunner::new(player, asset),
        config.frame_interval,
    );
    if let Some(db) = backend {
        decision = decision.with_audit(db);
    }

    tracing::info!(
        require_secondary_credential = config.require_secondary_credential,
        face_threshold = config.face_threshold,
        "gatekeepd ready"
    );

    let outcome = decision.run(perception, shutdown_signal()).await;

    decision.shutdown(config.siren_grace).await;
    if let Some(task) = refresher {
        task.abort();
    }
    let report = actuator_task.await.context("actuator task failed")?;
    tracing::info!(gate_cycles = report.cycles, hardware_faults = report.faults, "actuator stopped");

    match outcome? {
        LoopExit::EndOfStream => tracing::info!("frame source exhausted"),
        LoopExit::Shutdown => tracing::info!("shutdown requested"),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for ctrl-c; running until the stream ends");
        std::future::pending::<()>().await;
    }
}
