//! Long-running mode: background jobs until Ctrl-C.

use prov_core::ProvConfig;
use provgrid_lifecycle::{Cleaner, LifecycleManager};
use provgrid_state::StateStore;
use tokio::sync::watch;
use tracing::info;

pub async fn run(manager: LifecycleManager<StateStore>, config: &ProvConfig) -> anyhow::Result<()> {
    info!(data_dir = ?config.store.data_dir, "provgrid daemon starting");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let cleanup_handle = if config.cleanup.enabled {
        let cleaner = Cleaner::new(
            manager,
            config.cleanup_interval(),
            config.cleanup_retention(),
            config.cleanup.batch_size,
        );
        let cleanup_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            cleaner.run(cleanup_shutdown).await;
        }))
    } else {
        info!("cleanup job disabled");
        None
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    if let Some(handle) = cleanup_handle {
        handle.await?;
    }

    info!("provgrid daemon stopped");
    Ok(())
}
