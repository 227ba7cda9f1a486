//! Periodic removal of finished reservations past their retention.

use std::time::Duration;

use provgrid_state::{InstanceTracker, ReservationStore, StateResult, SystemScope};
use tracing::{debug, info};

use crate::manager::LifecycleManager;

/// Deletes reservations that finished more than `retention` ago.
pub struct Cleaner<S> {
    manager: LifecycleManager<S>,
    /// Pause between sweeps.
    interval: Duration,
    retention: Duration,
    batch_size: usize,
}

impl<S> Cleaner<S>
where
    S: ReservationStore + InstanceTracker + Clone + Send + Sync + 'static,
{
    pub fn new(
        manager: LifecycleManager<S>,
        interval: Duration,
        retention: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            manager,
            interval,
            retention,
            batch_size: batch_size.max(1),
        }
    }

    /// One pass relative to the current time. Returns the number deleted.
    pub async fn sweep(&self) -> StateResult<usize> {
        self.sweep_at(prov_core::unix_now()).await
    }

    /// One pass relative to `now` (unix seconds).
    pub async fn sweep_at(&self, now: u64) -> StateResult<usize> {
        let scope = SystemScope::new();
        let cutoff = now.saturating_sub(self.retention.as_secs());
        let mut deleted = 0;

        loop {
            let ids = self
                .manager
                .finished_before(&scope, cutoff, self.batch_size)
                .await?;
            if ids.is_empty() {
                break;
            }
            for id in &ids {
                if self.manager.delete(&scope, *id).await? {
                    deleted += 1;
                }
            }
            debug!(batch = ids.len(), cutoff, "cleanup batch removed");
            if ids.len() < self.batch_size {
                break;
            }
        }

        if deleted > 0 {
            info!(deleted, cutoff, "expired reservations removed");
        }
        Ok(deleted)
    }

    /// Run the sweep loop until shutdown signal.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            retention_secs = self.retention.as_secs(),
            "reservation cleaner started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.sweep().await {
                        tracing::warn!(error = %e, retryable = e.is_retryable(), "cleanup sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("reservation cleaner shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use provgrid_state::{
        AccountDirectory, InstanceDescription, NewReservation, StateError, StateStore,
        TenantScope,
    };

    use super::*;

    const HOUR: u64 = 60 * 60;

    async fn setup() -> (LifecycleManager<StateStore>, TenantScope) {
        let store = StateStore::open_in_memory().unwrap();
        let account = store
            .get_or_create(&SystemScope::new(), "org-clean", None)
            .unwrap();
        (
            LifecycleManager::new(store, Duration::from_secs(5)),
            TenantScope::new(account.id),
        )
    }

    async fn reservation(manager: &LifecycleManager<StateStore>, scope: &TenantScope) -> u64 {
        manager
            .create_noop(scope, NewReservation::new("Created", vec![]))
            .await
            .unwrap()
            .reservation
            .id
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_finished_reservations() {
        let (manager, scope) = setup().await;
        let system = scope.unscoped();
        let finished = reservation(&manager, &scope).await;
        let running = reservation(&manager, &scope).await;
        manager.finish_with_success(&system, finished).await.unwrap();
        manager
            .attach_instance(&system, finished, InstanceDescription::new("i-1"))
            .await
            .unwrap();

        let cleaner = Cleaner::new(
            manager.clone(),
            Duration::from_secs(60),
            Duration::from_secs(HOUR),
            10,
        );

        // Nothing has been finished for an hour yet.
        assert_eq!(cleaner.sweep().await.unwrap(), 0);

        let later = prov_core::unix_now() + 2 * HOUR;
        assert_eq!(cleaner.sweep_at(later).await.unwrap(), 1);

        let err = manager.get(&scope, finished).await.unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
        assert!(manager.list_instances(&system, finished).await.unwrap().is_empty());
        assert!(manager.get(&scope, running).await.is_ok());
    }

    #[tokio::test]
    async fn sweep_drains_in_batches() {
        let (manager, scope) = setup().await;
        let system = scope.unscoped();
        for _ in 0..5 {
            let id = reservation(&manager, &scope).await;
            manager.finish_with_error(&system, id, "boom").await.unwrap();
        }

        let cleaner = Cleaner::new(manager.clone(), Duration::from_secs(60), Duration::ZERO, 2);
        let deleted = cleaner
            .sweep_at(prov_core::unix_now() + 1)
            .await
            .unwrap();
        assert_eq!(deleted, 5);
        assert!(manager.list(&scope, 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (manager, _) = setup().await;
        let cleaner = Cleaner::new(
            manager,
            Duration::from_secs(3600),
            Duration::from_secs(HOUR),
            10,
        );
        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(async move { cleaner.run(rx).await });
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
