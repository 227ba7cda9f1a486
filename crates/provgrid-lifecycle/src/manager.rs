//! Lifecycle manager: drives the reservation state machine.
//!
//! Each call runs one store operation on the blocking pool, bounded by the
//! scope's deadline (or the manager default). Reads for any reservation
//! proceed in parallel; writes are serialized by the store's single-writer
//! transactions, which are kept short.

use std::time::Duration;

use provgrid_state::{
    AwsDetail, AwsReservation, AzureDetail, AzureReservation, GcpDetail, GcpReservation,
    InstanceDescription, InstanceTracker, NewReservation, NoopReservation, Outcome, Reservation,
    ReservationDetail, ReservationId, ReservationInstance, ReservationState, ReservationStore,
    Scope, StateError, StateResult, SystemScope, TenantScope,
};
use tracing::{debug, info};

/// Orchestrates reservation creation, progress, and finalization over an
/// injected store.
#[derive(Clone)]
pub struct LifecycleManager<S> {
    store: S,
    timeout: Duration,
}

impl<S> LifecycleManager<S>
where
    S: ReservationStore + InstanceTracker + Clone + Send + Sync + 'static,
{
    /// `timeout` applies to calls whose scope carries no deadline.
    pub fn new(store: S, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run `f` on the blocking pool within the deadline.
    ///
    /// A call that times out may still commit; every operation here is
    /// either idempotent or reports `Conflict` on repetition, so the job
    /// driver can retry safely.
    async fn run<T, Sc, F>(&self, scope: &Scope<Sc>, op: &'static str, f: F) -> StateResult<T>
    where
        T: Send + 'static,
        Sc: Clone + Send + 'static,
        F: FnOnce(&S, &Scope<Sc>) -> StateResult<T> + Send + 'static,
    {
        let limit = scope.timeout().unwrap_or(self.timeout);
        let store = self.store.clone();
        let scope = scope.clone();
        let task = tokio::task::spawn_blocking(move || f(&store, &scope));
        match tokio::time::timeout(limit, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(StateError::Transaction(format!("{op}: {join}"))),
            Err(_) => Err(StateError::Timeout(format!("{op} exceeded {limit:?}"))),
        }
    }

    // ── Creation ───────────────────────────────────────────────────

    /// Create a reservation and its detail row as one unit.
    pub async fn create(
        &self,
        scope: &TenantScope,
        new: NewReservation,
        detail: ReservationDetail,
    ) -> StateResult<Reservation> {
        let reservation = self
            .run(scope, "create reservation", move |store, scope| {
                store.create_reservation(scope, &new, &detail)
            })
            .await?;
        info!(
            reservation_id = reservation.id,
            provider = %reservation.provider,
            "reservation created"
        );
        Ok(reservation)
    }

    pub async fn create_noop(
        &self,
        scope: &TenantScope,
        new: NewReservation,
    ) -> StateResult<NoopReservation> {
        let reservation = self.create(scope, new, ReservationDetail::Noop).await?;
        Ok(NoopReservation { reservation })
    }

    pub async fn create_aws(
        &self,
        scope: &TenantScope,
        new: NewReservation,
        detail: AwsDetail,
    ) -> StateResult<AwsReservation> {
        let reservation = self
            .create(scope, new, ReservationDetail::aws(detail.clone()))
            .await?;
        Ok(AwsReservation {
            reservation,
            aws_reservation_id: None,
            detail,
        })
    }

    pub async fn create_azure(
        &self,
        scope: &TenantScope,
        new: NewReservation,
        detail: AzureDetail,
    ) -> StateResult<AzureReservation> {
        let reservation = self
            .create(scope, new, ReservationDetail::azure(detail.clone()))
            .await?;
        Ok(AzureReservation {
            reservation,
            detail,
        })
    }

    pub async fn create_gcp(
        &self,
        scope: &TenantScope,
        new: NewReservation,
        detail: GcpDetail,
    ) -> StateResult<GcpReservation> {
        let reservation = self
            .create(scope, new, ReservationDetail::gcp(detail.clone()))
            .await?;
        Ok(GcpReservation {
            reservation,
            gcp_operation_name: None,
            detail,
        })
    }

    // ── Scoped reads ───────────────────────────────────────────────

    pub async fn get(&self, scope: &TenantScope, id: ReservationId) -> StateResult<Reservation> {
        self.run(scope, "get reservation", move |store, scope| {
            store.get_reservation(scope, id)
        })
        .await
    }

    pub async fn get_with_detail(
        &self,
        scope: &TenantScope,
        id: ReservationId,
    ) -> StateResult<(Reservation, ReservationDetail)> {
        self.run(scope, "get reservation detail", move |store, scope| {
            store.get_with_detail(scope, id)
        })
        .await
    }

    pub async fn state(
        &self,
        scope: &TenantScope,
        id: ReservationId,
    ) -> StateResult<ReservationState> {
        Ok(self.get(scope, id).await?.state())
    }

    pub async fn list(
        &self,
        scope: &TenantScope,
        limit: usize,
        offset: usize,
    ) -> StateResult<Vec<Reservation>> {
        self.run(scope, "list reservations", move |store, scope| {
            store.list_reservations(scope, limit, offset)
        })
        .await
    }

    /// Header lookup for job drivers; no tenant filter.
    pub async fn unscoped_get(
        &self,
        scope: &SystemScope,
        id: ReservationId,
    ) -> StateResult<Reservation> {
        self.run(scope, "get reservation", move |store, scope| {
            store.unscoped_get_reservation(scope, id)
        })
        .await
    }

    // ── Progress ───────────────────────────────────────────────────

    /// Set the status label and advance the step counter.
    ///
    /// After finalization this returns `Conflict` and writes nothing.
    pub async fn update_status(
        &self,
        scope: &SystemScope,
        id: ReservationId,
        status: impl Into<String>,
        add_steps: i32,
    ) -> StateResult<Reservation> {
        let status = status.into();
        self.run(scope, "update status", move |store, scope| {
            store.update_status(scope, id, &status, add_steps)
        })
        .await
    }

    pub async fn update_reservation_id_for_aws(
        &self,
        scope: &SystemScope,
        id: ReservationId,
        aws_reservation_id: impl Into<String>,
    ) -> StateResult<()> {
        let aws_reservation_id = aws_reservation_id.into();
        self.run(scope, "update aws reservation id", move |store, scope| {
            store.update_reservation_id_for_aws(scope, id, &aws_reservation_id)
        })
        .await
    }

    pub async fn update_operation_name_for_gcp(
        &self,
        scope: &SystemScope,
        id: ReservationId,
        operation_name: impl Into<String>,
    ) -> StateResult<()> {
        let operation_name = operation_name.into();
        self.run(scope, "update gcp operation name", move |store, scope| {
            store.update_operation_name_for_gcp(scope, id, &operation_name)
        })
        .await
    }

    pub async fn unscoped_update_aws_detail(
        &self,
        scope: &SystemScope,
        id: ReservationId,
        detail: AwsDetail,
    ) -> StateResult<()> {
        self.run(scope, "update aws detail", move |store, scope| {
            store.unscoped_update_aws_detail(scope, id, &detail)
        })
        .await
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Record what the provider reports about one instance (upsert by id).
    pub async fn attach_instance(
        &self,
        scope: &SystemScope,
        id: ReservationId,
        description: InstanceDescription,
    ) -> StateResult<ReservationInstance> {
        self.run(scope, "update reservation instance", move |store, scope| {
            store.update_reservation_instance(scope, id, &description)
        })
        .await
    }

    pub async fn list_instances(
        &self,
        scope: &SystemScope,
        id: ReservationId,
    ) -> StateResult<Vec<ReservationInstance>> {
        self.run(scope, "list instances", move |store, scope| {
            store.list_instances(scope, id)
        })
        .await
    }

    // ── Finalization ───────────────────────────────────────────────

    pub async fn finish_with_success(
        &self,
        scope: &SystemScope,
        id: ReservationId,
    ) -> StateResult<Reservation> {
        self.finish(scope, id, Outcome::Succeeded).await
    }

    pub async fn finish_with_error(
        &self,
        scope: &SystemScope,
        id: ReservationId,
        error: impl Into<String>,
    ) -> StateResult<Reservation> {
        let error = error.into();
        self.finish(scope, id, Outcome::Failed { error }).await
    }

    /// First writer wins; later calls get `Conflict`.
    async fn finish(
        &self,
        scope: &SystemScope,
        id: ReservationId,
        outcome: Outcome,
    ) -> StateResult<Reservation> {
        self.run(scope, "finish reservation", move |store, scope| {
            store.finish(scope, id, outcome)
        })
        .await
    }

    // ── Cleanup ────────────────────────────────────────────────────

    pub async fn finished_before(
        &self,
        scope: &SystemScope,
        cutoff: u64,
        limit: usize,
    ) -> StateResult<Vec<ReservationId>> {
        self.run(scope, "list finished reservations", move |store, scope| {
            store.unscoped_list_finished_before(scope, cutoff, limit)
        })
        .await
    }

    pub async fn delete(&self, scope: &SystemScope, id: ReservationId) -> StateResult<bool> {
        let existed = self
            .run(scope, "delete reservation", move |store, scope| {
                store.delete_reservation(scope, id)
            })
            .await?;
        debug!(reservation_id = id, existed, "reservation delete requested");
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provgrid_state::{AccountDirectory, ErrorKind, StateStore};

    async fn setup() -> (LifecycleManager<StateStore>, TenantScope) {
        let store = StateStore::open_in_memory().unwrap();
        let account = store
            .get_or_create(&SystemScope::new(), "org-7", Some("7"))
            .unwrap();
        (
            LifecycleManager::new(store, Duration::from_secs(5)),
            TenantScope::new(account.id),
        )
    }

    fn new_reservation() -> NewReservation {
        NewReservation::new("Created", vec!["Launch".to_string()])
    }

    #[tokio::test]
    async fn states_progress_to_terminal() {
        let (manager, scope) = setup().await;
        let id = manager
            .create_noop(&scope, new_reservation())
            .await
            .unwrap()
            .reservation
            .id;
        let system = scope.unscoped();

        assert_eq!(manager.state(&scope, id).await.unwrap(), ReservationState::Created);
        manager.update_status(&system, id, "working", 1).await.unwrap();
        assert_eq!(manager.state(&scope, id).await.unwrap(), ReservationState::InProgress);
        manager.finish_with_success(&system, id).await.unwrap();
        assert_eq!(manager.state(&scope, id).await.unwrap(), ReservationState::Succeeded);
    }

    #[tokio::test]
    async fn second_finish_reports_conflict() {
        let (manager, scope) = setup().await;
        let id = manager
            .create_noop(&scope, new_reservation())
            .await
            .unwrap()
            .reservation
            .id;
        let system = scope.unscoped();

        manager.finish_with_success(&system, id).await.unwrap();
        let err = manager
            .finish_with_error(&system, id, "too late")
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::Conflict(_)));
        let r = manager.get(&scope, id).await.unwrap();
        assert_eq!(r.outcome, Some(Outcome::Succeeded));
        assert_eq!(r.error(), None);
    }

    #[tokio::test]
    async fn finish_with_error_keeps_message_verbatim() {
        let (manager, scope) = setup().await;
        let id = manager
            .create_noop(&scope, new_reservation())
            .await
            .unwrap()
            .reservation
            .id;

        manager
            .finish_with_error(&scope.unscoped(), id, "quota exceeded")
            .await
            .unwrap();

        let r = manager.get(&scope, id).await.unwrap();
        assert!(r.is_finished());
        assert_eq!(r.error(), Some("quota exceeded"));
        assert_eq!(r.state(), ReservationState::Failed);
    }

    #[tokio::test]
    async fn parallel_reservations_progress_independently() {
        let (manager, scope) = setup().await;
        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(
                manager
                    .create_noop(&scope, new_reservation())
                    .await
                    .unwrap()
                    .reservation
                    .id,
            );
        }

        let mut handles = Vec::new();
        for (n, id) in ids.iter().copied().enumerate() {
            let manager = manager.clone();
            let system = scope.unscoped();
            handles.push(tokio::spawn(async move {
                for _ in 0..=n {
                    manager.update_status(&system, id, "tick", 1).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for (n, id) in ids.iter().enumerate() {
            assert_eq!(manager.get(&scope, *id).await.unwrap().step as usize, n + 1);
        }
    }

    #[tokio::test]
    async fn validation_errors_surface_unchanged() {
        let (manager, scope) = setup().await;
        let err = manager
            .create_aws(&scope, new_reservation(), AwsDetail::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::Validation(_)));
    }

    /// Delegates to an in-memory store; listing blocks for `delay` first.
    #[derive(Clone)]
    struct SlowStore {
        inner: StateStore,
        delay: Duration,
    }

    impl ReservationStore for SlowStore {
        fn create_reservation(
            &self,
            scope: &TenantScope,
            new: &NewReservation,
            detail: &ReservationDetail,
        ) -> StateResult<Reservation> {
            self.inner.create_reservation(scope, new, detail)
        }

        fn get_reservation(&self, scope: &TenantScope, id: ReservationId) -> StateResult<Reservation> {
            self.inner.get_reservation(scope, id)
        }

        fn get_with_detail(
            &self,
            scope: &TenantScope,
            id: ReservationId,
        ) -> StateResult<(Reservation, ReservationDetail)> {
            self.inner.get_with_detail(scope, id)
        }

        fn unscoped_get_reservation(
            &self,
            scope: &SystemScope,
            id: ReservationId,
        ) -> StateResult<Reservation> {
            self.inner.unscoped_get_reservation(scope, id)
        }

        fn list_reservations(
            &self,
            scope: &TenantScope,
            limit: usize,
            offset: usize,
        ) -> StateResult<Vec<Reservation>> {
            std::thread::sleep(self.delay);
            self.inner.list_reservations(scope, limit, offset)
        }

        fn update_status(
            &self,
            scope: &SystemScope,
            id: ReservationId,
            status: &str,
            add_steps: i32,
        ) -> StateResult<Reservation> {
            self.inner.update_status(scope, id, status, add_steps)
        }

        fn update_reservation_id_for_aws(
            &self,
            scope: &SystemScope,
            id: ReservationId,
            aws_reservation_id: &str,
        ) -> StateResult<()> {
            self.inner.update_reservation_id_for_aws(scope, id, aws_reservation_id)
        }

        fn update_operation_name_for_gcp(
            &self,
            scope: &SystemScope,
            id: ReservationId,
            operation_name: &str,
        ) -> StateResult<()> {
            self.inner.update_operation_name_for_gcp(scope, id, operation_name)
        }

        fn unscoped_update_aws_detail(
            &self,
            scope: &SystemScope,
            id: ReservationId,
            detail: &AwsDetail,
        ) -> StateResult<()> {
            self.inner.unscoped_update_aws_detail(scope, id, detail)
        }

        fn finish(
            &self,
            scope: &SystemScope,
            id: ReservationId,
            outcome: Outcome,
        ) -> StateResult<Reservation> {
            self.inner.finish(scope, id, outcome)
        }

        fn delete_reservation(&self, scope: &SystemScope, id: ReservationId) -> StateResult<bool> {
            self.inner.delete_reservation(scope, id)
        }

        fn unscoped_list_finished_before(
            &self,
            scope: &SystemScope,
            cutoff: u64,
            limit: usize,
        ) -> StateResult<Vec<ReservationId>> {
            self.inner.unscoped_list_finished_before(scope, cutoff, limit)
        }
    }

    impl InstanceTracker for SlowStore {
        fn create_instance(
            &self,
            scope: &SystemScope,
            instance: &ReservationInstance,
        ) -> StateResult<()> {
            self.inner.create_instance(scope, instance)
        }

        fn list_instances(
            &self,
            scope: &SystemScope,
            reservation_id: ReservationId,
        ) -> StateResult<Vec<ReservationInstance>> {
            self.inner.list_instances(scope, reservation_id)
        }

        fn update_reservation_instance(
            &self,
            scope: &SystemScope,
            reservation_id: ReservationId,
            description: &InstanceDescription,
        ) -> StateResult<ReservationInstance> {
            self.inner.update_reservation_instance(scope, reservation_id, description)
        }
    }

    fn slow_manager(timeout: Duration) -> (LifecycleManager<SlowStore>, TenantScope) {
        let inner = StateStore::open_in_memory().unwrap();
        let account = inner
            .get_or_create(&SystemScope::new(), "org-slow", None)
            .unwrap();
        let store = SlowStore {
            inner,
            delay: Duration::from_millis(500),
        };
        (LifecycleManager::new(store, timeout), TenantScope::new(account.id))
    }

    #[tokio::test]
    async fn slow_store_call_fails_with_timeout() {
        let (manager, scope) = slow_manager(Duration::from_millis(20));

        let err = manager.list(&scope, 10, 0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_retryable());

        // Other operations are unaffected by the slow one.
        manager
            .create_noop(&scope, new_reservation())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn scope_deadline_overrides_manager_default() {
        let (manager, scope) = slow_manager(Duration::from_secs(30));

        let err = manager
            .list(&scope.clone().with_timeout(Duration::from_millis(20)), 10, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::Timeout(_)));

        // With a generous deadline the same call completes.
        let listed = manager
            .list(&scope.with_timeout(Duration::from_secs(30)), 10, 0)
            .await
            .unwrap();
        assert!(listed.is_empty());
    }
}
