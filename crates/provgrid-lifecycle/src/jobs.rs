//! Background job drivers.
//!
//! The noop job is the reference driver: it performs no provider calls and
//! walks a reservation through the full lifecycle.

use provgrid_state::{
    ErrorKind, InstanceTracker, ProviderType, Reservation, ReservationId, ReservationStore,
    StateError, StateResult, SystemScope,
};
use tokio::task::JoinHandle;
use tracing::{Instrument, info, warn};

use crate::manager::LifecycleManager;

const NOOP_STATUS: &str = "No operation started";

/// Drive a noop reservation to success.
///
/// Reservations of other providers are refused with `Validation` and left
/// untouched. Any later failure other than a lost finish race is recorded on
/// the reservation with `finish_with_error` and returned.
pub async fn run_noop_job<S>(
    manager: &LifecycleManager<S>,
    scope: &SystemScope,
    id: ReservationId,
) -> StateResult<Reservation>
where
    S: ReservationStore + InstanceTracker + Clone + Send + Sync + 'static,
{
    let provider = manager.unscoped_get(scope, id).await?.provider;
    if provider != ProviderType::Noop {
        return Err(StateError::Validation(format!(
            "reservation {id} is a {provider} reservation, not noop"
        )));
    }

    let result = async {
        manager.update_status(scope, id, NOOP_STATUS, 1).await?;
        manager.finish_with_success(scope, id).await
    }
    .await;

    match result {
        Ok(reservation) => {
            info!(reservation_id = id, "noop job finished");
            Ok(reservation)
        }
        Err(e) if e.kind() == ErrorKind::Conflict => {
            warn!(reservation_id = id, error = %e, "noop job lost to an earlier finish");
            Err(e)
        }
        Err(e) => {
            warn!(reservation_id = id, error = %e, "noop job failed");
            if let Err(finish_err) = manager.finish_with_error(scope, id, e.to_string()).await {
                warn!(
                    reservation_id = id,
                    error = %finish_err,
                    "could not record noop job failure"
                );
            }
            Err(e)
        }
    }
}

/// Run [`run_noop_job`] on the runtime inside the scope's span.
pub fn spawn_noop_job<S>(
    manager: LifecycleManager<S>,
    scope: SystemScope,
    id: ReservationId,
) -> JoinHandle<StateResult<Reservation>>
where
    S: ReservationStore + InstanceTracker + Clone + Send + Sync + 'static,
{
    let span = tracing::info_span!(parent: scope.span(), "noop_job", reservation_id = id);
    tokio::spawn(async move { run_noop_job(&manager, &scope, id).await }.instrument(span))
}
