//! Capability interfaces over the backing store.
//!
//! [`StateStore`](crate::StateStore) implements all of them; the lifecycle
//! manager and tests depend on the traits so alternative backends can be
//! injected.

use crate::error::{StateError, StateResult};
use crate::scope::{SystemScope, TenantScope};
use crate::types::*;

/// Tenant identities.
pub trait AccountDirectory {
    /// Insert an account unconditionally. Test fixtures only; production
    /// code goes through [`get_or_create`](Self::get_or_create).
    fn create_account(&self, scope: &SystemScope, account: &Account) -> StateResult<Account>;

    fn get_account(&self, scope: &SystemScope, id: AccountId) -> StateResult<Account>;

    fn get_account_by_org(&self, scope: &SystemScope, org_id: &str) -> StateResult<Account>;

    /// Return the account of `org_id`, creating it on first contact.
    fn get_or_create(
        &self,
        scope: &SystemScope,
        org_id: &str,
        account_number: Option<&str>,
    ) -> StateResult<Account>;

    fn list_accounts(&self, scope: &SystemScope, limit: usize, offset: usize)
    -> StateResult<Vec<Account>>;
}

/// Reservation headers and their provider detail rows.
pub trait ReservationStore {
    /// Insert a header and its detail row atomically, owned by the scope's account.
    fn create_reservation(
        &self,
        scope: &TenantScope,
        new: &NewReservation,
        detail: &ReservationDetail,
    ) -> StateResult<Reservation>;

    fn get_reservation(&self, scope: &TenantScope, id: ReservationId) -> StateResult<Reservation>;

    /// Header and detail row read in one transaction.
    fn get_with_detail(
        &self,
        scope: &TenantScope,
        id: ReservationId,
    ) -> StateResult<(Reservation, ReservationDetail)>;

    /// Page of the account's reservations, most recent first.
    fn list_reservations(
        &self,
        scope: &TenantScope,
        limit: usize,
        offset: usize,
    ) -> StateResult<Vec<Reservation>>;

    /// Header by id without the tenant filter, for job drivers holding an id
    /// validated earlier in the pipeline.
    fn unscoped_get_reservation(
        &self,
        scope: &SystemScope,
        id: ReservationId,
    ) -> StateResult<Reservation>;

    /// Set the status label and add `add_steps` to the step counter.
    fn update_status(
        &self,
        scope: &SystemScope,
        id: ReservationId,
        status: &str,
        add_steps: i32,
    ) -> StateResult<Reservation>;

    fn update_reservation_id_for_aws(
        &self,
        scope: &SystemScope,
        id: ReservationId,
        aws_reservation_id: &str,
    ) -> StateResult<()>;

    fn update_operation_name_for_gcp(
        &self,
        scope: &SystemScope,
        id: ReservationId,
        operation_name: &str,
    ) -> StateResult<()>;

    /// Replace the AWS request payload, keeping the assigned reservation id.
    fn unscoped_update_aws_detail(
        &self,
        scope: &SystemScope,
        id: ReservationId,
        detail: &AwsDetail,
    ) -> StateResult<()>;

    /// Transition to a terminal state. Fails with `Conflict` when already finished.
    fn finish(
        &self,
        scope: &SystemScope,
        id: ReservationId,
        outcome: Outcome,
    ) -> StateResult<Reservation>;

    /// Remove header, detail, and instances. Returns whether it existed.
    fn delete_reservation(&self, scope: &SystemScope, id: ReservationId) -> StateResult<bool>;

    /// Ids of reservations finished before `cutoff` (unix seconds).
    fn unscoped_list_finished_before(
        &self,
        scope: &SystemScope,
        cutoff: u64,
        limit: usize,
    ) -> StateResult<Vec<ReservationId>>;

    fn create_noop(&self, scope: &TenantScope, new: &NewReservation) -> StateResult<NoopReservation> {
        let reservation = self.create_reservation(scope, new, &ReservationDetail::Noop)?;
        Ok(NoopReservation { reservation })
    }

    fn create_aws(
        &self,
        scope: &TenantScope,
        new: &NewReservation,
        detail: &AwsDetail,
    ) -> StateResult<AwsReservation> {
        let reservation =
            self.create_reservation(scope, new, &ReservationDetail::aws(detail.clone()))?;
        Ok(AwsReservation {
            reservation,
            aws_reservation_id: None,
            detail: detail.clone(),
        })
    }

    fn create_azure(
        &self,
        scope: &TenantScope,
        new: &NewReservation,
        detail: &AzureDetail,
    ) -> StateResult<AzureReservation> {
        let reservation =
            self.create_reservation(scope, new, &ReservationDetail::azure(detail.clone()))?;
        Ok(AzureReservation {
            reservation,
            detail: detail.clone(),
        })
    }

    fn create_gcp(
        &self,
        scope: &TenantScope,
        new: &NewReservation,
        detail: &GcpDetail,
    ) -> StateResult<GcpReservation> {
        let reservation =
            self.create_reservation(scope, new, &ReservationDetail::gcp(detail.clone()))?;
        Ok(GcpReservation {
            reservation,
            gcp_operation_name: None,
            detail: detail.clone(),
        })
    }

    fn get_aws(&self, scope: &TenantScope, id: ReservationId) -> StateResult<AwsReservation> {
        match self.get_with_detail(scope, id)? {
            (
                reservation,
                ReservationDetail::Aws {
                    aws_reservation_id,
                    detail,
                },
            ) => Ok(AwsReservation {
                reservation,
                aws_reservation_id,
                detail,
            }),
            (_, other) => Err(variant_mismatch(id, ProviderType::Aws, &other)),
        }
    }

    fn get_azure(&self, scope: &TenantScope, id: ReservationId) -> StateResult<AzureReservation> {
        match self.get_with_detail(scope, id)? {
            (reservation, ReservationDetail::Azure { detail }) => {
                Ok(AzureReservation { reservation, detail })
            }
            (_, other) => Err(variant_mismatch(id, ProviderType::Azure, &other)),
        }
    }

    fn get_gcp(&self, scope: &TenantScope, id: ReservationId) -> StateResult<GcpReservation> {
        match self.get_with_detail(scope, id)? {
            (
                reservation,
                ReservationDetail::Gcp {
                    gcp_operation_name,
                    detail,
                },
            ) => Ok(GcpReservation {
                reservation,
                gcp_operation_name,
                detail,
            }),
            (_, other) => Err(variant_mismatch(id, ProviderType::Gcp, &other)),
        }
    }
}

/// Requesting the wrong provider projection is reported as `NotFound`.
fn variant_mismatch(id: ReservationId, wanted: ProviderType, found: &ReservationDetail) -> StateError {
    StateError::NotFound(format!(
        "{wanted} reservation {id} (stored as {})",
        found.provider()
    ))
}

/// Instances reported for reservations.
pub trait InstanceTracker {
    /// Insert a new instance. `Conflict` if the id is already tracked.
    fn create_instance(
        &self,
        scope: &SystemScope,
        instance: &ReservationInstance,
    ) -> StateResult<()>;

    fn list_instances(
        &self,
        scope: &SystemScope,
        reservation_id: ReservationId,
    ) -> StateResult<Vec<ReservationInstance>>;

    /// Upsert by instance id under the reservation.
    fn update_reservation_instance(
        &self,
        scope: &SystemScope,
        reservation_id: ReservationId,
        description: &InstanceDescription,
    ) -> StateResult<ReservationInstance>;
}

/// Aggregated counters.
pub trait StatisticsSource {
    fn statistics(&self, scope: &SystemScope) -> StateResult<Statistics>;
}
