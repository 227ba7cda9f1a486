//! Reservation headers and provider detail rows.

use prov_core::unix_now;
use redb::{ReadableTable, WriteTransaction};
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, StateError, StateResult};
use crate::scope::{SystemScope, TenantScope};
use crate::store::{StateStore, decode, encode, load, next_id};
use crate::tables::*;
use crate::traits::ReservationStore;
use crate::types::*;

/// Read, modify, and write back the detail row of reservation `id`.
fn modify_detail(
    txn: &WriteTransaction,
    id: ReservationId,
    f: impl FnOnce(&mut ReservationDetail) -> StateResult<()>,
) -> StateResult<()> {
    let mut details = txn.open_table(DETAILS).map_err(map_err!(Table))?;
    let mut detail: ReservationDetail =
        load(&details, id)?.ok_or_else(|| StateError::reservation_not_found(id))?;
    f(&mut detail)?;
    let value = encode(&detail)?;
    details
        .insert(id, value.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

fn detail_mismatch(id: ReservationId, wanted: ProviderType, found: &ReservationDetail) -> StateError {
    StateError::NotFound(format!(
        "{wanted} detail for reservation {id} (stored as {})",
        found.provider()
    ))
}

impl ReservationStore for StateStore {
    fn create_reservation(
        &self,
        scope: &TenantScope,
        new: &NewReservation,
        detail: &ReservationDetail,
    ) -> StateResult<Reservation> {
        new.validate()?;
        detail.validate()?;
        let account_id = scope.account_id();
        let provider = detail.provider();

        scope.in_scope(|| {
            let reservation = self
                .write(|txn| {
                    let accounts = txn.open_table(ACCOUNTS).map_err(map_err!(Table))?;
                    if accounts.get(account_id).map_err(map_err!(Read))?.is_none() {
                        return Err(StateError::NotFound(format!("account {account_id}")));
                    }
                    drop(accounts);

                    let now = unix_now();
                    let reservation = Reservation {
                        id: next_id(txn, RESERVATION_SEQ)?,
                        account_id,
                        provider,
                        status: new.status.clone(),
                        step: 0,
                        steps: new.steps,
                        step_titles: new.step_titles.clone(),
                        outcome: None,
                        created_at: now,
                        updated_at: now,
                        finished_at: None,
                    };

                    let header = encode(&reservation)?;
                    let mut headers = txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
                    headers
                        .insert(reservation.id, header.as_slice())
                        .map_err(map_err!(Write))?;
                    let mut index = txn
                        .open_table(RESERVATIONS_BY_ACCOUNT)
                        .map_err(map_err!(Table))?;
                    index
                        .insert(
                            account_reservation_key(account_id, reservation.id).as_str(),
                            reservation.id,
                        )
                        .map_err(map_err!(Write))?;

                    #[cfg(test)]
                    if self
                        .fail_detail_insert
                        .load(std::sync::atomic::Ordering::SeqCst)
                    {
                        return Err(StateError::Write("injected detail insert failure".into()));
                    }

                    let value = encode(detail)?;
                    let mut details = txn.open_table(DETAILS).map_err(map_err!(Table))?;
                    details
                        .insert(reservation.id, value.as_slice())
                        .map_err(map_err!(Write))?;
                    Ok(reservation)
                })
                .map_err(|e| match e.kind() {
                    ErrorKind::Storage => {
                        StateError::Transaction(format!("create {provider} reservation: {e}"))
                    }
                    _ => e,
                })?;

            debug!(
                reservation_id = reservation.id,
                account_id,
                %provider,
                "reservation created"
            );
            Ok(reservation)
        })
    }

    fn get_reservation(&self, scope: &TenantScope, id: ReservationId) -> StateResult<Reservation> {
        scope.in_scope(|| {
            let reservation: Reservation = self.read(|txn| {
                let headers = txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
                load(&headers, id)?.ok_or_else(|| StateError::reservation_not_found(id))
            })?;
            scope
                .tenant()
                .admit(reservation.account_id, format!("reservation {id}"))?;
            Ok(reservation)
        })
    }

    fn unscoped_get_reservation(
        &self,
        scope: &SystemScope,
        id: ReservationId,
    ) -> StateResult<Reservation> {
        scope.in_scope(|| {
            self.read(|txn| {
                let headers = txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
                load(&headers, id)?.ok_or_else(|| StateError::reservation_not_found(id))
            })
        })
    }

    fn get_with_detail(
        &self,
        scope: &TenantScope,
        id: ReservationId,
    ) -> StateResult<(Reservation, ReservationDetail)> {
        scope.in_scope(|| {
            let (reservation, detail): (Reservation, ReservationDetail) = self.read(|txn| {
                let headers = txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
                let details = txn.open_table(DETAILS).map_err(map_err!(Table))?;
                let reservation =
                    load(&headers, id)?.ok_or_else(|| StateError::reservation_not_found(id))?;
                let detail = load(&details, id)?.ok_or_else(|| {
                    StateError::NotFound(format!("detail for reservation {id}"))
                })?;
                Ok((reservation, detail))
            })?;
            scope
                .tenant()
                .admit(reservation.account_id, format!("reservation {id}"))?;
            Ok((reservation, detail))
        })
    }

    fn list_reservations(
        &self,
        scope: &TenantScope,
        limit: usize,
        offset: usize,
    ) -> StateResult<Vec<Reservation>> {
        let account_id = scope.account_id();
        let start = account_prefix(account_id);
        let end = prefix_end(account_id);

        scope.in_scope(|| {
            self.read(|txn| {
                let index = txn
                    .open_table(RESERVATIONS_BY_ACCOUNT)
                    .map_err(map_err!(Table))?;
                let headers = txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
                let mut results = Vec::new();
                // Ids grow with creation time, so reverse key order is newest first.
                for entry in index
                    .range(start.as_str()..end.as_str())
                    .map_err(map_err!(Read))?
                    .rev()
                    .skip(offset)
                    .take(limit)
                {
                    let (_, value) = entry.map_err(map_err!(Read))?;
                    let id = value.value();
                    let reservation: Reservation = load(&headers, id)?
                        .ok_or_else(|| StateError::reservation_not_found(id))?;
                    results.push(reservation);
                }
                Ok(results)
            })
        })
    }

    fn update_status(
        &self,
        scope: &SystemScope,
        id: ReservationId,
        status: &str,
        add_steps: i32,
    ) -> StateResult<Reservation> {
        let add_steps = u32::try_from(add_steps).map_err(|_| {
            StateError::Validation(format!("step increment must not be negative: {add_steps}"))
        })?;

        scope.in_scope(|| {
            let result = self.write(|txn| {
                let mut headers = txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
                let mut reservation: Reservation =
                    load(&headers, id)?.ok_or_else(|| StateError::reservation_not_found(id))?;
                if reservation.is_finished() {
                    return Err(StateError::Conflict(format!(
                        "reservation {id} already finished, status update dropped"
                    )));
                }
                reservation.status = status.to_string();
                reservation.step = reservation.step.saturating_add(add_steps);
                reservation.updated_at = unix_now();
                let value = encode(&reservation)?;
                headers
                    .insert(id, value.as_slice())
                    .map_err(map_err!(Write))?;
                Ok(reservation)
            });

            match &result {
                Ok(reservation) => debug!(
                    reservation_id = id,
                    status,
                    step = reservation.step,
                    "reservation status updated"
                ),
                Err(StateError::Conflict(_)) => warn!(
                    reservation_id = id,
                    status,
                    "status update after reservation finished"
                ),
                Err(_) => {}
            }
            result
        })
    }

    fn update_reservation_id_for_aws(
        &self,
        scope: &SystemScope,
        id: ReservationId,
        aws_reservation_id: &str,
    ) -> StateResult<()> {
        scope.in_scope(|| {
            self.write(|txn| {
                modify_detail(txn, id, |detail| match detail {
                    ReservationDetail::Aws {
                        aws_reservation_id: slot,
                        ..
                    } => {
                        *slot = Some(aws_reservation_id.to_string());
                        Ok(())
                    }
                    other => Err(detail_mismatch(id, ProviderType::Aws, other)),
                })
            })?;
            debug!(reservation_id = id, aws_reservation_id, "aws reservation id stored");
            Ok(())
        })
    }

    fn update_operation_name_for_gcp(
        &self,
        scope: &SystemScope,
        id: ReservationId,
        operation_name: &str,
    ) -> StateResult<()> {
        scope.in_scope(|| {
            self.write(|txn| {
                modify_detail(txn, id, |detail| match detail {
                    ReservationDetail::Gcp {
                        gcp_operation_name, ..
                    } => {
                        *gcp_operation_name = Some(operation_name.to_string());
                        Ok(())
                    }
                    other => Err(detail_mismatch(id, ProviderType::Gcp, other)),
                })
            })?;
            debug!(reservation_id = id, operation_name, "gcp operation name stored");
            Ok(())
        })
    }

    fn unscoped_update_aws_detail(
        &self,
        scope: &SystemScope,
        id: ReservationId,
        aws_detail: &AwsDetail,
    ) -> StateResult<()> {
        ReservationDetail::aws(aws_detail.clone()).validate()?;
        scope.in_scope(|| {
            self.write(|txn| {
                modify_detail(txn, id, |detail| match detail {
                    ReservationDetail::Aws { detail, .. } => {
                        *detail = aws_detail.clone();
                        Ok(())
                    }
                    other => Err(detail_mismatch(id, ProviderType::Aws, other)),
                })
            })?;
            debug!(reservation_id = id, "aws detail replaced");
            Ok(())
        })
    }

    fn finish(
        &self,
        scope: &SystemScope,
        id: ReservationId,
        outcome: Outcome,
    ) -> StateResult<Reservation> {
        scope.in_scope(|| {
            let reservation = self.write(|txn| {
                let mut headers = txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
                let mut reservation: Reservation =
                    load(&headers, id)?.ok_or_else(|| StateError::reservation_not_found(id))?;
                if let Some(existing) = &reservation.outcome {
                    return Err(StateError::Conflict(format!(
                        "reservation {id} already finished ({existing:?})"
                    )));
                }
                let now = unix_now();
                reservation.outcome = Some(outcome);
                reservation.finished_at = Some(now);
                reservation.updated_at = now;
                let value = encode(&reservation)?;
                headers
                    .insert(id, value.as_slice())
                    .map_err(map_err!(Write))?;
                Ok(reservation)
            })?;
            info!(
                reservation_id = id,
                state = ?reservation.state(),
                error = reservation.error().unwrap_or_default(),
                "reservation finished"
            );
            Ok(reservation)
        })
    }

    fn delete_reservation(&self, scope: &SystemScope, id: ReservationId) -> StateResult<bool> {
        scope.in_scope(|| {
            let removed = self.write(|txn| {
                let mut headers = txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
                let Some(guard) = headers.remove(id).map_err(map_err!(Write))? else {
                    return Ok(0);
                };
                let reservation: Reservation = decode(guard.value())?;
                drop(guard);

                let mut index = txn
                    .open_table(RESERVATIONS_BY_ACCOUNT)
                    .map_err(map_err!(Table))?;
                index
                    .remove(account_reservation_key(reservation.account_id, id).as_str())
                    .map_err(map_err!(Write))?;

                let mut details = txn.open_table(DETAILS).map_err(map_err!(Table))?;
                details.remove(id).map_err(map_err!(Write))?;

                let mut instances = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
                let start = instance_prefix(id);
                let end = prefix_end(id);
                let keys: Vec<String> = instances
                    .range(start.as_str()..end.as_str())
                    .map_err(map_err!(Read))?
                    .map(|entry| entry.map(|(key, _)| key.value().to_string()))
                    .collect::<Result<_, _>>()
                    .map_err(map_err!(Read))?;
                for key in &keys {
                    instances.remove(key.as_str()).map_err(map_err!(Write))?;
                }
                Ok(1 + keys.len())
            })?;
            let existed = removed > 0;
            debug!(reservation_id = id, existed, instances = removed.saturating_sub(1), "reservation deleted");
            Ok(existed)
        })
    }

    fn unscoped_list_finished_before(
        &self,
        scope: &SystemScope,
        cutoff: u64,
        limit: usize,
    ) -> StateResult<Vec<ReservationId>> {
        scope.in_scope(|| {
            self.read(|txn| {
                let headers = txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
                let mut ids = Vec::new();
                for entry in headers.iter().map_err(map_err!(Read))? {
                    if ids.len() >= limit {
                        break;
                    }
                    let (key, value) = entry.map_err(map_err!(Read))?;
                    let reservation: Reservation = decode(value.value())?;
                    if reservation.finished_at.is_some_and(|at| at < cutoff) {
                        ids.push(key.value());
                    }
                }
                Ok(ids)
            })
        })
    }
}
