//! Instances reported by providers, keyed by `{reservation}:{instance_id}`.

use prov_core::unix_now;
use redb::{ReadableTable, WriteTransaction};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::scope::SystemScope;
use crate::store::{StateStore, decode, encode};
use crate::tables::*;
use crate::traits::InstanceTracker;
use crate::types::*;

fn ensure_reservation(txn: &WriteTransaction, id: ReservationId) -> StateResult<()> {
    let headers = txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
    let exists = headers.get(id).map_err(map_err!(Read))?.is_some();
    if !exists {
        return Err(StateError::reservation_not_found(id));
    }
    Ok(())
}

fn validate(description: &InstanceDescription) -> StateResult<()> {
    if description.instance_id.trim().is_empty() {
        return Err(StateError::Validation("instance id is empty".to_string()));
    }
    Ok(())
}

impl InstanceTracker for StateStore {
    fn create_instance(
        &self,
        scope: &SystemScope,
        instance: &ReservationInstance,
    ) -> StateResult<()> {
        validate(&instance.description)?;
        let key = instance.table_key();
        scope.in_scope(|| {
            self.write(|txn| {
                ensure_reservation(txn, instance.reservation_id)?;
                let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
                if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                    return Err(StateError::Conflict(format!(
                        "instance {} already tracked for reservation {}",
                        instance.instance_id(),
                        instance.reservation_id
                    )));
                }
                let value = encode(instance)?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
                Ok(())
            })?;
            debug!(%key, "instance stored");
            Ok(())
        })
    }

    fn list_instances(
        &self,
        scope: &SystemScope,
        reservation_id: ReservationId,
    ) -> StateResult<Vec<ReservationInstance>> {
        let start = instance_prefix(reservation_id);
        let end = prefix_end(reservation_id);
        scope.in_scope(|| {
            self.read(|txn| {
                let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
                let mut results = Vec::new();
                for entry in table
                    .range(start.as_str()..end.as_str())
                    .map_err(map_err!(Read))?
                {
                    let (_, value) = entry.map_err(map_err!(Read))?;
                    results.push(decode(value.value())?);
                }
                Ok(results)
            })
        })
    }

    fn update_reservation_instance(
        &self,
        scope: &SystemScope,
        reservation_id: ReservationId,
        description: &InstanceDescription,
    ) -> StateResult<ReservationInstance> {
        validate(description)?;
        let key = instance_key(reservation_id, &description.instance_id);
        scope.in_scope(|| {
            let (instance, created) = self.write(|txn| {
                ensure_reservation(txn, reservation_id)?;
                let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
                let existing: Option<ReservationInstance> =
                    match table.get(key.as_str()).map_err(map_err!(Read))? {
                        Some(guard) => Some(decode(guard.value())?),
                        None => None,
                    };
                let created = existing.is_none();
                let instance = match existing {
                    Some(mut instance) => {
                        instance.description = description.clone();
                        instance.updated_at = unix_now();
                        instance
                    }
                    None => ReservationInstance::new(reservation_id, description.clone()),
                };
                let value = encode(&instance)?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
                Ok((instance, created))
            })?;
            debug!(
                reservation_id,
                instance_id = %description.instance_id,
                status = description.status.as_deref().unwrap_or_default(),
                created,
                "instance upserted"
            );
            Ok(instance)
        })
    }
}
