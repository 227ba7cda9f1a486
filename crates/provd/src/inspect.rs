//! One-shot operator commands. Results go to stdout as pretty JSON.

use anyhow::Context;
use prov_core::ProvConfig;
use provgrid_lifecycle::{Cleaner, LifecycleManager, run_noop_job};
use provgrid_state::{
    AccountDirectory, NewReservation, ReservationId, StateStore, StatisticsSource, SystemScope,
    TenantScope,
};
use serde::Serialize;
use tracing::info;

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn tenant(store: &StateStore, org_id: &str) -> anyhow::Result<TenantScope> {
    let account = store
        .get_account_by_org(&SystemScope::new(), org_id)
        .with_context(|| format!("organization {org_id}"))?;
    Ok(TenantScope::new(account.id))
}

pub fn stats(store: &StateStore) -> anyhow::Result<()> {
    print(&store.statistics(&SystemScope::new())?)
}

pub fn accounts(store: &StateStore, limit: usize, offset: usize) -> anyhow::Result<()> {
    print(&store.list_accounts(&SystemScope::new(), limit, offset)?)
}

pub async fn reservations(
    manager: &LifecycleManager<StateStore>,
    org_id: &str,
    limit: usize,
    offset: usize,
) -> anyhow::Result<()> {
    let scope = tenant(manager.store(), org_id)?;
    print(&manager.list(&scope, limit, offset).await?)
}

pub async fn show(
    manager: &LifecycleManager<StateStore>,
    org_id: &str,
    id: ReservationId,
) -> anyhow::Result<()> {
    let scope = tenant(manager.store(), org_id)?;
    let (reservation, detail) = manager.get_with_detail(&scope, id).await?;
    let instances = manager.list_instances(&scope.unscoped(), id).await?;
    print(&serde_json::json!({
        "reservation": reservation,
        "state": reservation.state(),
        "detail": detail,
        "instances": instances,
    }))
}

pub async fn noop(
    manager: &LifecycleManager<StateStore>,
    org_id: &str,
    account_number: Option<&str>,
) -> anyhow::Result<()> {
    let account = manager
        .store()
        .get_or_create(&SystemScope::new(), org_id, account_number)?;
    let scope = TenantScope::new(account.id);
    let created = manager
        .create_noop(
            &scope,
            NewReservation::new("Created", vec!["No operation".to_string()]),
        )
        .await?;
    let id = created.reservation.id;
    info!(reservation_id = id, account_id = account.id, "noop reservation created");

    let reservation = run_noop_job(manager, &scope.unscoped(), id).await?;
    print(&reservation)
}

pub async fn cleanup(
    manager: LifecycleManager<StateStore>,
    config: &ProvConfig,
) -> anyhow::Result<()> {
    let cleaner = Cleaner::new(
        manager,
        config.cleanup_interval(),
        config.cleanup_retention(),
        config.cleanup.batch_size,
    );
    let deleted = cleaner.sweep().await?;
    print(&serde_json::json!({ "deleted": deleted }))
}
