//! Domain types for the provgrid state store.
//!
//! These types represent the persisted state of accounts, reservations,
//! provider details, and reported instances. All types are serializable
//! to/from JSON for storage in redb tables.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use prov_core::{AccountId, InstanceDescription, ProviderType, ReservationId};

use crate::error::{StateError, StateResult};

// ── Account ───────────────────────────────────────────────────────

/// Tenant identity. Every other record is owned by exactly one account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    /// External organization id, unique across accounts.
    pub org_id: String,
    /// External (legacy) account number, when the identity carries one.
    pub account_number: Option<String>,
}

// ── Reservation ───────────────────────────────────────────────────

/// Terminal outcome of a reservation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed { error: String },
}

/// Lifecycle state derived from a reservation header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    Created,
    InProgress,
    Succeeded,
    Failed,
}

impl ReservationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReservationState::Succeeded | ReservationState::Failed)
    }
}

/// Generic header of a provisioning job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reservation {
    pub id: ReservationId,
    pub account_id: AccountId,
    pub provider: ProviderType,
    /// Free-form status label set by the job driver.
    pub status: String,
    /// Steps completed so far. Never decreases.
    pub step: u32,
    /// Planned number of steps.
    pub steps: u32,
    pub step_titles: Vec<String>,
    /// `None` while the job runs; set exactly once.
    pub outcome: Option<Outcome>,
    /// Unix timestamp (seconds) when this reservation was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last header change.
    pub updated_at: u64,
    pub finished_at: Option<u64>,
}

impl Reservation {
    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Some(Outcome::Failed { error }) => Some(error.as_str()),
            _ => None,
        }
    }

    pub fn state(&self) -> ReservationState {
        match &self.outcome {
            Some(Outcome::Succeeded) => ReservationState::Succeeded,
            Some(Outcome::Failed { .. }) => ReservationState::Failed,
            None if self.step == 0 => ReservationState::Created,
            None => ReservationState::InProgress,
        }
    }
}

/// Caller-supplied part of a new reservation header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewReservation {
    pub status: String,
    pub steps: u32,
    #[serde(default)]
    pub step_titles: Vec<String>,
}

impl NewReservation {
    pub fn new(status: impl Into<String>, step_titles: Vec<String>) -> Self {
        Self {
            status: status.into(),
            steps: u32::try_from(step_titles.len()).unwrap_or(u32::MAX),
            step_titles,
        }
    }

    pub(crate) fn validate(&self) -> StateResult<()> {
        if self.step_titles.len() as u64 > u64::from(self.steps) {
            return Err(StateError::Validation(format!(
                "{} step titles for {} steps",
                self.step_titles.len(),
                self.steps
            )));
        }
        Ok(())
    }
}

// ── Provider details ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AwsDetail {
    pub source_id: String,
    pub image_id: String,
    pub region: String,
    pub instance_type: String,
    pub amount: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubkey_id: Option<u64>,
    #[serde(default)]
    pub power_off: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AzureDetail {
    pub source_id: String,
    pub image_id: String,
    pub resource_group: String,
    pub location: String,
    pub instance_size: String,
    pub amount: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubkey_id: Option<u64>,
    #[serde(default)]
    pub power_off: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GcpDetail {
    pub source_id: String,
    pub image_id: String,
    pub zone: String,
    pub machine_type: String,
    pub amount: u32,
    pub name_pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubkey_id: Option<u64>,
    #[serde(default)]
    pub power_off: bool,
}

/// Provider-specific companion row of a reservation, one variant per provider.
///
/// Identifiers assigned by the provider after launch live beside the
/// request payload so that replacing the payload keeps them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ReservationDetail {
    Noop,
    Aws {
        aws_reservation_id: Option<String>,
        detail: AwsDetail,
    },
    Azure {
        detail: AzureDetail,
    },
    Gcp {
        gcp_operation_name: Option<String>,
        detail: GcpDetail,
    },
}

impl ReservationDetail {
    pub fn aws(detail: AwsDetail) -> Self {
        ReservationDetail::Aws {
            aws_reservation_id: None,
            detail,
        }
    }

    pub fn azure(detail: AzureDetail) -> Self {
        ReservationDetail::Azure { detail }
    }

    pub fn gcp(detail: GcpDetail) -> Self {
        ReservationDetail::Gcp {
            gcp_operation_name: None,
            detail,
        }
    }

    pub fn provider(&self) -> ProviderType {
        match self {
            ReservationDetail::Noop => ProviderType::Noop,
            ReservationDetail::Aws { .. } => ProviderType::Aws,
            ReservationDetail::Azure { .. } => ProviderType::Azure,
            ReservationDetail::Gcp { .. } => ProviderType::Gcp,
        }
    }

    pub(crate) fn validate(&self) -> StateResult<()> {
        let (amount, location_field, location) = match self {
            ReservationDetail::Noop => return Ok(()),
            ReservationDetail::Aws { detail, .. } => (detail.amount, "region", &detail.region),
            ReservationDetail::Azure { detail } => {
                (detail.amount, "resource_group", &detail.resource_group)
            }
            ReservationDetail::Gcp { detail, .. } => (detail.amount, "zone", &detail.zone),
        };
        if location.trim().is_empty() {
            return Err(StateError::Validation(format!(
                "{} reservation requires a {location_field}",
                self.provider()
            )));
        }
        if amount == 0 {
            return Err(StateError::Validation(format!(
                "{} reservation requires amount >= 1",
                self.provider()
            )));
        }
        Ok(())
    }
}

/// No-op reservation projection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoopReservation {
    pub reservation: Reservation,
}

/// AWS reservation projection: header joined with its detail row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AwsReservation {
    pub reservation: Reservation,
    pub aws_reservation_id: Option<String>,
    pub detail: AwsDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AzureReservation {
    pub reservation: Reservation,
    pub detail: AzureDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GcpReservation {
    pub reservation: Reservation,
    pub gcp_operation_name: Option<String>,
    pub detail: GcpDetail,
}

// ── Instances ─────────────────────────────────────────────────────

/// Compute instance reported by a provider for a reservation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReservationInstance {
    pub reservation_id: ReservationId,
    pub description: InstanceDescription,
    pub created_at: u64,
    pub updated_at: u64,
}

impl ReservationInstance {
    pub fn new(reservation_id: ReservationId, description: InstanceDescription) -> Self {
        let now = prov_core::unix_now();
        Self {
            reservation_id,
            description,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.description.instance_id
    }

    /// Build the composite key for the instances table.
    pub fn table_key(&self) -> String {
        crate::tables::instance_key(self.reservation_id, &self.description.instance_id)
    }
}

// ── Statistics ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReservationCounts {
    pub total: u64,
    pub pending: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl ReservationCounts {
    pub(crate) fn record(&mut self, reservation: &Reservation) {
        self.total += 1;
        match &reservation.outcome {
            None => self.pending += 1,
            Some(Outcome::Succeeded) => self.succeeded += 1,
            Some(Outcome::Failed { .. }) => self.failed += 1,
        }
    }
}

/// Read-only snapshot aggregated over all reservations.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Statistics {
    pub all: ReservationCounts,
    pub last_24h: ReservationCounts,
    pub last_28d: ReservationCounts,
    /// Keyed by provider name (`aws`, `gcp`, ...).
    pub by_provider: BTreeMap<String, ReservationCounts>,
    /// Unix timestamp the snapshot was computed at.
    pub computed_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(step: u32, outcome: Option<Outcome>) -> Reservation {
        Reservation {
            id: 1,
            account_id: 1,
            provider: ProviderType::Noop,
            status: "x".to_string(),
            step,
            steps: 2,
            step_titles: vec![],
            outcome,
            created_at: 0,
            updated_at: 0,
            finished_at: None,
        }
    }

    #[test]
    fn state_is_derived_from_step_and_outcome() {
        assert_eq!(header(0, None).state(), ReservationState::Created);
        assert_eq!(header(1, None).state(), ReservationState::InProgress);
        assert_eq!(
            header(1, Some(Outcome::Succeeded)).state(),
            ReservationState::Succeeded
        );
        let failed = header(0, Some(Outcome::Failed { error: "boom".into() }));
        assert_eq!(failed.state(), ReservationState::Failed);
        assert_eq!(failed.error(), Some("boom"));
        assert!(failed.state().is_terminal());
    }

    #[test]
    fn detail_validation() {
        assert!(ReservationDetail::Noop.validate().is_ok());

        let missing_region = ReservationDetail::aws(AwsDetail {
            amount: 1,
            ..AwsDetail::default()
        });
        assert!(matches!(missing_region.validate(), Err(StateError::Validation(_))));

        let zero_amount = ReservationDetail::gcp(GcpDetail {
            zone: "us-east1-b".into(),
            ..GcpDetail::default()
        });
        assert!(matches!(zero_amount.validate(), Err(StateError::Validation(_))));

        let azure = ReservationDetail::azure(AzureDetail {
            resource_group: "rg".into(),
            amount: 2,
            ..AzureDetail::default()
        });
        assert!(azure.validate().is_ok());
    }

    #[test]
    fn detail_is_tagged_by_provider() {
        let json = serde_json::to_value(ReservationDetail::Noop).unwrap();
        assert_eq!(json["provider"], "noop");
        let aws = ReservationDetail::aws(AwsDetail::default());
        assert_eq!(serde_json::to_value(&aws).unwrap()["provider"], "aws");
        assert_eq!(aws.provider(), ProviderType::Aws);
    }

    #[test]
    fn too_many_step_titles_rejected() {
        let new = NewReservation {
            status: "created".into(),
            steps: 1,
            step_titles: vec!["a".into(), "b".into()],
        };
        assert!(matches!(new.validate(), Err(StateError::Validation(_))));
        assert!(NewReservation::new("created", vec!["a".into()]).validate().is_ok());
    }

    #[test]
    fn new_counts_one_step_per_title() {
        let new = NewReservation::new("created", vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(new.steps, 3);
        assert_eq!(NewReservation::new("created", vec![]).steps, 0);
    }
}
