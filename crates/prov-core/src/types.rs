//! Shared types used across provgrid crates.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Surrogate identifier of a tenant account.
pub type AccountId = u64;

/// Surrogate identifier of a reservation.
pub type ReservationId = u64;

/// Cloud provider a reservation is provisioned on.
///
/// `Noop` reservations never reach a cloud; they exist so the job pipeline
/// can be exercised end to end in integration environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Noop,
    Aws,
    Azure,
    Gcp,
}

impl ProviderType {
    pub const ALL: [ProviderType; 4] = [
        ProviderType::Noop,
        ProviderType::Aws,
        ProviderType::Azure,
        ProviderType::Gcp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Noop => "noop",
            ProviderType::Aws => "aws",
            ProviderType::Azure => "azure",
            ProviderType::Gcp => "gcp",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown provider type: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderType {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "noop" | "none" => Ok(ProviderType::Noop),
            "aws" => Ok(ProviderType::Aws),
            "azure" => Ok(ProviderType::Azure),
            "gcp" => Ok(ProviderType::Gcp),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// Instance as reported by a cloud provider client.
///
/// Stored verbatim; provgrid never interprets the provider-specific fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescription {
    /// Provider instance identifier (e.g. `i-0abc...` on EC2).
    pub instance_id: String,
    /// Instance type / machine size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Provider status string: "pending", "running", ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ipv4: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_dns: Option<String>,
}

impl InstanceDescription {
    /// Description carrying only the identifier, as known right after launch.
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
