//! Tenant-scoped reservation store for provgrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for accounts, reservations with their provider detail rows, and
//! the instances providers report for them.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{account}:{reservation}`, `{reservation}:{instance}`)
//! enable efficient prefix scans for related records. Every multi-row change
//! runs in one write transaction, so a reservation header is never visible
//! without its detail row.
//!
//! Access rules live in the types: operations taking a [`TenantScope`] only
//! see rows of that account, operations taking a [`SystemScope`] work on ids
//! the caller already validated.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across threads and async tasks.

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| $crate::error::StateError::$variant(e.to_string())
    };
}

pub mod error;
pub mod instances;
pub mod reservations;
pub mod scope;
pub mod stats;
pub mod store;
pub mod tables;
pub mod traits;
pub mod types;

pub use error::{ErrorKind, StateError, StateResult};
pub use scope::{Scope, System, SystemScope, Tenant, TenantScope};
pub use store::StateStore;
pub use traits::{AccountDirectory, InstanceTracker, ReservationStore, StatisticsSource};
pub use types::*;
