//! provgrid reservation lifecycle.
//!
//! A reservation starts `Created`, advances through free-form status labels
//! while its step counter grows (`InProgress`), and terminates exactly once
//! in `Succeeded` or `Failed`. This crate drives those transitions on top of
//! the store capabilities from `provgrid-state`.
//!
//! # Components
//!
//! - **`manager`**: [`LifecycleManager`], async deadline-bounded store calls
//!   from creation through finalization
//! - **`jobs`**: the no-op job used to exercise the pipeline end to end
//! - **`cleanup`**: background deletion of long-finished reservations

pub mod cleanup;
pub mod jobs;
pub mod manager;

pub use cleanup::Cleaner;
pub use jobs::{run_noop_job, spawn_noop_job};
pub use manager::LifecycleManager;
