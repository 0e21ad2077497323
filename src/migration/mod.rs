//! # Secret Content Migration
//!
//! Re-homes revision content when a model's active secret backend changes.
//! The [`MigrationCoordinator`] schedules one task per owner; each owner's
//! [`MigrationWorker`] moves the content and reports back through the task
//! notification streams.

pub mod coordinator;
pub mod worker;

pub use coordinator::{MigrationCoordinator, TaskScheduler};
pub use worker::{FixedLeadership, LeadershipTracker, MigrationWorker};
