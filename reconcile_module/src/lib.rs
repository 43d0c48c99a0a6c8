//! Reconciliation core for labelled mail threads and tracked tasks.
//!
//! Everything in this crate is pure: it takes snapshots of both sides and
//! returns a [`SyncPlan`] describing the mutations that bring them back into
//! agreement. Applying the plan is the caller's job.

mod reconcile;

pub use reconcile::{
    Intent, Join, Pairing, Reconciler, ReferenceBuilder, SyncPlan, TaskRecord, TaskRef,
    TaskStatus, ThreadRecord, ValidationError, DEFAULT_LINK_BASE,
};
