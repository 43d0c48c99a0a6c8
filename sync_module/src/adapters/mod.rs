//! Backends the driver talks to.
//!
//! The driver only sees the two traits below. `gmail` and `taskwarrior`
//! are the production implementations.

pub mod gmail;
pub mod taskwarrior;

use reconcile_module::{TaskRecord, ThreadRecord};

use crate::error::SyncError;

pub use gmail::GmailThreadSource;
pub use taskwarrior::TaskwarriorStore;

/// Mail service side: threads carrying the action label.
pub trait ThreadSource {
    /// Every thread currently carrying `label`.
    ///
    /// Fails with `NotFound` when the label does not exist.
    fn list_labelled_threads(&self, label: &str) -> Result<Vec<ThreadRecord>, SyncError>;

    /// Fails with `NotFound` when the thread no longer exists.
    fn remove_label(&self, thread_id: &str, label: &str) -> Result<(), SyncError>;
}

/// Task tracker side.
pub trait TaskStore {
    fn list_tasks(&self, tag: &str) -> Result<Vec<TaskRecord>, SyncError>;

    fn create_task(&self, description: &str, tag: &str) -> Result<TaskRecord, SyncError>;

    fn annotate_task(&self, task_id: &str, reference: &str) -> Result<(), SyncError>;

    fn mark_task_done(&self, task_id: &str) -> Result<(), SyncError>;
}
