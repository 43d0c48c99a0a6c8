mod errors;
mod reconciler;
mod reference;
mod types;

pub use errors::ValidationError;
pub use reconciler::Reconciler;
pub use reference::{ReferenceBuilder, DEFAULT_LINK_BASE};
pub use types::{Intent, Join, Pairing, SyncPlan, TaskRecord, TaskRef, TaskStatus, ThreadRecord};
