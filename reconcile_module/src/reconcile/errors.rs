use serde::Serialize;

/// A thread the reconciler refused to process.
///
/// These never abort a pass: the thread is skipped and reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("thread without an identifier")]
    EmptyThreadId,
    #[error("thread {thread_id} appears more than once in the snapshot")]
    DuplicateThread { thread_id: String },
    #[error("thread {thread_id} has no messages")]
    MissingMessages { thread_id: String },
    #[error("thread {thread_id} has no subject and no task references it")]
    EmptySubject { thread_id: String },
}

impl ValidationError {
    pub fn thread_id(&self) -> Option<&str> {
        match self {
            ValidationError::EmptyThreadId => None,
            ValidationError::DuplicateThread { thread_id }
            | ValidationError::MissingMessages { thread_id }
            | ValidationError::EmptySubject { thread_id } => Some(thread_id),
        }
    }
}
