use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::ValidationError;

/// One labelled conversation as seen by the mail service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub thread_id: String,
    /// Subject header of the first message, if it had one.
    #[serde(default)]
    pub subject: Option<String>,
    /// `None` when the service returned the thread without any message.
    #[serde(default)]
    pub first_message_id: Option<String>,
}

impl ThreadRecord {
    pub fn new(
        thread_id: impl Into<String>,
        subject: Option<String>,
        first_message_id: impl Into<String>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            subject,
            first_message_id: Some(first_message_id.into()),
        }
    }

    /// Subject used as the task description; empty when the header was absent.
    pub fn subject_text(&self) -> &str {
        self.subject.as_deref().unwrap_or("")
    }

    /// Human readable label for log lines.
    pub fn display_name(&self) -> &str {
        match self.subject.as_deref() {
            Some(subject) if !subject.trim().is_empty() => subject,
            _ => &self.thread_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
}

/// One task from the task store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub annotations: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl TaskRecord {
    pub fn is_managed(&self, marker_tag: &str) -> bool {
        self.tags.iter().any(|tag| tag == marker_tag)
    }

    pub fn has_annotation(&self, reference: &str) -> bool {
        self.annotations.iter().any(|annotation| annotation == reference)
    }

    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }
}

/// Handle on the task an intent applies to.
///
/// `Created(n)` points at the n-th `CreateTask` intent of the same plan. The
/// identifier only exists once that creation has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TaskRef {
    Existing(String),
    Created(usize),
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskRef::Existing(task_id) => write!(f, "{}", task_id),
            TaskRef::Created(index) => write!(f, "<new task #{}>", index + 1),
        }
    }
}

/// A mutation proposed by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Intent {
    CreateTask { description: String },
    AnnotateTask { task: TaskRef, reference: String },
    MarkDone { task_id: String },
    RemoveLabel { thread_id: String },
}

impl Intent {
    pub fn label(&self) -> &'static str {
        match self {
            Intent::CreateTask { .. } => "create_task",
            Intent::AnnotateTask { .. } => "annotate_task",
            Intent::MarkDone { .. } => "mark_done",
            Intent::RemoveLabel { .. } => "remove_label",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::CreateTask { description } => write!(f, "create task \"{}\"", description),
            Intent::AnnotateTask { task, reference } => {
                write!(f, "annotate task {} with {}", task, reference)
            }
            Intent::MarkDone { task_id } => write!(f, "mark task {} done", task_id),
            Intent::RemoveLabel { thread_id } => write!(f, "remove label from thread {}", thread_id),
        }
    }
}

/// How a thread found its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Join {
    /// The task already carried this thread's reference annotation.
    Reference,
    /// The task description equals the thread subject.
    Subject,
    /// No task matched; a new one is created.
    Created,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pairing {
    pub thread_id: String,
    pub task: TaskRef,
    pub join: Join,
}

/// Output of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncPlan {
    /// Intents in the order they must be applied.
    pub intents: Vec<Intent>,
    /// One entry per accepted thread, in snapshot order.
    pub pairings: Vec<Pairing>,
    /// Threads skipped because they were malformed.
    pub rejected: Vec<ValidationError>,
    /// Set when orphan closure was withheld because a thread could not be read.
    pub orphan_closure_suppressed: bool,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    pub fn count(&self, label: &str) -> usize {
        self.intents
            .iter()
            .filter(|intent| intent.label() == label)
            .count()
    }
}
