//! Taskwarrior as the task store, driven through the `task` CLI.
//!
//! Tasks are addressed by uuid; the numeric working-set ids shift whenever
//! a task is completed.

use regex::Regex;
use serde::Deserialize;
use std::io;
use std::path::PathBuf;
use std::process::Command;
use std::sync::LazyLock;
use tracing::debug;

use reconcile_module::{TaskRecord, TaskStatus};

use super::TaskStore;
use crate::error::{ConfigError, SyncError};

/// Overrides applied to every invocation so the CLI never prompts.
const BASE_OVERRIDES: &[&str] = &["rc.confirmation=off", "rc.json.array=on"];

static CREATED_TASK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Created task ([0-9A-Za-z-]+)").expect("valid created-task pattern")
});

#[derive(Debug, Clone)]
pub struct TaskwarriorStore {
    task_bin: PathBuf,
}

impl Default for TaskwarriorStore {
    fn default() -> Self {
        Self::new("task")
    }
}

impl TaskwarriorStore {
    pub fn new(task_bin: impl Into<PathBuf>) -> Self {
        Self {
            task_bin: task_bin.into(),
        }
    }

    /// Runs `task` and returns its stdout.
    fn run(&self, what: &str, args: &[&str]) -> Result<String, SyncError> {
        let mut cmd = Command::new(&self.task_bin);
        cmd.args(BASE_OVERRIDES).args(args);
        debug!("running {} {}", self.task_bin.display(), args.join(" "));

        let output = match cmd.output() {
            Ok(output) => output,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ConfigError::TaskBinaryNotFound {
                    path: self.task_bin.clone(),
                }
                .into())
            }
            Err(err) => return Err(SyncError::Io(err)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let mut combined = stdout;
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        if combined.contains("No matches") || combined.contains("No tasks specified") {
            return Err(SyncError::not_found(what));
        }
        Err(SyncError::TaskCommand {
            status: output.status.code(),
            output: tail_string(&combined, 2000),
        })
    }

    fn export(&self, what: &str, filter: &[&str]) -> Result<Vec<TaskwarriorTask>, SyncError> {
        let mut args = vec!["rc.verbose=nothing"];
        args.extend_from_slice(filter);
        args.push("export");
        let stdout = self.run(what, &args)?;
        parse_export(&stdout)
    }
}

impl TaskStore for TaskwarriorStore {
    fn list_tasks(&self, tag: &str) -> Result<Vec<TaskRecord>, SyncError> {
        let filter = format!("+{}", tag);
        let tasks = self.export("tasks", &[filter.as_str()])?;
        Ok(tasks
            .into_iter()
            .filter_map(TaskwarriorTask::into_record)
            .collect())
    }

    fn create_task(&self, description: &str, tag: &str) -> Result<TaskRecord, SyncError> {
        let tag_arg = format!("+{}", tag);
        let stdout = self.run(
            "new task",
            &["rc.verbose=new-uuid", "add", tag_arg.as_str(), "--", description],
        )?;
        let created = parse_created_task(&stdout).ok_or_else(|| SyncError::TaskCommand {
            status: Some(0),
            output: format!("could not find the new task in output: {}", stdout.trim()),
        })?;

        let what = format!("task {}", created);
        self.export(&what, &[created.as_str()])?
            .into_iter()
            .find_map(TaskwarriorTask::into_record)
            .ok_or_else(|| SyncError::not_found(what))
    }

    fn annotate_task(&self, task_id: &str, reference: &str) -> Result<(), SyncError> {
        let what = format!("task {}", task_id);
        self.run(&what, &[task_id, "annotate", "--", reference])?;
        Ok(())
    }

    fn mark_task_done(&self, task_id: &str) -> Result<(), SyncError> {
        let what = format!("task {}", task_id);
        self.run(&what, &[task_id, "done"])?;
        Ok(())
    }
}

/// One entry of `task export`.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskwarriorTask {
    pub uuid: String,
    #[serde(default)]
    pub id: Option<u64>,
    pub description: String,
    pub status: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub annotations: Vec<TaskwarriorAnnotation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskwarriorAnnotation {
    #[serde(default)]
    pub entry: Option<String>,
    pub description: String,
}

impl TaskwarriorTask {
    /// `None` for deleted tasks and recurrence templates.
    pub fn into_record(self) -> Option<TaskRecord> {
        let status = match self.status.as_str() {
            "pending" | "waiting" => TaskStatus::Pending,
            "completed" => TaskStatus::Completed,
            _ => return None,
        };
        Some(TaskRecord {
            task_id: self.uuid,
            description: self.description,
            status,
            annotations: self
                .annotations
                .into_iter()
                .map(|annotation| annotation.description)
                .collect(),
            tags: self.tags,
        })
    }
}

pub fn parse_export(stdout: &str) -> Result<Vec<TaskwarriorTask>, SyncError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(trimmed)?)
}

pub fn parse_created_task(stdout: &str) -> Option<String> {
    CREATED_TASK
        .captures(stdout)
        .and_then(|caps| caps.get(1))
        .map(|id| id.as_str().to_string())
}

fn tail_string(input: &str, max_len: usize) -> String {
    let trimmed = input.trim();
    if trimmed.len() <= max_len {
        return trimmed.to_string();
    }
    let mut start = trimmed.len().saturating_sub(max_len);
    while start < trimmed.len() && !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}
