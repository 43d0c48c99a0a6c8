//! One reconciliation pass: snapshot, plan, apply.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, error, info, warn};

use reconcile_module::{Intent, Reconciler, SyncPlan, TaskRecord, TaskRef, ThreadRecord};

use crate::adapters::{TaskStore, ThreadSource};
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Apply,
    /// Compute and report the plan without touching either side.
    DryRun,
}

/// An intent that could not be applied.
#[derive(Debug, Clone, Serialize)]
pub struct IntentFailure {
    pub intent: Intent,
    /// Task description or thread subject, for manual follow-up.
    pub context: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub dry_run: bool,
    pub threads: usize,
    pub tasks: usize,
    pub created: usize,
    pub annotated: usize,
    pub marked_done: usize,
    pub labels_removed: usize,
    /// Intents not attempted because an earlier one for the same task failed.
    pub skipped: usize,
    pub rejected: Vec<String>,
    pub failures: Vec<IntentFailure>,
    /// Set when a fatal error stopped the apply phase midway.
    pub aborted: Option<String>,
    pub planned: Vec<Intent>,
}

impl SyncReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty() || self.skipped > 0 || self.aborted.is_some()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dry_run {
            writeln!(
                f,
                "Dry run: {} threads, {} tasks, {} planned changes",
                self.threads,
                self.tasks,
                self.planned.len()
            )?;
            for intent in &self.planned {
                writeln!(f, "  - {}", intent)?;
            }
        } else {
            writeln!(
                f,
                "Synced {} threads with {} tasks: {} created, {} annotated, {} marked done, {} labels removed",
                self.threads,
                self.tasks,
                self.created,
                self.annotated,
                self.marked_done,
                self.labels_removed
            )?;
        }
        for rejected in &self.rejected {
            writeln!(f, "  skipped thread: {}", rejected)?;
        }
        for failure in &self.failures {
            writeln!(
                f,
                "  failed to {} ({}): {}",
                failure.intent, failure.context, failure.error
            )?;
        }
        if self.skipped > 0 {
            writeln!(f, "  {} dependent changes skipped", self.skipped)?;
        }
        if let Some(reason) = &self.aborted {
            writeln!(f, "  aborted: {}", reason)?;
        }
        Ok(())
    }
}

/// Wires the two backends to the reconciler.
pub struct Driver<S: ThreadSource, T: TaskStore> {
    source: S,
    store: T,
    reconciler: Reconciler,
    label: String,
}

/// Snapshots the plan was computed from, used to describe intents in logs.
struct Snapshot {
    threads: Vec<ThreadRecord>,
    tasks: Vec<TaskRecord>,
}

impl Snapshot {
    fn thread_name(&self, thread_id: &str) -> String {
        self.threads
            .iter()
            .find(|thread| thread.thread_id == thread_id)
            .map(|thread| thread.display_name().to_string())
            .unwrap_or_else(|| thread_id.to_string())
    }

    fn task_description(&self, task_id: &str) -> String {
        self.tasks
            .iter()
            .find(|task| task.task_id == task_id)
            .map(|task| task.description.clone())
            .unwrap_or_else(|| task_id.to_string())
    }
}

impl<S: ThreadSource, T: TaskStore> Driver<S, T> {
    pub fn new(source: S, store: T, reconciler: Reconciler, label: impl Into<String>) -> Self {
        Self {
            source,
            store,
            reconciler,
            label: label.into(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn store(&self) -> &T {
        &self.store
    }

    /// Fetches both sides and computes the plan. Performs no mutation.
    pub fn plan(&self) -> Result<(SyncPlan, Vec<ThreadRecord>, Vec<TaskRecord>), SyncError> {
        let threads = self.source.list_labelled_threads(&self.label)?;
        let tasks = self.store.list_tasks(self.reconciler.marker_tag())?;
        debug!(
            "Snapshot: {} threads labelled {}, {} tasks tagged {}",
            threads.len(),
            self.label,
            tasks.len(),
            self.reconciler.marker_tag()
        );
        let plan = self.reconciler.reconcile(&threads, &tasks);
        Ok((plan, threads, tasks))
    }

    /// Runs one pass. Snapshot errors abort before anything is changed;
    /// failures while applying are isolated per intent.
    pub fn run(&self, mode: RunMode) -> Result<SyncReport, SyncError> {
        let (plan, threads, tasks) = self.plan()?;

        let mut report = SyncReport {
            dry_run: mode == RunMode::DryRun,
            threads: threads.len(),
            tasks: tasks.len(),
            planned: plan.intents.clone(),
            ..Default::default()
        };
        for rejected in &plan.rejected {
            warn!("Skipping malformed thread: {}", rejected);
            report.rejected.push(rejected.to_string());
        }
        if plan.is_empty() {
            info!("Gmail and Taskwarrior are already in sync");
        }
        if plan.orphan_closure_suppressed {
            warn!("Not closing unlabelled tasks this run because a thread could not be read");
        }

        if mode == RunMode::DryRun {
            return Ok(report);
        }

        let snapshot = Snapshot { threads, tasks };
        self.apply(&plan, &snapshot, &mut report);
        Ok(report)
    }

    fn apply(&self, plan: &SyncPlan, snapshot: &Snapshot, report: &mut SyncReport) {
        // Identifier of each created task, indexed like `TaskRef::Created`.
        let mut created: Vec<Option<String>> = Vec::new();
        let mut descriptions: HashMap<String, String> = HashMap::new();
        let tag = self.reconciler.marker_tag();

        for intent in &plan.intents {
            let (context, result) = match intent {
                Intent::CreateTask { description } => {
                    let result = self.store.create_task(description, tag).map(|task| {
                        info!("Created task \"{}\"", description);
                        descriptions.insert(task.task_id.clone(), description.clone());
                        created.push(Some(task.task_id));
                        report.created += 1;
                    });
                    if result.is_err() {
                        created.push(None);
                    }
                    (description.clone(), result)
                }
                Intent::AnnotateTask { task, reference } => {
                    let task_id = match task {
                        TaskRef::Existing(task_id) => task_id.clone(),
                        TaskRef::Created(index) => match created.get(*index).cloned().flatten() {
                            Some(task_id) => task_id,
                            None => {
                                warn!("Not annotating {}: the task was not created", task);
                                report.skipped += 1;
                                continue;
                            }
                        },
                    };
                    let context = descriptions
                        .get(&task_id)
                        .cloned()
                        .unwrap_or_else(|| snapshot.task_description(&task_id));
                    let result = self.store.annotate_task(&task_id, reference).map(|()| {
                        debug!("Annotated \"{}\" with {}", context, reference);
                        report.annotated += 1;
                    });
                    (context, result)
                }
                Intent::MarkDone { task_id } => {
                    let context = snapshot.task_description(task_id);
                    let result = self.store.mark_task_done(task_id).map(|()| {
                        info!(
                            "Marking task \"{}\" done because it's not labelled in gmail",
                            context
                        );
                        report.marked_done += 1;
                    });
                    (context, result)
                }
                Intent::RemoveLabel { thread_id } => {
                    let context = snapshot.thread_name(thread_id);
                    let result = self.source.remove_label(thread_id, &self.label).map(|()| {
                        info!("\"{}\" is complete! Removed label", context);
                        report.labels_removed += 1;
                    });
                    (context, result)
                }
            };

            let Err(err) = result else {
                continue;
            };

            if err.is_fatal() {
                error!("Stopping: could not {} ({}): {}", intent, context, err);
                report.aborted = Some(err.to_string());
                report.failures.push(IntentFailure {
                    intent: intent.clone(),
                    context,
                    error: err.to_string(),
                });
                return;
            }

            if err.is_not_found() {
                warn!("Could not {} ({}): {}", intent, context, err);
            } else {
                error!("Could not {} ({}): {}", intent, context, err);
            }
            report.failures.push(IntentFailure {
                intent: intent.clone(),
                context,
                error: err.to_string(),
            });
        }
    }
}
