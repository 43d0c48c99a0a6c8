use std::collections::HashSet;

use super::errors::ValidationError;
use super::reference::ReferenceBuilder;
use super::types::{Intent, Join, Pairing, SyncPlan, TaskRecord, TaskRef, ThreadRecord};

/// Diffs labelled threads against sync-managed tasks.
#[derive(Debug, Clone)]
pub struct Reconciler {
    marker_tag: String,
    references: ReferenceBuilder,
}

/// A thread that passed validation, with its reference and eventual match.
struct Candidate<'a> {
    thread: &'a ThreadRecord,
    reference: String,
    matched: Option<(&'a TaskRecord, Join)>,
    rejected: bool,
}

impl Reconciler {
    pub fn new(marker_tag: impl Into<String>, references: ReferenceBuilder) -> Self {
        Self {
            marker_tag: marker_tag.into(),
            references,
        }
    }

    pub fn marker_tag(&self) -> &str {
        &self.marker_tag
    }

    /// Computes the intents that pair every labelled thread with one task.
    ///
    /// Neither input is modified. Running this again after the plan has been
    /// applied, with the same threads, yields no creations or annotations.
    pub fn reconcile(&self, threads: &[ThreadRecord], tasks: &[TaskRecord]) -> SyncPlan {
        let mut plan = SyncPlan::default();

        // Working multiset; a slot is emptied once its task is consumed.
        let mut remaining: Vec<Option<&TaskRecord>> = tasks
            .iter()
            .filter(|task| task.is_managed(&self.marker_tag))
            .map(Some)
            .collect();

        let mut candidates = self.validate(threads, &mut plan);

        for candidate in candidates.iter_mut() {
            if let Some(task) = take_first(&mut remaining, |task| {
                task.has_annotation(&candidate.reference)
            }) {
                candidate.matched = Some((task, Join::Reference));
            }
        }

        for candidate in candidates.iter_mut().filter(|c| c.matched.is_none()) {
            let subject = candidate.thread.subject_text();
            if subject.trim().is_empty() {
                candidate.rejected = true;
                plan.rejected.push(ValidationError::EmptySubject {
                    thread_id: candidate.thread.thread_id.clone(),
                });
                continue;
            }
            if let Some(task) = take_first(&mut remaining, |task| task.description == subject) {
                candidate.matched = Some((task, Join::Subject));
            }
        }

        let mut created = 0usize;
        for candidate in candidates.iter().filter(|c| !c.rejected) {
            let thread = candidate.thread;
            let (task_ref, annotated, completed, join) = match candidate.matched {
                Some((task, join)) => (
                    TaskRef::Existing(task.task_id.clone()),
                    task.has_annotation(&candidate.reference),
                    !task.is_pending(),
                    join,
                ),
                None => {
                    plan.intents.push(Intent::CreateTask {
                        description: thread.subject_text().to_string(),
                    });
                    created += 1;
                    (TaskRef::Created(created - 1), false, false, Join::Created)
                }
            };

            if !annotated {
                plan.intents.push(Intent::AnnotateTask {
                    task: task_ref.clone(),
                    reference: candidate.reference.clone(),
                });
            }

            if completed {
                plan.intents.push(Intent::RemoveLabel {
                    thread_id: thread.thread_id.clone(),
                });
            }

            plan.pairings.push(Pairing {
                thread_id: thread.thread_id.clone(),
                task: task_ref,
                join,
            });
        }

        if plan.orphan_closure_suppressed {
            return plan;
        }

        // Whatever is left lost its label outside of this system.
        for task in remaining.into_iter().flatten() {
            if task.is_pending() {
                plan.intents.push(Intent::MarkDone {
                    task_id: task.task_id.clone(),
                });
            }
        }

        plan
    }

    fn validate<'a>(&self, threads: &'a [ThreadRecord], plan: &mut SyncPlan) -> Vec<Candidate<'a>> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::with_capacity(threads.len());

        for thread in threads {
            if thread.thread_id.trim().is_empty() {
                plan.rejected.push(ValidationError::EmptyThreadId);
                continue;
            }
            if !seen.insert(thread.thread_id.as_str()) {
                plan.rejected.push(ValidationError::DuplicateThread {
                    thread_id: thread.thread_id.clone(),
                });
                continue;
            }
            let Some(reference) = self.references.for_thread(thread) else {
                // The task paired with this thread cannot be identified, so no
                // task may be treated as orphaned on this pass.
                plan.orphan_closure_suppressed = true;
                plan.rejected.push(ValidationError::MissingMessages {
                    thread_id: thread.thread_id.clone(),
                });
                continue;
            };
            candidates.push(Candidate {
                thread,
                reference,
                matched: None,
                rejected: false,
            });
        }

        candidates
    }
}

fn take_first<'a>(
    remaining: &mut [Option<&'a TaskRecord>],
    predicate: impl Fn(&TaskRecord) -> bool,
) -> Option<&'a TaskRecord> {
    remaining
        .iter_mut()
        .find(|slot| slot.map_or(false, |task| predicate(task)))
        .and_then(Option::take)
}
