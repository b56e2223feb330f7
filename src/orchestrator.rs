//! Multi-job orchestrator
//!
//! Client-side coordinator that launches one job per logical participant,
//! tracks per-task progress through the shared event router, and merges the
//! completed outputs into a single document once every task has reached a
//! terminal state. A pure consumer of the same streaming protocol the UI
//! uses; all process ownership stays in the [`JobManager`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::events::{JobEvent, Subscription};
use crate::ids::JobId;
use crate::jobs::{JobManager, JobState, RunSpec};

/// Separator between merged sections
const SECTION_SEPARATOR: &str = "\n\n---\n\n";

/// How often task states are reconciled against manager snapshots while
/// waiting, to cover events that raced the subscription
const RECONCILE_INTERVAL_MS: u64 = 50;

/// One participant in a `run_all` invocation
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// Caller-supplied label, used verbatim as the merge section header
    pub label: String,
    /// Prompt sent to this participant's job
    pub prompt: String,
}

impl TaskSpec {
    /// Create a task spec
    pub fn new(label: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            prompt: prompt.into(),
        }
    }
}

/// Per-participant progress, kept in input order
#[derive(Debug, Clone, Serialize)]
pub struct JobTask {
    /// Section header for the merge
    pub label: String,
    /// Id of the launched job; `None` when the spawn itself failed
    pub job: Option<JobId>,
    /// Last observed job state
    pub state: JobState,
    /// Failure description, for spawn failures and errored jobs
    pub error: Option<String>,
    /// Output observed so far
    pub output: String,
}

/// Overall status of the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestratorStatus {
    /// No `run_all` in flight
    Idle,
    /// At least one task has not reached a terminal state
    Running,
    /// All tasks terminal, none errored
    Done,
    /// All tasks terminal, at least one errored. The merge is still produced
    /// from the successful subset.
    Errored,
}

/// Coordinator for a batch of parallel jobs
pub struct Orchestrator {
    manager: Arc<JobManager>,
    tasks: Vec<JobTask>,
    subscription: Option<Subscription>,
    status: OrchestratorStatus,
    result: Option<String>,
}

impl Orchestrator {
    /// Create an idle orchestrator over `manager`
    #[must_use]
    pub fn new(manager: Arc<JobManager>) -> Self {
        Self {
            manager,
            tasks: Vec::new(),
            subscription: None,
            status: OrchestratorStatus::Idle,
            result: None,
        }
    }

    /// Launch one job per task, preserving input order
    ///
    /// A spawn failure marks that task `Errored` with a synthetic message and
    /// does not block launching the remaining tasks; there is nothing to
    /// return as a hard error here. Any previous batch is discarded.
    pub fn run_all(&mut self, specs: Vec<TaskSpec>, run: &RunSpec) -> &[JobTask] {
        self.reset();

        let subscription = self.manager.events().subscribe();
        for spec in specs {
            match self.manager.run(&spec.prompt, run) {
                Ok(id) => {
                    subscription.track(id.clone());
                    self.tasks.push(JobTask {
                        label: spec.label,
                        job: Some(id),
                        state: JobState::Running,
                        error: None,
                        output: String::new(),
                    });
                }
                Err(e) => {
                    log::warn!("Failed to launch job for '{}': {e}", spec.label);
                    self.tasks.push(JobTask {
                        label: spec.label,
                        job: None,
                        state: JobState::Errored,
                        error: Some(format!("Failed to launch job: {e}")),
                        output: String::new(),
                    });
                }
            }
        }

        self.subscription = Some(subscription);
        if self.all_terminal() {
            // Every spawn failed; nothing will ever emit an event.
            self.finalize();
        } else {
            self.status = OrchestratorStatus::Running;
        }
        &self.tasks
    }

    /// Drive the batch until every task is terminal, then merge
    ///
    /// Returns the final status. The merged document is only published
    /// through [`result`](Self::result) at the all-terminal instant;
    /// intermediate progress is visible per task via [`tasks`](Self::tasks).
    pub async fn wait(&mut self) -> OrchestratorStatus {
        if self.status != OrchestratorStatus::Running {
            return self.status;
        }
        let Some(mut subscription) = self.subscription.take() else {
            self.finalize();
            return self.status;
        };

        while !self.all_terminal() {
            tokio::select! {
                event = subscription.recv() => {
                    match event {
                        Some(event) => self.apply_event(event),
                        None => break,
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(RECONCILE_INTERVAL_MS)) => {
                    self.reconcile();
                }
            }
        }

        self.subscription = Some(subscription);
        self.finalize();
        self.status
    }

    /// Abort every outstanding task's job and reset to idle
    pub fn abort_all(&mut self) {
        for task in &self.tasks {
            if let Some(ref id) = task.job
                && !task.state.is_terminal()
            {
                self.manager.abort(id);
            }
        }
        self.reset();
    }

    /// Discard tasks, result and subscription
    pub fn reset(&mut self) {
        self.tasks.clear();
        self.subscription = None;
        self.status = OrchestratorStatus::Idle;
        self.result = None;
    }

    /// Per-task progress, in input order
    #[must_use]
    pub fn tasks(&self) -> &[JobTask] {
        &self.tasks
    }

    /// Overall status
    #[must_use]
    pub fn status(&self) -> OrchestratorStatus {
        self.status
    }

    /// The merged document, present only once every task is terminal
    #[must_use]
    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    fn all_terminal(&self) -> bool {
        self.tasks.iter().all(|t| t.state.is_terminal())
    }

    fn apply_event(&mut self, event: JobEvent) {
        let Some(task) = self
            .tasks
            .iter_mut()
            .find(|t| t.job.as_ref() == Some(event.job()))
        else {
            // Stale id; the subscription filter makes this unreachable in
            // practice, but late events are never a fault.
            return;
        };
        match event {
            JobEvent::Chunk { text, .. } => task.output.push_str(&text),
            JobEvent::Done { .. } => task.state = JobState::Done,
            JobEvent::Error { message, .. } => {
                task.state = JobState::Errored;
                task.error = Some(message);
            }
        }
    }

    /// Refresh non-terminal tasks from manager snapshots
    ///
    /// Covers notifications emitted between `run` returning and the
    /// subscription tracking the id; the job's accumulated output is the
    /// authoritative text either way.
    fn reconcile(&mut self) {
        for task in &mut self.tasks {
            if task.state.is_terminal() {
                continue;
            }
            let Some(ref id) = task.job else {
                continue;
            };
            match self.manager.snapshot(id) {
                Some(snap) => {
                    task.state = snap.state;
                    task.error = snap.error;
                    task.output = snap.output;
                }
                None => {
                    task.state = JobState::Errored;
                    task.error = Some("Job is no longer tracked by the manager".to_string());
                }
            }
        }
    }

    /// Compute the merge and the final status at the all-terminal instant
    fn finalize(&mut self) {
        // Snapshots hold the full accumulated output; prefer them over the
        // chunk stream the subscription happened to observe.
        for task in &mut self.tasks {
            if let Some(ref id) = task.job
                && let Some(snap) = self.manager.snapshot(id)
            {
                task.state = snap.state;
                task.error = snap.error;
                task.output = snap.output;
            }
        }

        let any_errored = self.tasks.iter().any(|t| t.state == JobState::Errored);
        self.result = Some(merge_sections(&self.tasks));
        self.status = if any_errored {
            OrchestratorStatus::Errored
        } else {
            OrchestratorStatus::Done
        };
    }
}

/// Deterministic merge of completed task outputs
///
/// Tasks whose text is empty or whitespace-only are skipped; each remaining
/// task becomes a `## {label}` section over its trimmed text, joined in
/// original task order.
fn merge_sections(tasks: &[JobTask]) -> String {
    tasks
        .iter()
        .filter(|t| !t.output.trim().is_empty())
        .map(|t| format!("## {}\n\n{}", t.label, t.output.trim()))
        .collect::<Vec<_>>()
        .join(SECTION_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(label: &str, state: JobState, output: &str) -> JobTask {
        JobTask {
            label: label.to_string(),
            job: None,
            state,
            error: None,
            output: output.to_string(),
        }
    }

    #[test]
    fn merge_skips_empty_and_keeps_order() {
        let tasks = vec![
            task("Alice", JobState::Done, "alpha\n"),
            task("Bob", JobState::Errored, "  \n"),
            task("Carol", JobState::Done, "gamma"),
        ];
        assert_eq!(
            merge_sections(&tasks),
            "## Alice\n\nalpha\n\n---\n\n## Carol\n\ngamma"
        );
    }

    #[test]
    fn merge_of_all_empty_is_empty() {
        let tasks = vec![task("A", JobState::Done, ""), task("B", JobState::Done, "\t")];
        assert_eq!(merge_sections(&tasks), "");
    }

    #[test]
    fn merge_single_section_has_no_separator() {
        let tasks = vec![task("Bob", JobState::Done, "done\n")];
        assert_eq!(merge_sections(&tasks), "## Bob\n\ndone");
    }
}
