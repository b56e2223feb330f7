//! Job state structures
//!
//! Defines the state machine and the shared record that a job's collector
//! task, the manager registry, and snapshot readers all observe.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::agents::AgentId;
use crate::ids::JobId;

/// Lifecycle state of a job
///
/// `Running` is the only non-terminal state. Terminal states are absorbing:
/// no transition ever leaves them and no event is published afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Child process is alive and may still produce output
    Running,
    /// Process exited with code zero
    Done,
    /// Process exited non-zero or its stream failed
    Errored,
    /// Terminated at the caller's request
    Aborted,
}

impl JobState {
    /// Whether the state is `Done`, `Errored` or `Aborted`
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobState::Running)
    }
}

/// Mutable body of a job, shared between the manager and the collector task
///
/// Guarded by a single mutex so that a state check and the matching event
/// publication happen atomically with respect to `abort`.
pub(super) struct JobBody {
    pub state: JobState,
    /// Append-only while `Running`; frozen on any terminal transition
    pub output: String,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobBody {
    pub fn new() -> Self {
        Self {
            state: JobState::Running,
            output: String::new(),
            error: None,
            completed_at: None,
        }
    }
}

/// Point-in-time view of a job, safe to hand across the UI boundary
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    /// The job's id
    pub id: JobId,
    /// Which agent the job runs
    pub agent: AgentId,
    /// Current lifecycle state
    pub state: JobState,
    /// Output accumulated so far (complete once `state` is terminal)
    pub output: String,
    /// Failure description when `state` is `Errored`
    pub error: Option<String>,
    /// Wall-clock instant of the terminal transition
    pub completed_at: Option<DateTime<Utc>>,
}
