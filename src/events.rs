//! Streaming protocol between the job manager and its consumers
//!
//! The [`EventRouter`] fans `chunk`/`done`/`error` notifications out to any
//! number of independent subscribers. A subscriber only ever receives events
//! for job ids it has explicitly tracked; notifications for unknown or stale
//! ids are dropped at the router, which makes late events from aborted or
//! superseded jobs an expected race rather than a fault.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::ids::JobId;

/// One notification about a running or finished job
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobEvent {
    /// Incremental output text, in emission order, before the terminal event
    Chunk {
        /// The job that produced the output
        job: JobId,
        /// The new output increment
        text: String,
    },
    /// The job's process exited with code zero. Exactly once per job.
    Done {
        /// The finished job
        job: JobId,
    },
    /// The job's process exited non-zero or its stream failed. Exactly once.
    Error {
        /// The failed job
        job: JobId,
        /// Human-readable failure description
        message: String,
    },
}

impl JobEvent {
    /// The job this event belongs to
    #[must_use]
    pub fn job(&self) -> &JobId {
        match self {
            JobEvent::Chunk { job, .. } | JobEvent::Done { job } | JobEvent::Error { job, .. } => {
                job
            }
        }
    }

    /// Whether this is a `done` or `error` notification
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobEvent::Chunk { .. })
    }
}

struct Subscriber {
    tracked: HashSet<JobId>,
    tx: mpsc::UnboundedSender<JobEvent>,
}

#[derive(Default)]
struct RouterInner {
    next_token: u64,
    subscribers: HashMap<u64, Subscriber>,
}

/// Process-wide fan-out point for [`JobEvent`]s
///
/// Cloning is cheap; all clones share the same subscriber table.
#[derive(Clone, Default)]
pub struct EventRouter {
    inner: Arc<Mutex<RouterInner>>,
}

impl EventRouter {
    /// Create an empty router
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber
    ///
    /// The returned [`Subscription`] starts with an empty job-id registry and
    /// receives nothing until [`Subscription::track`] is called. Dropping it
    /// unsubscribes deterministically.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        let token = inner.next_token;
        inner.next_token += 1;
        inner.subscribers.insert(
            token,
            Subscriber {
                tracked: HashSet::new(),
                tx,
            },
        );
        Subscription {
            inner: Arc::clone(&self.inner),
            token,
            rx,
        }
    }

    /// Deliver an event to every subscriber tracking its job id
    ///
    /// Normally driven by the job manager's collector tasks. Events whose id
    /// nobody tracks are silently discarded.
    pub fn publish(&self, event: JobEvent) {
        let inner = self.inner.lock();
        for sub in inner.subscribers.values() {
            if sub.tracked.contains(event.job()) {
                // A closed receiver just means the subscription is mid-drop.
                let _ = sub.tx.send(event.clone());
            }
        }
    }
}

/// A live subscription to the event router
///
/// Acts as the disposer for its subscriber slot: dropping the value removes
/// it from the router.
pub struct Subscription {
    inner: Arc<Mutex<RouterInner>>,
    token: u64,
    rx: mpsc::UnboundedReceiver<JobEvent>,
}

impl Subscription {
    /// Start receiving events for `job`
    pub fn track(&self, job: JobId) {
        let mut inner = self.inner.lock();
        if let Some(sub) = inner.subscribers.get_mut(&self.token) {
            sub.tracked.insert(job);
        }
    }

    /// Stop receiving events for `job`
    ///
    /// Events already queued on this subscription are not retracted.
    pub fn untrack(&self, job: &JobId) {
        let mut inner = self.inner.lock();
        if let Some(sub) = inner.subscribers.get_mut(&self.token) {
            sub.tracked.remove(job);
        }
    }

    /// Wait for the next tracked event
    ///
    /// Returns `None` only if the router side has gone away.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Option<JobEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.inner.lock().subscribers.remove(&self.token);
    }
}
