//! Resize coalescing
//!
//! Every pty resize is a real system call with layout side effects, and UI
//! drag-resizing produces bursts of size changes. The coalescer keeps only
//! the most recent pending size per session and flushes it once that
//! session has been quiet for a fixed window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use crate::ids::SessionId;

use super::manager::TerminalManager;

/// Quiescence window before a session's pending resize is applied
const RESIZE_QUIESCENCE_MS: u64 = 100;

/// Coalescing queue in front of [`TerminalManager::resize`]
pub struct ResizeCoalescer {
    tx: mpsc::UnboundedSender<(SessionId, u16, u16)>,
    task: tokio::task::JoinHandle<()>,
}

impl ResizeCoalescer {
    /// Create a coalescer with the default 100 ms window
    #[must_use]
    pub fn new(manager: Arc<TerminalManager>) -> Self {
        Self::with_window(manager, Duration::from_millis(RESIZE_QUIESCENCE_MS))
    }

    /// Create a coalescer with an explicit quiescence window
    #[must_use]
    pub fn with_window(manager: Arc<TerminalManager>, window: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<(SessionId, u16, u16)>();

        let task = tokio::spawn(async move {
            // Deadlines are per session: a new request restarts only its own
            // session's window, so a steady drag on one pane cannot starve
            // another pane's pending resize.
            let mut pending: HashMap<SessionId, (u16, u16, Instant)> = HashMap::new();
            loop {
                if pending.is_empty() {
                    match rx.recv().await {
                        Some((session, cols, rows)) => {
                            pending.insert(session, (cols, rows, Instant::now() + window));
                        }
                        None => break,
                    }
                } else {
                    let Some(next_due) = pending.values().map(|&(_, _, due)| due).min() else {
                        continue;
                    };
                    tokio::select! {
                        msg = rx.recv() => match msg {
                            Some((session, cols, rows)) => {
                                pending.insert(session, (cols, rows, Instant::now() + window));
                            }
                            None => {
                                // Every deadline lies within one window of
                                // now, so this cutoff flushes everything.
                                flush_due(&manager, &mut pending, Instant::now() + window);
                                break;
                            }
                        },
                        _ = time::sleep_until(next_due) => {
                            flush_due(&manager, &mut pending, Instant::now());
                        }
                    }
                }
            }
        });

        Self { tx, task }
    }

    /// Queue a resize for `session`; only its latest size survives the window
    pub fn request(&self, session: &SessionId, cols: u16, rows: u16) {
        let _ = self.tx.send((session.clone(), cols, rows));
    }

    /// Stop the coalescer, discarding any pending resize
    ///
    /// For teardown paths where applying a late resize to a dying session
    /// would be wasted work.
    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for ResizeCoalescer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Apply every pending resize whose deadline has passed
fn flush_due(
    manager: &TerminalManager,
    pending: &mut HashMap<SessionId, (u16, u16, Instant)>,
    cutoff: Instant,
) {
    let due: Vec<SessionId> = pending
        .iter()
        .filter(|&(_, &(_, _, deadline))| deadline <= cutoff)
        .map(|(session, _)| session.clone())
        .collect();
    for session in due {
        let Some((cols, rows, _)) = pending.remove(&session) else {
            continue;
        };
        if let Err(e) = manager.resize(&session, cols, rows) {
            // The session may have been closed since the request; an
            // expected race, not a fault.
            log::debug!("[{session}] coalesced resize dropped: {e}");
        } else {
            log::debug!("[{session}] resized to {cols}x{rows}");
        }
    }
}
