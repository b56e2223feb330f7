//! Background output collector for jobs
//!
//! One collector task is spawned per job. It owns the child process handle
//! and is the only place that publishes events or performs terminal state
//! transitions for its job, which keeps the per-job ordering guarantee
//! trivial: chunks in read order, then exactly one terminal event.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout};
use tokio::sync::{mpsc, oneshot};

use crate::events::{EventRouter, JobEvent};
use crate::ids::JobId;
use crate::utf8::Utf8Decoder;

use super::state::{JobBody, JobState};

/// Commands that can be sent to a job's collector task
pub(super) enum JobCommand {
    /// Kill the child process and reap it. The job's state has already been
    /// flipped to `Aborted` by the manager before this is sent.
    Abort {
        /// Signalled once the process has been reaped
        done_tx: oneshot::Sender<()>,
    },
}

/// Everything a collector task needs, handed over at spawn time
pub(super) struct CollectorContext {
    pub job: JobId,
    pub body: Arc<Mutex<JobBody>>,
    pub router: EventRouter,
    /// Stderr accumulated by the sibling drain task, folded into the error
    /// message on failure
    pub stderr: Arc<Mutex<String>>,
}

/// Spawn the collector task for one job
///
/// The task takes ownership of the child and its stdout pipe and runs until
/// the process exits or an abort command arrives.
pub(super) fn spawn_collector(
    mut child: Child,
    stdout: ChildStdout,
    mut command_rx: mpsc::UnboundedReceiver<JobCommand>,
    ctx: CollectorContext,
) {
    tokio::spawn(async move {
        let mut stdout = stdout;
        let mut buf = vec![0u8; 8192];
        let mut decoder = Utf8Decoder::new();

        loop {
            tokio::select! {
                Some(cmd) = command_rx.recv() => {
                    match cmd {
                        JobCommand::Abort { done_tx } => {
                            let _ = child.start_kill();
                            let _ = child.wait().await;
                            log::debug!("[{}] aborted and reaped", ctx.job);
                            let _ = done_tx.send(());
                            return;
                        }
                    }
                }
                read = stdout.read(&mut buf) => {
                    match read {
                        Ok(0) => {
                            let rest = decoder.finish();
                            if !rest.is_empty() {
                                publish_chunk(&ctx, rest);
                            }
                            finish(&mut child, &ctx).await;
                            return;
                        }
                        Ok(n) => {
                            // A read can end mid-character; the decoder
                            // carries the split bytes into the next read.
                            let text = decoder.decode(&buf[..n]);
                            if !text.is_empty() {
                                publish_chunk(&ctx, text);
                            }
                        }
                        Err(e) => {
                            let _ = child.start_kill();
                            let _ = child.wait().await;
                            fail(&ctx, format!("Output stream failed: {e}"), -1);
                            return;
                        }
                    }
                }
            }
        }
    });
}

/// Append a chunk and publish it, atomically with respect to `abort`
///
/// Holding the body lock across the publish is what makes abort observably
/// synchronous: once `abort` has flipped the state, no chunk can slip out.
fn publish_chunk(ctx: &CollectorContext, text: String) {
    let mut body = ctx.body.lock();
    if body.state != JobState::Running {
        return;
    }
    body.output.push_str(&text);
    ctx.router.publish(JobEvent::Chunk {
        job: ctx.job.clone(),
        text,
    });
}

/// Reap the exited child and perform the terminal transition
async fn finish(child: &mut Child, ctx: &CollectorContext) {
    match child.wait().await {
        Ok(status) if status.success() => {
            let mut body = ctx.body.lock();
            if body.state != JobState::Running {
                return;
            }
            body.state = JobState::Done;
            body.completed_at = Some(Utc::now());
            ctx.router.publish(JobEvent::Done {
                job: ctx.job.clone(),
            });
            log::debug!("[{}] done ({} bytes)", ctx.job, body.output.len());
        }
        Ok(status) => {
            let code = status.code().unwrap_or(-1);
            let stderr = ctx.stderr.lock();
            let message = if stderr.trim().is_empty() {
                format!("Agent exited with code {code}")
            } else {
                format!("Agent exited with code {code}: {}", stderr.trim())
            };
            drop(stderr);
            fail(ctx, message, code);
        }
        Err(e) => {
            fail(ctx, format!("Failed to reap agent process: {e}"), -1);
        }
    }
}

/// Terminal transition to `Errored`, unless the job already left `Running`
fn fail(ctx: &CollectorContext, message: String, exit_code: i32) {
    let mut body = ctx.body.lock();
    if body.state != JobState::Running {
        return;
    }
    body.state = JobState::Errored;
    body.error = Some(message.clone());
    body.completed_at = Some(Utc::now());
    ctx.router.publish(JobEvent::Error {
        job: ctx.job.clone(),
        message: message.clone(),
    });
    log::warn!("[{}] errored (exit code {exit_code}): {message}", ctx.job);
}
