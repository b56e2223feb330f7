//! Job manager: spawn, stream, abort
//!
//! Owns the process-wide job registry. Callers only ever hold [`JobId`]
//! tokens; the child process handles live inside per-job collector tasks and
//! are released on any terminal transition.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

use crate::agents::{AgentId, build_command};
use crate::error::{AgentError, Result};
use crate::events::EventRouter;
use crate::ids::JobId;
use crate::utf8::Utf8Decoder;

use super::collector::{CollectorContext, JobCommand, spawn_collector};
use super::state::{JobBody, JobSnapshot, JobState};

/// Retention time for finished jobs before the registry entry is reaped
const FINISHED_RETENTION_MS: i64 = 60_000;

/// Interval for cleanup task execution
const CLEANUP_INTERVAL_SECS: u64 = 60;

/// Cap on the stderr kept around for error messages
const STDERR_TAIL_BYTES: usize = 8 * 1024;

/// Parameters for launching a job
#[derive(Debug, Clone)]
pub struct RunSpec {
    /// Which agent CLI to run
    pub agent: AgentId,
    /// Optional model-selection flag value
    pub model: Option<String>,
    /// Override the registry-built command line entirely.
    ///
    /// Used for custom agent builds that live outside `PATH` conventions;
    /// the prompt is still written to the process's stdin.
    pub command: Option<String>,
    /// Working directory for the child process
    pub cwd: Option<PathBuf>,
}

impl RunSpec {
    /// Spec for `agent` with no model, no overrides
    #[must_use]
    pub fn new(agent: AgentId) -> Self {
        Self {
            agent,
            model: None,
            command: None,
            cwd: None,
        }
    }

    /// Select a model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Replace the generated command line
    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Set the child's working directory
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// Registry entry for one job
struct JobEntry {
    agent: AgentId,
    body: Arc<Mutex<JobBody>>,
    command_tx: mpsc::UnboundedSender<JobCommand>,
}

/// Manager for concurrently running agent jobs
///
/// Spawns one child process per job, streams its stdout through the shared
/// [`EventRouter`], and supports mid-flight cancellation. There is no cap on
/// the number of simultaneous jobs and no implicit deadline; a job runs until
/// its process exits or [`abort`](Self::abort) is called.
pub struct JobManager {
    jobs: Arc<Mutex<HashMap<JobId, JobEntry>>>,
    router: EventRouter,
    cleanup_handle: Option<tokio::task::JoinHandle<()>>,
}

impl JobManager {
    /// Create a manager with a background cleanup task
    ///
    /// Must be called from within a tokio runtime. Finished jobs stay
    /// readable via [`snapshot`](Self::snapshot) for about a minute before
    /// their registry entry is reaped.
    #[must_use]
    pub fn new() -> Self {
        let jobs: Arc<Mutex<HashMap<JobId, JobEntry>>> = Arc::new(Mutex::new(HashMap::new()));

        let jobs_clone = Arc::clone(&jobs);
        let cleanup_handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(CLEANUP_INTERVAL_SECS)).await;

                let now = Utc::now();
                jobs_clone.lock().retain(|_id, entry| {
                    let body = entry.body.lock();
                    match body.completed_at {
                        Some(at) => {
                            now.signed_duration_since(at).num_milliseconds()
                                < FINISHED_RETENTION_MS
                        }
                        None => true,
                    }
                });
            }
        });

        Self {
            jobs,
            router: EventRouter::new(),
            cleanup_handle: Some(cleanup_handle),
        }
    }

    /// The router carrying this manager's `chunk`/`done`/`error` events
    #[must_use]
    pub fn events(&self) -> &EventRouter {
        &self.router
    }

    /// Launch a job
    ///
    /// Builds the command via the agent registry (or takes the override from
    /// `spec`), spawns it under `sh -c`, writes `prompt` to its stdin and
    /// closes the pipe. Returns the freshly allocated id once the process
    /// handle exists, not once it completes.
    ///
    /// Subscribers should `track` the returned id right away; the job's
    /// [`snapshot`](Self::snapshot) stays authoritative for consumers that
    /// subscribe late.
    ///
    /// # Errors
    /// Returns [`AgentError::Spawn`] if the agent executable is missing or
    /// the process cannot be started; no job is registered in that case.
    pub fn run(&self, prompt: &str, spec: &RunSpec) -> Result<JobId> {
        let command = match &spec.command {
            Some(command) => command.clone(),
            None => {
                // Preflight the executable so a missing install is a
                // synchronous rejection instead of an asynchronous error.
                which::which(spec.agent.binary_name()).map_err(|_| {
                    AgentError::spawn(format!(
                        "{} CLI not found on PATH",
                        spec.agent.binary_name()
                    ))
                })?;
                build_command(spec.agent, spec.model.as_deref())
            }
        };

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            // Piped rather than inherited so the child can never touch the
            // host terminal state.
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref cwd) = spec.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if let Some(ref cwd) = spec.cwd
                && !cwd.exists()
            {
                return AgentError::spawn(format!(
                    "Working directory does not exist: {}",
                    cwd.display()
                ));
            }
            AgentError::spawn(format!("Failed to start agent process: {e}"))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::spawn("Failed to get stdin handle"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::spawn("Failed to get stdout handle"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AgentError::spawn("Failed to get stderr handle"))?;

        let id = JobId::generate();
        let body = Arc::new(Mutex::new(JobBody::new()));
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        self.jobs.lock().insert(
            id.clone(),
            JobEntry {
                agent: spec.agent,
                body: Arc::clone(&body),
                command_tx,
            },
        );

        // Feed the prompt and close stdin so `-p` style CLIs see EOF.
        let prompt_bytes = prompt.as_bytes().to_vec();
        tokio::spawn(async move {
            let mut stdin = stdin;
            let _ = stdin.write_all(&prompt_bytes).await;
            let _ = stdin.shutdown().await;
        });

        // Drain stderr into a capped tail for error reporting.
        let stderr_tail: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));
        let tail_clone = Arc::clone(&stderr_tail);
        tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut stderr = stderr;
            let mut buf = vec![0u8; 4096];
            let mut decoder = Utf8Decoder::new();
            loop {
                match stderr.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let text = decoder.decode(&buf[..n]);
                        if text.is_empty() {
                            continue;
                        }
                        let mut tail = tail_clone.lock();
                        tail.push_str(&text);
                        if tail.len() > STDERR_TAIL_BYTES {
                            // The cut must land on a character boundary.
                            let mut cut = tail.len() - STDERR_TAIL_BYTES;
                            while !tail.is_char_boundary(cut) {
                                cut += 1;
                            }
                            tail.drain(..cut);
                        }
                    }
                }
            }
        });

        spawn_collector(
            child,
            stdout,
            command_rx,
            CollectorContext {
                job: id.clone(),
                body,
                router: self.router.clone(),
                stderr: stderr_tail,
            },
        );

        log::info!("[{id}] launched {} job: {command}", spec.agent);
        Ok(id)
    }

    /// Abort a job, best-effort
    ///
    /// If the job is `Running` its state flips to `Aborted` before this
    /// returns; no `chunk`/`done`/`error` event for the id is published
    /// afterwards. OS-level reaping happens asynchronously. Idempotent:
    /// terminal or unknown ids are no-ops.
    pub fn abort(&self, id: &JobId) {
        let jobs = self.jobs.lock();
        let Some(entry) = jobs.get(id) else {
            return;
        };
        {
            let mut body = entry.body.lock();
            if body.state.is_terminal() {
                return;
            }
            body.state = JobState::Aborted;
            body.completed_at = Some(Utc::now());
        }
        let (done_tx, _done_rx) = oneshot::channel();
        let _ = entry.command_tx.send(JobCommand::Abort { done_tx });
        log::info!("[{id}] abort requested");
    }

    /// Point-in-time view of a job, or `None` for unknown/reaped ids
    #[must_use]
    pub fn snapshot(&self, id: &JobId) -> Option<JobSnapshot> {
        let jobs = self.jobs.lock();
        let entry = jobs.get(id)?;
        let body = entry.body.lock();
        Some(JobSnapshot {
            id: id.clone(),
            agent: entry.agent,
            state: body.state,
            output: body.output.clone(),
            error: body.error.clone(),
            completed_at: body.completed_at,
        })
    }

    /// Ids of all jobs currently held in the registry
    #[must_use]
    pub fn job_ids(&self) -> Vec<JobId> {
        self.jobs.lock().keys().cloned().collect()
    }

    /// Abort every live job and wait for the processes to be reaped
    ///
    /// Should be called before the host process exits to avoid orphaned
    /// children.
    pub async fn shutdown(&self) {
        log::info!("Shutting down job manager...");

        let mut pending = Vec::new();
        {
            let jobs = self.jobs.lock();
            for (id, entry) in jobs.iter() {
                let mut body = entry.body.lock();
                if body.state.is_terminal() {
                    continue;
                }
                body.state = JobState::Aborted;
                body.completed_at = Some(Utc::now());
                drop(body);

                let (done_tx, done_rx) = oneshot::channel();
                if entry.command_tx.send(JobCommand::Abort { done_tx }).is_ok() {
                    pending.push((id.clone(), done_rx));
                }
            }
        }

        for (id, done_rx) in pending {
            if done_rx.await.is_err() {
                log::warn!("[{id}] collector exited before confirming abort");
            }
        }

        log::info!("Job manager shutdown complete");
    }
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup_handle.take() {
            handle.abort();
        }
    }
}
