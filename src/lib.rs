//! # agentdeck
//!
//! Job orchestration and terminal multiplexing for command-line AI agents.
//!
//! This crate spawns external agent CLIs (`claude`, `gemini`) as child
//! processes, streams their output incrementally to a consuming UI, supports
//! mid-flight cancellation, runs many jobs concurrently with deterministic
//! result aggregation, and manages interactive pseudo-terminal sessions
//! bound to the same executables. The agents themselves are opaque; their
//! output is treated as plain text.
//!
//! ## Single-shot jobs
//!
//! ```no_run
//! use agentdeck::{AgentId, JobManager, JobEvent, RunSpec};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = JobManager::new();
//!     let mut sub = manager.events().subscribe();
//!
//!     let job = manager.run("Summarize the open issues", &RunSpec::new(AgentId::Claude))?;
//!     sub.track(job.clone());
//!
//!     while let Some(event) = sub.recv().await {
//!         match event {
//!             JobEvent::Chunk { text, .. } => print!("{text}"),
//!             JobEvent::Done { .. } => break,
//!             JobEvent::Error { message, .. } => {
//!                 log::error!("job failed: {message}");
//!                 break;
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Parallel fan-out with merge
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use agentdeck::{AgentId, JobManager, Orchestrator, RunSpec, TaskSpec};
//! # async fn example() {
//! let manager = Arc::new(JobManager::new());
//! let mut orchestrator = Orchestrator::new(manager);
//! orchestrator.run_all(
//!     vec![
//!         TaskSpec::new("Alice", "Report for Alice"),
//!         TaskSpec::new("Bob", "Report for Bob"),
//!     ],
//!     &RunSpec::new(AgentId::Claude),
//! );
//! orchestrator.wait().await;
//! if let Some(report) = orchestrator.result() {
//!     println!("{report}");
//! }
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`agents`]: the command registry mapping agent ids to invocations
//! - [`jobs`]: the job manager owning child processes and their lifecycle
//! - [`events`]: the streaming protocol fanning job events to subscribers
//! - [`orchestrator`]: the multi-job coordinator and merge
//! - [`terminal`]: pty session management and resize coalescing
//! - [`error`]: error types and handling
//!
//! All failures are local to one job or session: a failed spawn or crashed
//! child is reported through the corresponding channel, never fatal to the
//! host process. The crate imposes no timeouts; callers wanting a deadline
//! call `abort`/`close` themselves.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod agents;
pub mod error;
pub mod events;
pub mod ids;
pub mod jobs;
pub mod orchestrator;
pub mod terminal;

mod utf8;

pub use agents::{AgentId, AgentSpec, build_command};
pub use error::{AgentError, Result};
pub use events::{EventRouter, JobEvent, Subscription};
pub use ids::{JobId, SessionId};
pub use jobs::{JobManager, JobSnapshot, JobState, RunSpec};
pub use orchestrator::{JobTask, Orchestrator, OrchestratorStatus, TaskSpec};
pub use terminal::{ResizeCoalescer, TermEvent, TerminalManager};

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
