//! Agent job management
//!
//! Provides [`JobManager`] for spawning single-shot agent jobs as child
//! processes, streaming their stdout incrementally through the event router,
//! and cancelling them mid-flight.
//!
//! # Module Structure
//!
//! - `manager` - Core `JobManager` with public API
//! - `state` - Job state machine and shared record
//! - `collector` - Per-job background output collector

mod collector;
mod manager;
mod state;

pub use manager::{JobManager, RunSpec};
pub use state::{JobSnapshot, JobState};
