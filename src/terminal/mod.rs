//! Interactive terminal sessions
//!
//! Provides [`TerminalManager`] for pty-backed interactive agent sessions
//! with bidirectional byte streaming, and [`ResizeCoalescer`] for collapsing
//! bursts of terminal size changes.

mod manager;
mod resize;

pub use manager::{TermEvent, TerminalManager};
pub use resize::ResizeCoalescer;
