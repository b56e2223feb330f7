//! Terminal session manager
//!
//! Owns interactive pseudo-terminal sessions, one child shell per session.
//! Output bytes are relayed through a tokio channel as [`TermEvent`]s; input
//! bytes are forwarded verbatim to the pty writer. Each UI panel slot holds
//! at most one live session: creating a new session for a slot tears the old
//! one down first.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use parking_lot::Mutex;
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::agents::AgentId;
use crate::error::{AgentError, Result};
use crate::ids::SessionId;
use crate::utf8::Utf8Decoder;

/// Notification from a terminal session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TermEvent {
    /// A chunk of output bytes produced by the pty child
    Data {
        /// The session that produced the output
        session: SessionId,
        /// Output decoded as UTF-8; a multibyte character split across
        /// reads is reassembled rather than mangled
        text: String,
    },
    /// The child shell exited, crashed or was killed. Exactly once per
    /// session; no `Data` for the id follows.
    Exit {
        /// The session that ended
        session: SessionId,
    },
}

struct PtySession {
    slot: u32,
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send>,
    /// Set by `close` before the kill, so the reader thread stops relaying
    /// `Data` the moment close returns
    closed: Arc<AtomicBool>,
}

/// Manager for interactive pseudo-terminal sessions
///
/// Callers hold only [`SessionId`] tokens; the pty and child handles never
/// leave this manager, which rules out use-after-close races.
pub struct TerminalManager {
    sessions: Mutex<HashMap<SessionId, PtySession>>,
    slots: Mutex<HashMap<u32, SessionId>>,
    events: mpsc::UnboundedSender<TermEvent>,
}

impl TerminalManager {
    /// Create a manager and the receiver carrying its `data`/`exit` events
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TermEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                sessions: Mutex::new(HashMap::new()),
                slots: Mutex::new(HashMap::new()),
                events: tx,
            },
            rx,
        )
    }

    /// Open a session running `agent`'s interactive command in slot `slot`
    ///
    /// If the slot already holds a live session it is closed first; at no
    /// point are two sessions for one slot observable. Switching a slot to a
    /// different agent is exactly this: close plus create — a live session is
    /// never re-pointed.
    ///
    /// # Errors
    /// Returns [`AgentError::Spawn`] if the agent executable is missing, or
    /// [`AgentError::Pty`] if the OS pty cannot be allocated.
    pub fn create(
        &self,
        slot: u32,
        agent: AgentId,
        cwd: Option<&Path>,
        cols: u16,
        rows: u16,
    ) -> Result<SessionId> {
        self.create_with_command(slot, agent.interactive_command(), cwd, cols, rows)
    }

    /// Open a session running an arbitrary command line
    ///
    /// Same contract as [`create`](Self::create); used for custom agent
    /// builds and plain shells.
    pub fn create_with_command(
        &self,
        slot: u32,
        command: &str,
        cwd: Option<&Path>,
        cols: u16,
        rows: u16,
    ) -> Result<SessionId> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| AgentError::spawn("Empty session command"))?;
        which::which(program)
            .map_err(|_| AgentError::spawn(format!("{program} not found on PATH")))?;

        // Slot invariant: tear down the previous occupant before the new
        // session exists.
        let previous = self.slots.lock().get(&slot).cloned();
        if let Some(old) = previous {
            self.close(&old)?;
        }

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| AgentError::pty(e.to_string()))?;

        let mut builder = CommandBuilder::new(program);
        for arg in parts {
            builder.arg(arg);
        }
        builder.env("TERM", "xterm-256color");
        builder.env("COLORTERM", "truecolor");
        if let Some(cwd) = cwd {
            builder.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(builder)
            .map_err(|e| AgentError::spawn(e.to_string()))?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| AgentError::pty(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| AgentError::pty(e.to_string()))?;

        let id = SessionId::generate();
        let closed = Arc::new(AtomicBool::new(false));

        spawn_reader(id.clone(), reader, Arc::clone(&closed), self.events.clone());

        self.sessions.lock().insert(
            id.clone(),
            PtySession {
                slot,
                master: pair.master,
                writer,
                child,
                closed,
            },
        );
        self.slots.lock().insert(slot, id.clone());

        log::info!("[{id}] terminal session opened in slot {slot}: {command} ({cols}x{rows})");
        Ok(id)
    }

    /// Forward raw input bytes to a session, with no interpretation
    ///
    /// # Errors
    /// Returns [`AgentError::SessionNotFound`] for unknown ids.
    pub fn write(&self, id: &SessionId, data: &str) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| AgentError::session_not_found(id.as_str()))?;
        session.writer.write_all(data.as_bytes())?;
        session.writer.flush()?;
        Ok(())
    }

    /// Propagate a terminal size change to the OS pty
    ///
    /// Each call is a real system call with layout side effects; rapid
    /// consecutive requests should go through
    /// [`ResizeCoalescer`](super::ResizeCoalescer).
    ///
    /// # Errors
    /// Returns [`AgentError::SessionNotFound`] for unknown ids.
    pub fn resize(&self, id: &SessionId, cols: u16, rows: u16) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| AgentError::session_not_found(id.as_str()))?;
        session
            .master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| AgentError::pty(e.to_string()))
    }

    /// Terminate a session's child shell and release the pty
    ///
    /// Idempotent: closing an unknown or already-closed id is a no-op. Once
    /// this returns no further `Data` is relayed for the id; the reader
    /// thread still delivers the session's single `Exit`.
    pub fn close(&self, id: &SessionId) -> Result<()> {
        let Some(mut session) = self.sessions.lock().remove(id) else {
            return Ok(());
        };
        session.closed.store(true, Ordering::SeqCst);

        {
            let mut slots = self.slots.lock();
            if slots.get(&session.slot) == Some(id) {
                slots.remove(&session.slot);
            }
        }

        // Kill the whole process group: the shell plus whatever agent
        // processes it started.
        #[cfg(unix)]
        {
            if let Some(pid) = session.child.process_id() {
                unsafe {
                    libc::kill(-(pid as i32), libc::SIGTERM);
                    std::thread::sleep(std::time::Duration::from_millis(100));
                    libc::kill(-(pid as i32), libc::SIGKILL);
                }
            }
        }

        #[cfg(windows)]
        {
            let _ = session.child.kill();
        }

        // Reap to prevent zombies; dropping the master afterwards wakes the
        // reader thread with EOF.
        let _ = session.child.wait();
        drop(session);

        log::info!("[{id}] terminal session closed");
        Ok(())
    }

    /// The session currently bound to `slot`, if any
    #[must_use]
    pub fn session_for_slot(&self, slot: u32) -> Option<SessionId> {
        self.slots.lock().get(&slot).cloned()
    }

    /// Ids of all live sessions
    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.lock().keys().cloned().collect()
    }

    /// Close every live session
    pub fn shutdown(&self) {
        log::info!("Shutting down terminal manager...");
        for id in self.session_ids() {
            let _ = self.close(&id);
        }
    }
}

impl Drop for TerminalManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Relay pty output on a dedicated thread
///
/// The pty reader is a blocking `Read`; a plain thread keeps the tokio
/// workers free. Sends exactly one `Exit` when the stream ends.
fn spawn_reader(
    id: SessionId,
    mut reader: Box<dyn Read + Send>,
    closed: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<TermEvent>,
) {
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        let mut decoder = Utf8Decoder::new();
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => {
                    let rest = decoder.finish();
                    if !rest.is_empty() && !closed.load(Ordering::SeqCst) {
                        let _ = events.send(TermEvent::Data {
                            session: id.clone(),
                            text: rest,
                        });
                    }
                    let _ = events.send(TermEvent::Exit { session: id });
                    break;
                }
                Ok(n) => {
                    if closed.load(Ordering::SeqCst) {
                        continue;
                    }
                    // Reads can split a multibyte character; the decoder
                    // carries the partial bytes into the next read.
                    let text = decoder.decode(&buf[..n]);
                    if text.is_empty() {
                        continue;
                    }
                    let _ = events.send(TermEvent::Data {
                        session: id.clone(),
                        text,
                    });
                }
            }
        }
    });
}
