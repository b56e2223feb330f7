//! Integration tests for terminal sessions
//!
//! Sessions run a plain `sh` through the command override; a pty echoes
//! typed input, so assertions use contains-checks on the relayed output.

use std::sync::Arc;
use std::time::Duration;

use agentdeck::{ResizeCoalescer, SessionId, TermEvent, TerminalManager};
use anyhow::Result;
use tokio::sync::mpsc;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Accumulate `Data` text for `session` until it contains `needle`
async fn read_until(
    rx: &mut mpsc::UnboundedReceiver<TermEvent>,
    session: &SessionId,
    needle: &str,
) -> String {
    let mut seen = String::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let event = tokio::time::timeout_at(deadline, rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {needle:?}; saw {seen:?}"))
            .expect("terminal manager went away");
        if let TermEvent::Data { session: s, text } = event {
            if &s == session {
                seen.push_str(&text);
                if seen.contains(needle) {
                    return seen;
                }
            }
        }
    }
}

/// Wait for the `Exit` notification of `session`
async fn wait_for_exit(rx: &mut mpsc::UnboundedReceiver<TermEvent>, session: &SessionId) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let event = tokio::time::timeout_at(deadline, rx.recv())
            .await
            .expect("timed out waiting for exit")
            .expect("terminal manager went away");
        if let TermEvent::Exit { session: s } = event {
            if &s == session {
                return;
            }
        }
    }
}

#[tokio::test]
async fn echo_round_trip_then_close_then_exit() -> Result<()> {
    init_logging();
    let (manager, mut rx) = TerminalManager::new();

    // The quote split keeps the echoed input line from matching the needle.
    let session = manager.create_with_command(0, "sh", None, 80, 24)?;
    manager.write(&session, "echo h''i\n")?;
    read_until(&mut rx, &session, "hi").await;

    manager.close(&session)?;
    wait_for_exit(&mut rx, &session).await;

    // Exactly one exit, and nothing else for this id afterwards.
    tokio::time::sleep(Duration::from_millis(200)).await;
    while let Ok(event) = rx.try_recv() {
        match event {
            TermEvent::Exit { session: s } => assert_ne!(&s, &session),
            TermEvent::Data { session: s, .. } => assert_ne!(&s, &session),
        }
    }
    Ok(())
}

#[tokio::test]
async fn close_is_idempotent() -> Result<()> {
    init_logging();
    let (manager, mut rx) = TerminalManager::new();

    let session = manager.create_with_command(3, "sh", None, 80, 24)?;
    manager.close(&session)?;
    manager.close(&session)?;
    wait_for_exit(&mut rx, &session).await;

    // Writing to a closed session is a protocol error, not a panic.
    assert!(manager.write(&session, "x").is_err());
    Ok(())
}

#[tokio::test]
async fn slot_holds_at_most_one_live_session() -> Result<()> {
    init_logging();
    let (manager, mut rx) = TerminalManager::new();

    let first = manager.create_with_command(7, "sh", None, 80, 24)?;
    assert_eq!(manager.session_for_slot(7), Some(first.clone()));

    let second = manager.create_with_command(7, "sh", None, 80, 24)?;
    assert_ne!(first, second);
    assert_eq!(manager.session_for_slot(7), Some(second.clone()));

    // The old session is gone, not merely superseded.
    let live = manager.session_ids();
    assert!(!live.contains(&first));
    assert!(live.contains(&second));
    wait_for_exit(&mut rx, &first).await;

    manager.close(&second)?;
    Ok(())
}

#[tokio::test]
async fn sessions_in_different_slots_coexist() -> Result<()> {
    init_logging();
    let (manager, _rx) = TerminalManager::new();

    let a = manager.create_with_command(0, "sh", None, 80, 24)?;
    let b = manager.create_with_command(1, "sh", None, 80, 24)?;
    assert_ne!(a, b);
    assert_eq!(manager.session_ids().len(), 2);

    manager.shutdown();
    assert!(manager.session_ids().is_empty());
    Ok(())
}

#[tokio::test]
async fn session_respects_working_directory() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let canonical = dir.path().canonicalize()?;
    let (manager, mut rx) = TerminalManager::new();

    let session = manager.create_with_command(0, "sh", Some(dir.path()), 80, 24)?;
    manager.write(&session, "pwd\n")?;
    let needle = canonical.to_string_lossy().to_string();
    read_until(&mut rx, &session, &needle).await;

    manager.close(&session)?;
    Ok(())
}

#[tokio::test]
async fn multibyte_output_survives_read_boundaries() -> Result<()> {
    init_logging();
    let (manager, mut rx) = TerminalManager::new();

    let session = manager.create_with_command(0, "sh", None, 80, 24)?;
    // Turn off input echo so the only euro signs in the stream are the
    // generated ones.
    manager.write(&session, "stty -echo\n")?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // 2048 euro signs (6 KiB) span several pty reads, so characters land
    // split across read boundaries.
    manager.write(
        &session,
        "s=€; for i in 1 2 3 4 5 6 7 8 9 10 11; do s=$s$s; done; printf %s \"$s\"; echo; echo END\n",
    )?;
    let seen = read_until(&mut rx, &session, "END").await;
    assert!(!seen.contains('\u{FFFD}'), "replacement characters in stream");
    assert_eq!(seen.matches('€').count(), 2048);

    manager.close(&session)?;
    Ok(())
}

#[tokio::test]
async fn resize_coalescer_applies_only_the_latest_size() -> Result<()> {
    init_logging();
    let (manager, mut rx) = TerminalManager::new();
    let manager = Arc::new(manager);

    let session = manager.create_with_command(0, "sh", None, 80, 24)?;
    let coalescer = ResizeCoalescer::with_window(Arc::clone(&manager), Duration::from_millis(50));

    // A burst of drag-resize requests; only the last should reach the pty.
    for cols in [81u16, 90, 95, 99, 100] {
        coalescer.request(&session, cols, 30);
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    // `stty size` prints "rows cols" for the pty's current size.
    manager.write(&session, "stty size\n")?;
    read_until(&mut rx, &session, "30 100").await;

    coalescer.cancel();
    manager.close(&session)?;
    Ok(())
}

#[tokio::test]
async fn drag_on_one_session_does_not_starve_another() -> Result<()> {
    init_logging();
    let (manager, mut rx) = TerminalManager::new();
    let manager = Arc::new(manager);

    let dragged = manager.create_with_command(0, "sh", None, 80, 24)?;
    let idle = manager.create_with_command(1, "sh", None, 80, 24)?;
    let coalescer = ResizeCoalescer::with_window(Arc::clone(&manager), Duration::from_millis(100));

    coalescer.request(&idle, 100, 30);
    // A steady drag keeps restarting the dragged session's window; the idle
    // session's single request must still flush after its own window.
    for i in 0..15u16 {
        coalescer.request(&dragged, 81 + i, 24);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    manager.write(&idle, "stty size\n")?;
    read_until(&mut rx, &idle, "30 100").await;

    coalescer.cancel();
    manager.shutdown();
    Ok(())
}

#[tokio::test]
async fn cancelled_coalescer_discards_pending_resizes() -> Result<()> {
    init_logging();
    let (manager, mut rx) = TerminalManager::new();
    let manager = Arc::new(manager);

    let session = manager.create_with_command(0, "sh", None, 80, 24)?;
    let coalescer = ResizeCoalescer::with_window(Arc::clone(&manager), Duration::from_secs(1));

    coalescer.request(&session, 120, 40);
    coalescer.cancel();
    tokio::time::sleep(Duration::from_millis(200)).await;

    manager.write(&session, "stty size\n")?;
    read_until(&mut rx, &session, "24 80").await;

    manager.close(&session)?;
    Ok(())
}

#[tokio::test]
async fn missing_binary_is_a_spawn_error() {
    init_logging();
    let (manager, _rx) = TerminalManager::new();

    let result = manager.create_with_command(0, "no-such-agent-binary-xyz", None, 80, 24);
    assert!(matches!(result, Err(agentdeck::AgentError::Spawn(_))));
    assert!(manager.session_ids().is_empty());
}
