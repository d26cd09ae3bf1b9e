// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PTY-backed session backend.
//!
//! Each session is a child process on the slave side of a pseudo-terminal.
//! The master side feeds a bounded [`OutputBuffer`] (read loop), accepts
//! queued input (write loop), and a dedicated wait loop reaps the child and
//! delivers the single exit notification. Blocking PTY syscalls live on OS
//! threads; the async surface never blocks on them.

use super::buffer::OutputBuffer;
use super::{SessionBackend, SessionError, SessionExit, SessionSpec};
use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use parking_lot::{Mutex, RwLock};
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use vigil_core::{AgentId, SessionName};

const READ_CHUNK_SIZE: usize = 8 * 1024;
const DEFAULT_SCROLLBACK_LINES: usize = 2_000;
const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(5);

struct PtySession {
    agent: AgentId,
    project_path: PathBuf,
    buffer: Arc<Mutex<OutputBuffer>>,
    stdin_tx: mpsc::UnboundedSender<Vec<u8>>,
    live: AtomicBool,
    child_pid: Option<u32>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    // Keeps the master side open for the lifetime of the session entry.
    // Behind a mutex only because `dyn MasterPty` is not Sync.
    _master: Mutex<Box<dyn MasterPty + Send>>,
}

impl PtySession {
    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn force_kill(&self) {
        if let Err(e) = self.killer.lock().kill() {
            tracing::debug!(error = %e, "force kill failed (process likely already gone)");
        }
    }
}

enum SessionState {
    Starting,
    Running(Arc<PtySession>),
}

struct SpawnedPty {
    master: Box<dyn MasterPty + Send>,
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
}

type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<SessionExit>>>>;
type SessionMap = Arc<RwLock<HashMap<SessionName, SessionState>>>;

/// Session backend spawning one PTY-backed process per session.
#[derive(Clone)]
pub struct PtyBackend {
    sessions: SessionMap,
    subscribers: Subscribers,
    terminate_grace: Duration,
    scrollback_lines: usize,
}

impl Default for PtyBackend {
    fn default() -> Self {
        Self::new(DEFAULT_TERMINATE_GRACE)
    }
}

impl PtyBackend {
    pub fn new(terminate_grace: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            terminate_grace,
            scrollback_lines: DEFAULT_SCROLLBACK_LINES,
        }
    }

    fn session(&self, name: &SessionName) -> Result<Arc<PtySession>, SessionError> {
        match self.sessions.read().get(name) {
            Some(SessionState::Running(session)) => Ok(Arc::clone(session)),
            // Starting is a short spawn window; callers see the name only
            // after `create` returns, so treat it as absent.
            Some(SessionState::Starting) | None => Err(SessionError::NotFound(name.clone())),
        }
    }

    /// Reserve the name, failing while a live session holds it. An exited
    /// session's entry is replaced so names are reusable after death.
    fn reserve(&self, name: &SessionName) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write();
        let held = match sessions.get(name) {
            Some(SessionState::Running(session)) => session.is_live(),
            // a concurrent create owns the name until its spawn resolves
            Some(SessionState::Starting) => true,
            None => false,
        };
        if held {
            return Err(SessionError::AlreadyExists(name.clone()));
        }
        sessions.insert(name.clone(), SessionState::Starting);
        Ok(())
    }

    fn unreserve(&self, name: &SessionName) {
        let mut sessions = self.sessions.write();
        if matches!(sessions.get(name), Some(SessionState::Starting)) {
            sessions.remove(name);
        }
    }

    fn install(&self, name: &SessionName, session: Arc<PtySession>) {
        self.sessions.write().insert(name.clone(), SessionState::Running(session));
    }
}

#[async_trait]
impl SessionBackend for PtyBackend {
    async fn create(&self, spec: SessionSpec) -> Result<(), SessionError> {
        if spec.program.trim().is_empty() {
            return Err(SessionError::SpawnFailure("program must not be empty".to_string()));
        }

        let name = spec.name.clone();
        self.reserve(&name)?;

        let spawn_spec = spec.clone();
        let spawned = match tokio::task::spawn_blocking(move || spawn_pty(spawn_spec)).await {
            Ok(Ok(spawned)) => spawned,
            Ok(Err(e)) => {
                self.unreserve(&name);
                return Err(e);
            }
            Err(e) => {
                self.unreserve(&name);
                return Err(SessionError::SpawnFailure(format!("spawn task failed: {}", e)));
            }
        };

        let child_pid = spawned.child.process_id();
        let killer = spawned.child.clone_killer();
        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let session = Arc::new(PtySession {
            agent: spec.agent.clone(),
            project_path: spec.project_path.clone(),
            buffer: Arc::new(Mutex::new(OutputBuffer::new(self.scrollback_lines))),
            stdin_tx,
            live: AtomicBool::new(true),
            child_pid,
            killer: Mutex::new(killer),
            _master: Mutex::new(spawned.master),
        });

        tracing::info!(
            session = %name,
            agent = %spec.agent,
            pid = ?child_pid,
            program = %spec.program,
            "session spawned"
        );

        self.install(&name, Arc::clone(&session));
        spawn_read_loop(spawned.reader, Arc::clone(&session.buffer));
        spawn_write_loop(spawned.writer, stdin_rx);
        spawn_wait_loop(name, session, spawned.child, Arc::clone(&self.subscribers));
        Ok(())
    }

    async fn write(&self, name: &SessionName, bytes: &[u8]) -> Result<(), SessionError> {
        let session = self.session(name)?;
        if !session.is_live() {
            return Err(SessionError::Closed(name.clone()));
        }
        session
            .stdin_tx
            .send(bytes.to_vec())
            .map_err(|_| SessionError::Closed(name.clone()))
    }

    async fn capture_recent_output(
        &self,
        name: &SessionName,
        lines: usize,
    ) -> Result<String, SessionError> {
        let session = self.session(name)?;
        let snapshot = session.buffer.lock().snapshot(lines);
        Ok(snapshot)
    }

    async fn terminate(&self, name: &SessionName) -> Result<(), SessionError> {
        let session = self.session(name)?;
        if !session.is_live() {
            return Err(SessionError::NotFound(name.clone()));
        }

        match session.child_pid {
            Some(pid) => {
                tracing::info!(session = %name, pid, "terminating session (SIGTERM)");
                if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    tracing::debug!(session = %name, error = %e, "SIGTERM failed");
                }
            }
            None => {
                // No pid to signal gracefully; go straight to force kill.
                session.force_kill();
                return Ok(());
            }
        }

        // Force-kill after the grace period if the process ignored SIGTERM.
        let grace = self.terminate_grace;
        let name = name.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if session.is_live() {
                tracing::warn!(session = %name, "grace period elapsed, force killing");
                session.force_kill();
            }
        });
        Ok(())
    }

    async fn remove(&self, name: &SessionName) -> Result<(), SessionError> {
        let removed = self.sessions.write().remove(name);
        match removed {
            Some(SessionState::Running(session)) => {
                if session.is_live() {
                    session.force_kill();
                }
                Ok(())
            }
            Some(SessionState::Starting) => Ok(()),
            None => Err(SessionError::NotFound(name.clone())),
        }
    }

    fn subscribe_exits(&self) -> mpsc::UnboundedReceiver<SessionExit> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    fn is_live(&self, name: &SessionName) -> bool {
        matches!(
            self.sessions.read().get(name),
            Some(SessionState::Running(session)) if session.is_live()
        )
    }

    fn list(&self) -> Vec<SessionName> {
        self.sessions.read().keys().cloned().collect()
    }
}

fn spawn_pty(spec: SessionSpec) -> Result<SpawnedPty, SessionError> {
    let spawn_err = |e: &dyn std::fmt::Display| SessionError::SpawnFailure(e.to_string());

    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize { rows: spec.rows, cols: spec.cols, pixel_width: 0, pixel_height: 0 })
        .map_err(|e| spawn_err(&e))?;

    let mut command = CommandBuilder::new(&spec.program);
    command.cwd(&spec.project_path);
    for arg in &spec.args {
        command.arg(arg);
    }
    for (key, value) in &spec.env {
        command.env(key, value);
    }

    let child = pair.slave.spawn_command(command).map_err(|e| spawn_err(&e))?;
    drop(pair.slave);

    let reader = pair.master.try_clone_reader().map_err(|e| spawn_err(&e))?;
    let writer = pair.master.take_writer().map_err(|e| spawn_err(&e))?;

    Ok(SpawnedPty { master: pair.master, reader, writer, child })
}

fn spawn_read_loop(mut reader: Box<dyn Read + Send>, buffer: Arc<Mutex<OutputBuffer>>) {
    std::thread::spawn(move || {
        let mut chunk = [0_u8; READ_CHUNK_SIZE];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(read) => buffer.lock().push_bytes(&chunk[..read]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });
}

fn spawn_write_loop(mut writer: Box<dyn Write + Send>, mut stdin_rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    std::thread::spawn(move || {
        while let Some(input) = stdin_rx.blocking_recv() {
            if input.is_empty() {
                continue;
            }
            if writer.write_all(&input).is_err() || writer.flush().is_err() {
                break;
            }
        }
    });
}

/// Reap the child and deliver the exit notification.
///
/// This is the only place the live flag flips and the only place exits are
/// published, so each session's exit is observed exactly once even when
/// terminate races natural process death.
fn spawn_wait_loop(
    name: SessionName,
    session: Arc<PtySession>,
    mut child: Box<dyn Child + Send + Sync>,
    subscribers: Subscribers,
) {
    std::thread::spawn(move || {
        let exit_code = match child.wait() {
            Ok(status) => Some(status.exit_code() as i32),
            Err(e) => {
                tracing::warn!(session = %name, error = %e, "wait on session child failed");
                None
            }
        };
        session.live.store(false, Ordering::SeqCst);
        tracing::info!(session = %name, exit_code = ?exit_code, "session exited");

        let exit = SessionExit {
            session: name,
            agent: session.agent.clone(),
            project_path: session.project_path.clone(),
            exit_code,
        };
        subscribers.lock().retain(|tx| tx.send(exit.clone()).is_ok());
    });
}

#[cfg(test)]
#[path = "pty_tests.rs"]
mod tests;
