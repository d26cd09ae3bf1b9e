// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session backend abstraction.
//!
//! A session is one pseudo-terminal-backed OS process bound to exactly one
//! agent and one working directory. The backend owns the process handles;
//! everything above it (monitors, decision service) addresses sessions by
//! name only and never sees a raw OS handle.
//!
//! # Failure semantics
//!
//! Spawn failures are synchronous (`SpawnFailure`). Post-spawn process death
//! is reported only through the exit channel, never as a synchronous error
//! from `write`/`capture_recent_output`, which instead fail `Closed` /
//! `NotFound` once the session is gone.

mod buffer;
pub mod pty;

pub use buffer::OutputBuffer;
pub use pty::PtyBackend;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeSessionBackend;

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;
use vigil_core::{AgentId, SessionName};

/// Errors from session backend operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(SessionName),
    #[error("session already exists: {0}")]
    AlreadyExists(SessionName),
    #[error("spawn failed: {0}")]
    SpawnFailure(String),
    #[error("session closed: {0}")]
    Closed(SessionName),
}

/// Everything needed to spawn one agent session.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub name: SessionName,
    /// Agent bound to this session for its whole lifetime.
    pub agent: AgentId,
    /// Working directory of the spawned process.
    pub project_path: PathBuf,
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub rows: u16,
    pub cols: u16,
}

impl SessionSpec {
    pub fn new(
        name: impl Into<SessionName>,
        agent: AgentId,
        program: impl Into<String>,
        project_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            agent,
            project_path: project_path.into(),
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            rows: 24,
            cols: 80,
        }
    }

    vigil_core::setters! {
        set {
            args: Vec<String>,
            env: Vec<(String, String)>,
            rows: u16,
            cols: u16,
        }
    }
}

/// Exit notification, delivered exactly once per session.
///
/// Carries the agent/project binding so consumers can build a continuation
/// event without a registry lookup against a session that no longer exists.
#[derive(Debug, Clone)]
pub struct SessionExit {
    pub session: SessionName,
    pub agent: AgentId,
    pub project_path: PathBuf,
    pub exit_code: Option<i32>,
}

/// Backend owning the lifecycle of PTY-backed agent sessions.
#[async_trait]
pub trait SessionBackend: Send + Sync + 'static {
    /// Spawn a new session.
    ///
    /// Fails `AlreadyExists` if the name is held by a live session (a name
    /// whose process has exited may be reused). Fails `SpawnFailure` on OS
    /// spawn errors, leaving the name free for a retry by the caller.
    async fn create(&self, spec: SessionSpec) -> Result<(), SessionError>;

    /// Deliver bytes to the process input verbatim; no implicit newline.
    async fn write(&self, name: &SessionName, bytes: &[u8]) -> Result<(), SessionError>;

    /// Capture up to `lines` recent lines of terminal output.
    ///
    /// Stable snapshot: two calls with no intervening output change return
    /// byte-identical text. Idle detection depends on this. Capture keeps
    /// working after exit so decision cycles can read the final output.
    async fn capture_recent_output(
        &self,
        name: &SessionName,
        lines: usize,
    ) -> Result<String, SessionError>;

    /// Graceful stop (SIGTERM), force-kill after the configured grace period.
    ///
    /// `NotFound` when the session is unknown or already exited; repeated
    /// terminate calls never hang and never double-fire the exit channel.
    async fn terminate(&self, name: &SessionName) -> Result<(), SessionError>;

    /// Drop a session entry entirely (force-killing it first if still live).
    async fn remove(&self, name: &SessionName) -> Result<(), SessionError>;

    /// Subscribe to exit notifications for all sessions of this backend.
    ///
    /// Every subscriber sees each exit exactly once, including deaths the
    /// backend did not initiate.
    fn subscribe_exits(&self) -> mpsc::UnboundedReceiver<SessionExit>;

    /// Whether the named session exists and its process is running.
    fn is_live(&self, name: &SessionName) -> bool;

    /// Names of all known sessions (live and exited-but-not-removed).
    fn list(&self) -> Vec<SessionName>;
}
