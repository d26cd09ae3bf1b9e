// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake session backend for testing.
//!
//! Sessions are scripted: tests set the output a capture should return and
//! drive exits explicitly. All writes are recorded for assertion.

use super::{SessionBackend, SessionError, SessionExit, SessionSpec};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use vigil_core::{AgentId, SessionName};

struct FakeSession {
    agent: AgentId,
    project_path: PathBuf,
    output: String,
    writes: Vec<Vec<u8>>,
    live: bool,
    exit_fired: bool,
}

#[derive(Default)]
struct FakeState {
    sessions: HashMap<SessionName, FakeSession>,
    subscribers: Vec<mpsc::UnboundedSender<SessionExit>>,
    /// Session names whose next create fails with SpawnFailure.
    failing_spawns: Vec<SessionName>,
}

/// In-memory fake of the PTY backend.
#[derive(Clone, Default)]
pub struct FakeSessionBackend {
    inner: Arc<Mutex<FakeState>>,
}

impl FakeSessionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the scripted output a capture will return.
    pub fn set_output(&self, name: &SessionName, output: impl Into<String>) {
        if let Some(session) = self.inner.lock().sessions.get_mut(name) {
            session.output = output.into();
        }
    }

    /// Append a line to the scripted output (simulates agent progress).
    pub fn append_output(&self, name: &SessionName, line: &str) {
        if let Some(session) = self.inner.lock().sessions.get_mut(name) {
            if !session.output.is_empty() {
                session.output.push('\n');
            }
            session.output.push_str(line);
        }
    }

    /// Everything written to the session, lossily decoded per write.
    pub fn writes(&self, name: &SessionName) -> Vec<String> {
        self.inner
            .lock()
            .sessions
            .get(name)
            .map(|s| {
                s.writes.iter().map(|w| String::from_utf8_lossy(w).to_string()).collect()
            })
            .unwrap_or_default()
    }

    /// Simulate the session's process dying with the given exit code.
    pub fn exit_session(&self, name: &SessionName, exit_code: Option<i32>) {
        self.fire_exit(name, exit_code);
    }

    /// Arrange for the next create of `name` to fail with `SpawnFailure`.
    pub fn fail_next_spawn(&self, name: &SessionName) {
        self.inner.lock().failing_spawns.push(name.clone());
    }

    fn fire_exit(&self, name: &SessionName, exit_code: Option<i32>) {
        let mut state = self.inner.lock();
        let exit = match state.sessions.get_mut(name) {
            Some(session) if !session.exit_fired => {
                session.live = false;
                session.exit_fired = true;
                SessionExit {
                    session: name.clone(),
                    agent: session.agent.clone(),
                    project_path: session.project_path.clone(),
                    exit_code,
                }
            }
            _ => return,
        };
        state.subscribers.retain(|tx| tx.send(exit.clone()).is_ok());
    }
}

#[async_trait]
impl SessionBackend for FakeSessionBackend {
    async fn create(&self, spec: SessionSpec) -> Result<(), SessionError> {
        let mut state = self.inner.lock();
        if let Some(pos) = state.failing_spawns.iter().position(|n| n == &spec.name) {
            state.failing_spawns.remove(pos);
            return Err(SessionError::SpawnFailure("scripted spawn failure".to_string()));
        }
        match state.sessions.get(&spec.name) {
            Some(existing) if existing.live => {
                return Err(SessionError::AlreadyExists(spec.name))
            }
            _ => {}
        }
        state.sessions.insert(
            spec.name.clone(),
            FakeSession {
                agent: spec.agent,
                project_path: spec.project_path,
                output: String::new(),
                writes: Vec::new(),
                live: true,
                exit_fired: false,
            },
        );
        Ok(())
    }

    async fn write(&self, name: &SessionName, bytes: &[u8]) -> Result<(), SessionError> {
        let mut state = self.inner.lock();
        match state.sessions.get_mut(name) {
            Some(session) if session.live => {
                session.writes.push(bytes.to_vec());
                Ok(())
            }
            Some(_) => Err(SessionError::Closed(name.clone())),
            None => Err(SessionError::NotFound(name.clone())),
        }
    }

    async fn capture_recent_output(
        &self,
        name: &SessionName,
        lines: usize,
    ) -> Result<String, SessionError> {
        let state = self.inner.lock();
        let session = state
            .sessions
            .get(name)
            .ok_or_else(|| SessionError::NotFound(name.clone()))?;
        let all: Vec<&str> = session.output.lines().collect();
        let skip = all.len().saturating_sub(lines.max(1));
        Ok(all[skip..].join("\n"))
    }

    async fn terminate(&self, name: &SessionName) -> Result<(), SessionError> {
        let live = {
            let state = self.inner.lock();
            match state.sessions.get(name) {
                Some(session) => session.live,
                None => return Err(SessionError::NotFound(name.clone())),
            }
        };
        if !live {
            return Err(SessionError::NotFound(name.clone()));
        }
        // Fakes stop immediately; exit code None mirrors a killed process.
        self.fire_exit(name, None);
        Ok(())
    }

    async fn remove(&self, name: &SessionName) -> Result<(), SessionError> {
        match self.inner.lock().sessions.remove(name) {
            Some(_) => Ok(()),
            None => Err(SessionError::NotFound(name.clone())),
        }
    }

    fn subscribe_exits(&self) -> mpsc::UnboundedReceiver<SessionExit> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().subscribers.push(tx);
        rx
    }

    fn is_live(&self, name: &SessionName) -> bool {
        self.inner.lock().sessions.get(name).map(|s| s.live).unwrap_or(false)
    }

    fn list(&self) -> Vec<SessionName> {
        self.inner.lock().sessions.keys().cloned().collect()
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
