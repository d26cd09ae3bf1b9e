// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Output-idle detection.
//!
//! One lightweight polling worker per tracked session captures recent
//! output on a fixed interval and compares byte-for-byte with the previous
//! sample. No output semantics are involved: "no forward progress" is
//! defined purely as "the snapshot stopped changing". The comparison logic
//! lives in [`IdleDetector`] so it can be tested without a runtime.

use crate::bus::ContinuationBus;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use vigil_adapters::{SessionBackend, SessionError};
use vigil_core::{AgentId, Clock, ContinuationEvent, SessionName, TriggerMeta};

/// Pure idle-detection state machine for one session.
///
/// Holds only the last sample, the last-changed timestamp, and the
/// unchanged-cycle count, exactly what one polling worker needs.
#[derive(Debug)]
pub struct IdleDetector {
    idle_cycles: u32,
    last_sample: Option<String>,
    last_changed_ms: u64,
    unchanged: u32,
    reported: bool,
}

impl IdleDetector {
    pub fn new(idle_cycles: u32) -> Self {
        Self {
            idle_cycles: idle_cycles.max(1),
            last_sample: None,
            last_changed_ms: 0,
            unchanged: 0,
            reported: false,
        }
    }

    /// Feed one polled sample; returns `Some(idle_ms)` when an output-idle
    /// event should fire.
    ///
    /// A session with no non-empty sample yet is never idle (freshly created
    /// sessions must not false-positive). After a report the detector stays
    /// quiet until the output changes again: one idle episode, one event.
    pub fn observe(&mut self, sample: &str, now_ms: u64) -> Option<u64> {
        if self.last_sample.is_none() && sample.is_empty() {
            return None;
        }

        match &self.last_sample {
            Some(previous) if previous == sample => {
                self.unchanged += 1;
                if self.unchanged >= self.idle_cycles && !self.reported {
                    self.reported = true;
                    return Some(now_ms.saturating_sub(self.last_changed_ms));
                }
                None
            }
            _ => {
                self.last_sample = Some(sample.to_string());
                self.last_changed_ms = now_ms;
                self.unchanged = 0;
                self.reported = false;
                None
            }
        }
    }
}

/// Per-session output polling workers feeding the bus.
pub struct ActivityMonitor<B: SessionBackend, C: Clock> {
    backend: Arc<B>,
    bus: ContinuationBus,
    clock: C,
    poll_interval: Duration,
    idle_cycles: u32,
    capture_lines: usize,
    watchers: Mutex<HashMap<SessionName, JoinHandle<()>>>,
}

impl<B: SessionBackend, C: Clock> ActivityMonitor<B, C> {
    pub fn new(
        backend: Arc<B>,
        bus: ContinuationBus,
        clock: C,
        poll_interval: Duration,
        idle_cycles: u32,
        capture_lines: usize,
    ) -> Self {
        Self {
            backend,
            bus,
            clock,
            poll_interval,
            idle_cycles,
            capture_lines,
            watchers: Mutex::new(HashMap::new()),
        }
    }

    /// Start polling a session. Watching an already-watched session restarts
    /// its worker with fresh state.
    pub fn watch(&self, session: SessionName, agent: AgentId, project_path: PathBuf) {
        let backend = Arc::clone(&self.backend);
        let bus = self.bus.clone();
        let clock = self.clock.clone();
        let poll_interval = self.poll_interval;
        let capture_lines = self.capture_lines;
        let mut detector = IdleDetector::new(self.idle_cycles);
        let worker_session = session.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(poll_interval).await;
                let sample =
                    match backend.capture_recent_output(&worker_session, capture_lines).await {
                        Ok(sample) => sample,
                        Err(SessionError::NotFound(_)) => {
                            tracing::debug!(session = %worker_session, "session gone, poll stops");
                            break;
                        }
                        Err(e) => {
                            // One failed capture must not kill the monitor;
                            // retry on the next cycle.
                            tracing::debug!(session = %worker_session, error = %e, "capture failed");
                            continue;
                        }
                    };

                let now_ms = clock.epoch_ms();
                if let Some(idle_ms) = detector.observe(&sample, now_ms) {
                    tracing::info!(session = %worker_session, idle_ms, "output idle");
                    bus.publish(ContinuationEvent::new(
                        worker_session.clone(),
                        agent.clone(),
                        project_path.clone(),
                        now_ms,
                        TriggerMeta::OutputIdle { idle_ms, last_output: Some(sample) },
                    ));
                }
            }
        });

        if let Some(previous) = self.watchers.lock().insert(session, handle) {
            previous.abort();
        }
    }

    /// Stop polling a session (no-op when not watched).
    pub fn unwatch(&self, session: &SessionName) {
        if let Some(handle) = self.watchers.lock().remove(session) {
            handle.abort();
        }
    }

    pub fn watched(&self) -> Vec<SessionName> {
        self.watchers.lock().keys().cloned().collect()
    }

    /// Abort every polling worker.
    pub fn shutdown(&self) {
        let mut watchers = self.watchers.lock();
        for (_, handle) in watchers.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
#[path = "activity_tests.rs"]
mod tests;
