// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Heartbeat staleness tracking.
//!
//! Heartbeats are agent-reported liveness signals (any coordination-tool
//! call), deliberately decoupled from terminal output: an agent can stream
//! output while wedged in a loop, or stay visually quiet while working.
//! A session that never reported a heartbeat is measured from registration
//! time, never from epoch zero.

use crate::bus::ContinuationBus;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use vigil_core::{AgentId, Clock, ContinuationEvent, SessionName, TriggerMeta};

struct BeatState {
    agent: AgentId,
    project_path: PathBuf,
    registered_at_ms: u64,
    last_beat_ms: Option<u64>,
    /// One stale event per episode; re-armed by the next heartbeat.
    reported: bool,
}

/// Tracks last-seen heartbeats per session and sweeps for staleness.
#[derive(Clone)]
pub struct HeartbeatTracker<C: Clock> {
    clock: C,
    threshold: Duration,
    inner: Arc<Mutex<HashMap<SessionName, BeatState>>>,
}

impl<C: Clock> HeartbeatTracker<C> {
    pub fn new(clock: C, threshold: Duration) -> Self {
        Self { clock, threshold, inner: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub fn register(&self, session: SessionName, agent: AgentId, project_path: PathBuf) {
        let now = self.clock.epoch_ms();
        self.inner.lock().insert(
            session,
            BeatState {
                agent,
                project_path,
                registered_at_ms: now,
                last_beat_ms: None,
                reported: false,
            },
        );
    }

    pub fn unregister(&self, session: &SessionName) {
        self.inner.lock().remove(session);
    }

    /// Record an observed liveness signal for the session.
    pub fn record_heartbeat(&self, session: &SessionName) {
        let now = self.clock.epoch_ms();
        if let Some(state) = self.inner.lock().get_mut(session) {
            state.last_beat_ms = Some(now);
            state.reported = false;
        }
    }

    /// Whether the session's heartbeat age exceeds `threshold`.
    ///
    /// Unknown sessions are never stale.
    pub fn is_stale(&self, session: &SessionName, threshold: Duration) -> bool {
        let now = self.clock.epoch_ms();
        self.inner
            .lock()
            .get(session)
            .map(|state| age_ms(state, now) >= threshold.as_millis() as u64)
            .unwrap_or(false)
    }

    /// Check every tracked session, returning one event per newly-stale one.
    pub fn sweep(&self) -> Vec<ContinuationEvent> {
        let now = self.clock.epoch_ms();
        let threshold_ms = self.threshold.as_millis() as u64;
        let mut events = Vec::new();

        for (session, state) in self.inner.lock().iter_mut() {
            let age = age_ms(state, now);
            if state.reported || age < threshold_ms {
                continue;
            }
            state.reported = true;
            tracing::info!(session = %session, age_ms = age, "heartbeat stale");
            events.push(ContinuationEvent::new(
                session.clone(),
                state.agent.clone(),
                state.project_path.clone(),
                now,
                TriggerMeta::HeartbeatStale { last_beat_ms: state.last_beat_ms, age_ms: age },
            ));
        }
        events
    }

    /// Spawn the shared background sweep, publishing stale events to the bus.
    pub fn run_sweeper(&self, bus: ContinuationBus, interval: Duration) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                for event in tracker.sweep() {
                    bus.publish(event);
                }
            }
        })
    }
}

fn age_ms(state: &BeatState, now_ms: u64) -> u64 {
    let reference = state.last_beat_ms.unwrap_or(state.registered_at_ms);
    now_ms.saturating_sub(reference)
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
