// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Continuation trigger events.
//!
//! Every detector (session backend exit watcher, activity monitor, heartbeat
//! sweep) and the explicit-request path produce the same normalized
//! [`ContinuationEvent`]. Events are consumed exactly once by the decision
//! service after debounce collapsing; they are never persisted.

use crate::agent::AgentId;
use crate::session::SessionName;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of trigger that raised a continuation event.
///
/// The event bus debounces per `(session, kind)` key, so each kind is
/// collapsed independently of the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    ProcessExit,
    OutputIdle,
    HeartbeatStale,
    ExplicitRequest,
}

crate::simple_display! {
    TriggerKind {
        ProcessExit => "process-exit",
        OutputIdle => "output-idle",
        HeartbeatStale => "heartbeat-stale",
        ExplicitRequest => "explicit-request",
    }
}

/// Trigger-specific metadata carried alongside the event.
///
/// Serializes with `{"type": "trigger:kind", ...fields}` format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TriggerMeta {
    #[serde(rename = "trigger:process-exit")]
    ProcessExit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },

    #[serde(rename = "trigger:output-idle")]
    OutputIdle {
        /// Milliseconds since the session's output last changed.
        idle_ms: u64,
        /// Snapshot of the output that stopped changing.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_output: Option<String>,
    },

    #[serde(rename = "trigger:heartbeat-stale")]
    HeartbeatStale {
        /// Timestamp of the last observed heartbeat, if any was ever seen.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_beat_ms: Option<u64>,
        /// Milliseconds since the last heartbeat (or since registration).
        age_ms: u64,
    },

    #[serde(rename = "trigger:explicit-request")]
    ExplicitRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl TriggerMeta {
    /// The trigger kind this metadata belongs to.
    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerMeta::ProcessExit { .. } => TriggerKind::ProcessExit,
            TriggerMeta::OutputIdle { .. } => TriggerKind::OutputIdle,
            TriggerMeta::HeartbeatStale { .. } => TriggerKind::HeartbeatStale,
            TriggerMeta::ExplicitRequest { .. } => TriggerKind::ExplicitRequest,
        }
    }
}

/// One detected continuation trigger for one session.
///
/// Immutable once constructed. The bus collapses rapid repeats per
/// `(session, trigger kind)`; the decision service consumes the survivor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationEvent {
    pub session: SessionName,
    pub agent: AgentId,
    pub project_path: PathBuf,
    /// Epoch milliseconds at detection time.
    pub at_ms: u64,
    pub meta: TriggerMeta,
}

impl ContinuationEvent {
    pub fn new(
        session: SessionName,
        agent: AgentId,
        project_path: PathBuf,
        at_ms: u64,
        meta: TriggerMeta,
    ) -> Self {
        Self { session, agent, project_path, at_ms, meta }
    }

    /// The trigger kind, derived from the metadata variant.
    pub fn trigger(&self) -> TriggerKind {
        self.meta.kind()
    }

    /// Debounce key: events sharing this key collapse into one delivery.
    pub fn debounce_key(&self) -> (SessionName, TriggerKind) {
        (self.session.clone(), self.trigger())
    }

    /// Whether this event bypasses debouncing (deliberate single requests do).
    pub fn bypasses_debounce(&self) -> bool {
        self.trigger() == TriggerKind::ExplicitRequest
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
