// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task continuation record and per-task state machine.
//!
//! The continuation record is the persisted slice of a task document that
//! the supervisor reads and writes: iteration counters, a bounded action
//! history, and the quality-gate status map. The task store (an external
//! collaborator) owns the document; the decision service mutates the record
//! through atomic read-modify-write only.

use crate::analysis::{Conclusion, RecommendedAction};
use crate::event::TriggerKind;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Default cap on continuation history entries (evict-oldest beyond this).
pub const DEFAULT_HISTORY_CAP: usize = 20;

/// Identifier of a task as addressed in the external task store.
///
/// Opaque to the supervisor; typically a ticket path or document key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Borrow<str> for TaskId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Status of one named quality gate (typecheck, tests, lint, ...).
///
/// Gates are run by an external checker; the supervisor only reads `passed`
/// to decide whether task completion may be granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStatus {
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl GateStatus {
    pub fn passed() -> Self {
        Self { passed: true, last_run_ms: None, output: None }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self { passed: false, last_run_ms: None, output: Some(output.into()) }
    }
}

/// One continuation attempt recorded into task history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub at_ms: u64,
    pub trigger: TriggerKind,
    pub action: RecommendedAction,
    pub conclusion: Conclusion,
}

/// Persisted continuation state for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuationRecord {
    /// Continuation attempts so far. Monotonically non-decreasing while the
    /// task is open; never exceeds `max_iterations` without escalation.
    #[serde(default)]
    pub iterations: u32,
    /// Zero means "not set"; the supervisor substitutes its configured
    /// default budget before deciding.
    #[serde(default)]
    pub max_iterations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_iteration_at_ms: Option<u64>,
    /// Consecutive stuck-or-error conclusions; reset by any other conclusion.
    /// Deliberately distinct from `iterations`: it governs retry-vs-escalate
    /// for errors, not the overall continuation budget.
    #[serde(default)]
    pub consecutive_errors: u32,
    /// Most-recent-last, capped (evict oldest).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryEntry>,
    /// Gate name → status, in the order the external checker defined them.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub gates: IndexMap<String, GateStatus>,
}

impl ContinuationRecord {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            iterations: 0,
            max_iterations,
            last_iteration_at_ms: None,
            consecutive_errors: 0,
            history: Vec::new(),
            gates: IndexMap::new(),
        }
    }

    /// Whether the iteration bound has been reached.
    ///
    /// `max_iterations` from the task document is clamped to `absolute_max`
    /// so a corrupt record cannot disable the runaway guard.
    pub fn at_limit(&self, absolute_max: u32) -> bool {
        self.iterations >= self.effective_max(absolute_max)
    }

    pub fn effective_max(&self, absolute_max: u32) -> u32 {
        self.max_iterations.min(absolute_max)
    }

    /// Record one continuation attempt.
    pub fn record_iteration(&mut self, now_ms: u64) {
        self.iterations = self.iterations.saturating_add(1);
        self.last_iteration_at_ms = Some(now_ms);
    }

    /// Append a history entry, evicting the oldest past `cap`.
    pub fn push_history(&mut self, entry: HistoryEntry, cap: usize) {
        self.history.push(entry);
        if self.history.len() > cap {
            let excess = self.history.len() - cap;
            self.history.drain(..excess);
        }
    }

    /// True when every gate reports `passed` (vacuously true with no gates).
    pub fn all_gates_passed(&self) -> bool {
        self.gates.values().all(|g| g.passed)
    }

    /// Names of gates currently failing, with their last output for hints.
    pub fn failing_gates(&self) -> Vec<(&str, Option<&str>)> {
        self.gates
            .iter()
            .filter(|(_, g)| !g.passed)
            .map(|(name, g)| (name.as_str(), g.output.as_deref()))
            .collect()
    }
}

/// Terminal states a watched task can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Complete,
    Escalated,
    Paused,
}

/// Decision-service state machine for one watched task.
///
/// `Idle → Active → Deciding → Acting → Active | Terminal(..)`. Events that
/// arrive while a task is terminal are dropped; events that arrive while a
/// cycle is in flight queue behind it (per-session FIFO).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    /// Not being watched.
    Idle,
    /// Session live, being watched.
    Active,
    /// Event received, analysis in flight.
    Deciding,
    /// Action being executed.
    Acting,
    Terminal(TerminalState),
}

impl TaskPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskPhase::Terminal(_))
    }

    /// Whether a newly published event should start a decision cycle.
    pub fn accepts_events(&self) -> bool {
        matches!(self, TaskPhase::Active | TaskPhase::Idle)
    }
}

crate::simple_display! {
    TerminalState {
        Complete => "complete",
        Escalated => "escalated",
        Paused => "paused",
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskPhase::Idle => write!(f, "idle"),
            TaskPhase::Active => write!(f, "active"),
            TaskPhase::Deciding => write!(f, "deciding"),
            TaskPhase::Acting => write!(f, "acting"),
            TaskPhase::Terminal(t) => write!(f, "terminal:{}", t),
        }
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
