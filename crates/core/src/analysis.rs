// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent state analysis types.
//!
//! The output state analyzer maps recent terminal output plus task context
//! to an [`AgentStateAnalysis`]: what the agent appears to be doing, how
//! confident the classification is, and what the supervisor should do about
//! it. Analyses are transient: produced and consumed within one decision
//! cycle, with only the task-relevant parts landing in the record.

use crate::task::TaskId;
use serde::{Deserialize, Serialize};

/// Apparent condition of an agent, classified from its recent output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Conclusion {
    /// Output carries an explicit completion signal.
    TaskComplete,
    /// Agent asked a question or is explicitly waiting on input.
    WaitingInput,
    /// Error markers dominate the recent output.
    StuckOrError,
    /// No strong signal either way; the agent likely stalled mid-task.
    Incomplete,
    /// The iteration bound was reached; continuation must stop.
    MaxIterations,
    Unknown,
}

crate::simple_display! {
    Conclusion {
        TaskComplete => "task-complete",
        WaitingInput => "waiting-input",
        StuckOrError => "stuck-or-error",
        Incomplete => "incomplete",
        MaxIterations => "max-iterations",
        Unknown => "unknown",
    }
}

/// Action the supervisor should take in response to an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecommendedAction {
    /// Mark the task complete (gated on quality checks) and move on.
    AdvanceTask,
    /// Escalate to a human; the supervisor stops driving this task.
    NotifyOwner,
    /// Re-engage with hints drawn from the error evidence.
    RetryWithHints,
    /// Re-engage with a standard continuation prompt.
    InjectPrompt,
    /// Terminate or suspend the session.
    PauseAgent,
    NoAction,
}

crate::simple_display! {
    RecommendedAction {
        AdvanceTask => "advance-task",
        NotifyOwner => "notify-owner",
        RetryWithHints => "retry-with-hints",
        InjectPrompt => "inject-prompt",
        PauseAgent => "pause-agent",
        NoAction => "no-action",
    }
}

/// Result of analyzing one continuation event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStateAnalysis {
    pub conclusion: Conclusion,
    /// 0–1; higher when multiple independent signals agree.
    pub confidence: f64,
    /// Ordered list of the signals that drove the conclusion, for audit.
    pub evidence: Vec<String>,
    pub recommended: RecommendedAction,
    pub task: TaskId,
    pub iterations: u32,
    pub max_iterations: u32,
}

impl AgentStateAnalysis {
    /// Whether the analysis forbids any further automatic continuation.
    pub fn at_iteration_limit(&self) -> bool {
        self.conclusion == Conclusion::MaxIterations
    }
}

#[cfg(test)]
#[path = "analysis_tests.rs"]
mod tests;
