// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor error taxonomy.

use crate::store::StoreError;
use std::time::Duration;
use thiserror::Error;
use vigil_adapters::SessionError;
use vigil_core::{SessionName, TaskId};

/// Errors from supervision operations.
///
/// Detector-level failures never surface here (polling and sweeping log and
/// retry on the next cycle). These are decision-cycle and lifecycle errors.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("session not watched: {0}")]
    NotWatched(SessionName),

    #[error("analysis timed out after {0:?}")]
    AnalysisTimeout(Duration),

    #[error("action timed out after {0:?}")]
    ActionTimeout(Duration),

    /// Raised only when something bypassed both iteration-bound checks.
    /// The bound itself is a designed terminal state (escalation), not an
    /// error path.
    #[error("iteration limit exceeded for {task}: {iterations}/{max_iterations}")]
    IterationLimitExceeded { task: TaskId, iterations: u32, max_iterations: u32 },
}
