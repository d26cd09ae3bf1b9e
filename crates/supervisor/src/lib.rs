// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! vigil-supervisor: the session & continuation supervision engine.
//!
//! Raw signals from the session backend and the monitors flow into the
//! [`bus::ContinuationBus`], which debounces them per `(session, trigger)`
//! key. Published events reach the [`decision::DecisionService`] through a
//! per-session worker queue (one decision cycle in flight per session), get
//! classified by the [`analyzer::OutputAnalyzer`], and end in an action:
//! re-prompt the agent, advance the task, pause, or escalate to a human.
//! [`supervisor::Supervisor`] wires the pieces into one constructed instance.

pub mod activity;
pub mod analyzer;
pub mod bus;
pub mod decision;
pub mod error;
pub mod heartbeat;
pub mod prompt;
pub mod store;
pub mod supervisor;

pub use activity::{ActivityMonitor, IdleDetector};
pub use analyzer::{AnalyzerContext, OutputAnalyzer, SignalClass};
pub use bus::ContinuationBus;
pub use decision::{DecisionService, TaskBinding};
pub use error::SupervisorError;
pub use heartbeat::HeartbeatTracker;
pub use prompt::{DefaultPromptTemplate, PromptTemplate, PromptVars};
pub use store::{MemoryTaskStore, StoreError, TaskStore};
pub use supervisor::{Supervisor, WatchSpec};
