// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! vigil-adapters: boundary adapters for the Vigil supervisor.
//!
//! - [`session`] — the pseudo-terminal session backend: spawns and owns one
//!   PTY-backed process per agent session, exposing write, recent-output
//!   capture, and a single-fire exit notification.
//! - [`notify`] — owner notifications for escalated tasks.

pub mod notify;
pub mod session;

pub use notify::{DesktopNotifyAdapter, NotifyAdapter, NotifyError};
pub use session::{
    OutputBuffer, PtyBackend, SessionBackend, SessionError, SessionExit, SessionSpec,
};

#[cfg(any(test, feature = "test-support"))]
pub use notify::{FakeNotifyAdapter, NotifyCall};
#[cfg(any(test, feature = "test-support"))]
pub use session::FakeSessionBackend;
