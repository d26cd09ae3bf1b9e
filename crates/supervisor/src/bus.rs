// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Continuation event bus with per-key debouncing.
//!
//! Single ingestion point for all detectors. A burst of events for one
//! `(session, trigger kind)` key collapses into a single delivery: each new
//! event cancels and restarts the key's timer, and only a timer that
//! survives the quiet period publishes (latest event wins). Explicit
//! requests bypass debouncing; they are deliberate single actions.
//!
//! Within one key at most one event is ever in flight; ordering across
//! different keys is not guaranteed.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use vigil_core::{ContinuationEvent, SessionName, TriggerKind};

type DebounceKey = (SessionName, TriggerKind);

struct Pending {
    latest: ContinuationEvent,
    /// Guards against a timer that already passed its sleep when it was
    /// reset: firing checks the sequence number under the map lock, so a
    /// superseded timer can never deliver.
    seq: u64,
    timer: JoinHandle<()>,
}

struct BusInner {
    debounce: Duration,
    pending: Mutex<HashMap<DebounceKey, Pending>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ContinuationEvent>>>,
}

impl BusInner {
    fn fire(&self, key: &DebounceKey, seq: u64) {
        let event = {
            let mut pending = self.pending.lock();
            match pending.get(key) {
                Some(p) if p.seq == seq => pending.remove(key).map(|p| p.latest),
                _ => None,
            }
        };
        if let Some(event) = event {
            self.deliver(event);
        }
    }

    fn deliver(&self, event: ContinuationEvent) {
        tracing::debug!(
            session = %event.session,
            trigger = %event.trigger(),
            "publishing continuation event"
        );
        // A dead subscriber is dropped; it must not stop delivery to the
        // others or to future events.
        self.subscribers.lock().retain(|tx| match tx.send(event.clone()) {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    session = %event.session,
                    trigger = %event.trigger(),
                    "dropping dead event subscriber"
                );
                false
            }
        });
    }
}

/// Debouncing fan-out bus for continuation events.
#[derive(Clone)]
pub struct ContinuationBus {
    inner: Arc<BusInner>,
}

impl ContinuationBus {
    pub fn new(debounce: Duration) -> Self {
        Self {
            inner: Arc::new(BusInner {
                debounce,
                pending: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Subscribe to debounced events. Every subscriber sees every delivery.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ContinuationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().push(tx);
        rx
    }

    /// Ingest a detector event.
    ///
    /// Must be called from within a tokio runtime (debounce timers are
    /// spawned tasks).
    pub fn publish(&self, event: ContinuationEvent) {
        if event.bypasses_debounce() || self.inner.debounce.is_zero() {
            self.inner.deliver(event);
            return;
        }

        let key = event.debounce_key();
        let mut pending = self.inner.pending.lock();
        let seq = match pending.get(&key) {
            Some(previous) => {
                previous.timer.abort();
                previous.seq.wrapping_add(1)
            }
            None => 0,
        };

        let inner = Arc::clone(&self.inner);
        let timer_key = key.clone();
        let debounce = self.inner.debounce;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            inner.fire(&timer_key, seq);
        });

        pending.insert(key, Pending { latest: event, seq, timer });
    }

    /// Drop all pending timers for a session (used on terminate).
    pub fn cancel_session(&self, session: &SessionName) {
        let mut pending = self.inner.pending.lock();
        pending.retain(|(name, _), entry| {
            if name == session {
                entry.timer.abort();
                false
            } else {
                true
            }
        });
    }

    /// Number of keys currently waiting out their quiet period.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
