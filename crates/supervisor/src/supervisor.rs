// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor facade.
//!
//! One constructed instance owns the session backend handle, both monitors,
//! the event bus, and the decision service. No module-level global state,
//! so independent instances coexist cleanly (and cheaply) in tests.
//!
//! Event routing: published events are dispatched to a per-session worker
//! task with a FIFO queue. That gives the ordering guarantee the record
//! mutations rely on: for any one session, at most one decision cycle is
//! in flight, and a burst of events queues behind it instead of racing.

use crate::activity::ActivityMonitor;
use crate::bus::ContinuationBus;
use crate::decision::{DecisionService, TaskBinding};
use crate::error::SupervisorError;
use crate::heartbeat::HeartbeatTracker;
use crate::prompt::PromptTemplate;
use crate::store::TaskStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use vigil_adapters::{NotifyAdapter, SessionBackend, SessionError, SessionSpec};
use vigil_core::{
    AgentId, Clock, ContinuationEvent, SessionName, SupervisorConfig, TaskId, TriggerMeta,
};

/// Everything needed to put one session under supervision.
#[derive(Debug, Clone)]
pub struct WatchSpec {
    pub session: SessionName,
    pub agent: AgentId,
    pub project_path: PathBuf,
    pub task: TaskId,
    pub title: String,
}

type WorkerMap = Arc<Mutex<HashMap<SessionName, mpsc::UnboundedSender<ContinuationEvent>>>>;

/// Owns and wires the supervision pipeline for one backend.
pub struct Supervisor<B, N, S, P, C>
where
    B: SessionBackend,
    N: NotifyAdapter,
    S: TaskStore,
    P: PromptTemplate,
    C: Clock,
{
    backend: Arc<B>,
    bus: ContinuationBus,
    activity: ActivityMonitor<B, C>,
    heartbeat: HeartbeatTracker<C>,
    service: Arc<DecisionService<B, N, S, P, C>>,
    clock: C,
    watched: Mutex<HashMap<SessionName, WatchSpec>>,
    workers: WorkerMap,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl<B, N, S, P, C> Supervisor<B, N, S, P, C>
where
    B: SessionBackend,
    N: NotifyAdapter,
    S: TaskStore,
    P: PromptTemplate,
    C: Clock,
{
    /// Construct and start the pipeline. Must run inside a tokio runtime:
    /// the exit pump, heartbeat sweeper, and dispatch loop are spawned here.
    pub fn new(
        backend: Arc<B>,
        notify: N,
        store: Arc<S>,
        template: P,
        clock: C,
        config: SupervisorConfig,
    ) -> Self {
        let bus = ContinuationBus::new(config.debounce);
        let activity = ActivityMonitor::new(
            Arc::clone(&backend),
            bus.clone(),
            clock.clone(),
            config.poll_interval,
            config.idle_cycles,
            config.capture_lines,
        );
        let heartbeat = HeartbeatTracker::new(clock.clone(), config.heartbeat_threshold);
        let service = Arc::new(DecisionService::new(
            Arc::clone(&backend),
            notify,
            store,
            template,
            clock.clone(),
            config.clone(),
        ));
        let workers: WorkerMap = Arc::new(Mutex::new(HashMap::new()));

        let mut background = Vec::new();
        background.push(spawn_exit_pump(backend.subscribe_exits(), bus.clone(), clock.clone()));
        background.push(heartbeat.run_sweeper(bus.clone(), config.heartbeat_sweep_interval));
        background.push(spawn_dispatch(bus.subscribe(), Arc::clone(&service), Arc::clone(&workers)));

        Self {
            backend,
            bus,
            activity,
            heartbeat,
            service,
            clock,
            watched: Mutex::new(HashMap::new()),
            workers,
            background: Mutex::new(background),
        }
    }

    /// Spawn a session through the backend (spawn failures surface here
    /// synchronously; the supervisor does not retry them).
    pub async fn create_session(&self, spec: SessionSpec) -> Result<(), SupervisorError> {
        self.backend.create(spec).await.map_err(Into::into)
    }

    /// Put a session under supervision: idle polling, heartbeat tracking,
    /// and continuation decisions against the bound task.
    pub fn watch(&self, spec: WatchSpec) {
        tracing::info!(session = %spec.session, task = %spec.task, "watching session");
        self.service
            .bind(spec.session.clone(), TaskBinding::new(spec.task.clone(), spec.title.clone()));
        self.activity.watch(spec.session.clone(), spec.agent.clone(), spec.project_path.clone());
        self.heartbeat.register(spec.session.clone(), spec.agent.clone(), spec.project_path.clone());
        self.watched.lock().insert(spec.session.clone(), spec);
    }

    /// Stop supervising a session. Pending debounce timers are dropped and
    /// the worker queue is torn down; the session itself is left alone.
    pub fn unwatch(&self, session: &SessionName) {
        tracing::info!(session = %session, "unwatching session");
        self.activity.unwatch(session);
        self.heartbeat.unregister(session);
        self.bus.cancel_session(session);
        self.service.unbind(session);
        self.workers.lock().remove(session);
        self.watched.lock().remove(session);
    }

    /// Record an agent-reported liveness signal.
    pub fn record_heartbeat(&self, session: &SessionName) {
        self.heartbeat.record_heartbeat(session);
    }

    /// Deliberate continuation request; bypasses debouncing.
    pub fn request_continuation(
        &self,
        session: &SessionName,
        reason: Option<String>,
    ) -> Result<(), SupervisorError> {
        let spec = self
            .watched
            .lock()
            .get(session)
            .cloned()
            .ok_or_else(|| SupervisorError::NotWatched(session.clone()))?;
        self.bus.publish(ContinuationEvent::new(
            spec.session,
            spec.agent,
            spec.project_path,
            self.clock.epoch_ms(),
            TriggerMeta::ExplicitRequest { reason },
        ));
        Ok(())
    }

    /// Terminate a session and tear down everything watching it.
    ///
    /// Safe to call while a decision cycle for the session is in flight:
    /// the cycle finds the binding gone (or the session closed) and aborts
    /// quietly instead of erroring.
    pub async fn terminate_session(&self, session: &SessionName) -> Result<(), SupervisorError> {
        self.unwatch(session);
        match self.backend.terminate(session).await {
            Ok(()) | Err(SessionError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Current decision phase of a task (for observability and tests).
    pub fn task_phase(&self, task: &TaskId) -> vigil_core::TaskPhase {
        self.service.phase(task)
    }

    /// The bus, for detectors living outside this crate.
    pub fn bus(&self) -> &ContinuationBus {
        &self.bus
    }

    pub fn watched_sessions(&self) -> Vec<SessionName> {
        self.watched.lock().keys().cloned().collect()
    }

    /// Stop all background workers. Sessions are left running.
    pub fn shutdown(&self) {
        tracing::info!("supervisor shutting down");
        self.activity.shutdown();
        for handle in self.background.lock().drain(..) {
            handle.abort();
        }
        self.workers.lock().clear();
    }
}

/// Convert backend exits into process-exit continuation events.
fn spawn_exit_pump<C: Clock>(
    mut exits: mpsc::UnboundedReceiver<vigil_adapters::SessionExit>,
    bus: ContinuationBus,
    clock: C,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(exit) = exits.recv().await {
            tracing::debug!(session = %exit.session, exit_code = ?exit.exit_code, "exit observed");
            bus.publish(ContinuationEvent::new(
                exit.session,
                exit.agent,
                exit.project_path,
                clock.epoch_ms(),
                TriggerMeta::ProcessExit { exit_code: exit.exit_code },
            ));
        }
    })
}

/// Route published events into per-session FIFO workers.
fn spawn_dispatch<B, N, S, P, C>(
    mut events: mpsc::UnboundedReceiver<ContinuationEvent>,
    service: Arc<DecisionService<B, N, S, P, C>>,
    workers: WorkerMap,
) -> JoinHandle<()>
where
    B: SessionBackend,
    N: NotifyAdapter,
    S: TaskStore,
    P: PromptTemplate,
    C: Clock,
{
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let tx = {
                let mut workers = workers.lock();
                workers
                    .entry(event.session.clone())
                    .or_insert_with(|| spawn_session_worker(Arc::clone(&service)))
                    .clone()
            };
            if tx.send(event).is_err() {
                tracing::warn!("session worker gone, event dropped");
            }
        }
    })
}

/// One worker per session: decisions run sequentially, never concurrently.
fn spawn_session_worker<B, N, S, P, C>(
    service: Arc<DecisionService<B, N, S, P, C>>,
) -> mpsc::UnboundedSender<ContinuationEvent>
where
    B: SessionBackend,
    N: NotifyAdapter,
    S: TaskStore,
    P: PromptTemplate,
    C: Clock,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<ContinuationEvent>();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            // failures are logged inside handle_event; the event is simply
            // unresolved and the next trigger retries
            let _ = service.handle_event(&event).await;
        }
    });
    tx
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
