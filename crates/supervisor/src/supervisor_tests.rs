// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end supervision flows over the fake backend.

use super::*;
use crate::prompt::DefaultPromptTemplate;
use crate::store::MemoryTaskStore;
use std::time::Duration;
use vigil_adapters::{FakeNotifyAdapter, FakeSessionBackend};
use vigil_core::{ContinuationRecord, FakeClock, TaskPhase, TerminalState, TriggerKind};

type TestSupervisor = Supervisor<
    FakeSessionBackend,
    FakeNotifyAdapter,
    MemoryTaskStore,
    DefaultPromptTemplate,
    FakeClock,
>;

struct Ctx {
    supervisor: TestSupervisor,
    backend: Arc<FakeSessionBackend>,
    notify: FakeNotifyAdapter,
    store: Arc<MemoryTaskStore>,
    clock: FakeClock,
    session: SessionName,
    task: TaskId,
}

async fn setup(config: SupervisorConfig) -> Ctx {
    let backend = Arc::new(FakeSessionBackend::new());
    let notify = FakeNotifyAdapter::new();
    let store = Arc::new(MemoryTaskStore::new());
    let clock = FakeClock::new();
    let session = SessionName::new("s1");
    let task = TaskId::new("tickets/t1.md");

    let supervisor = Supervisor::new(
        Arc::clone(&backend),
        notify.clone(),
        Arc::clone(&store),
        DefaultPromptTemplate,
        clock.clone(),
        config,
    );

    supervisor
        .create_session(SessionSpec::new("s1", AgentId::new(), "claude", "/tmp/p"))
        .await
        .unwrap();
    store.insert(task.clone(), ContinuationRecord::new(10));
    supervisor.watch(WatchSpec {
        session: session.clone(),
        agent: AgentId::new(),
        project_path: PathBuf::from("/tmp/p"),
        task: task.clone(),
        title: "Fix the build".to_string(),
    });

    Ctx { supervisor, backend, notify, store, clock, session, task }
}

fn no_debounce_config() -> SupervisorConfig {
    SupervisorConfig { debounce: Duration::ZERO, ..SupervisorConfig::default() }
}

/// Drive the paused runtime until `predicate` holds (or fail).
async fn wait_until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn explicit_request_injects_a_continuation_prompt() {
    let ctx = setup(no_debounce_config()).await;
    ctx.backend.set_output(&ctx.session, "compiling module 3 of 20");

    ctx.supervisor.request_continuation(&ctx.session, Some("operator".to_string())).unwrap();

    let backend = Arc::clone(&ctx.backend);
    let session = ctx.session.clone();
    wait_until(move || !backend.writes(&session).is_empty()).await;

    let writes = ctx.backend.writes(&ctx.session);
    assert!(writes[0].contains("continuation 1/10"));
    assert_eq!(ctx.store.record(&ctx.task).unwrap().iterations, 1);
    assert_eq!(
        ctx.store.record(&ctx.task).unwrap().history[0].trigger,
        TriggerKind::ExplicitRequest
    );
    ctx.supervisor.shutdown();
}

#[tokio::test(start_paused = true)]
async fn request_continuation_for_unwatched_session_fails() {
    let ctx = setup(no_debounce_config()).await;
    let err = ctx
        .supervisor
        .request_continuation(&SessionName::new("ghost"), None)
        .unwrap_err();
    assert!(matches!(err, SupervisorError::NotWatched(_)));
    ctx.supervisor.shutdown();
}

#[tokio::test(start_paused = true)]
async fn process_exit_flows_through_to_a_decision() {
    let ctx = setup(no_debounce_config()).await;
    ctx.backend.set_output(&ctx.session, "Task complete. All tests pass.");
    ctx.backend.exit_session(&ctx.session, Some(0));

    let store = Arc::clone(&ctx.store);
    let task = ctx.task.clone();
    wait_until(move || store.is_complete(&task)).await;

    assert_eq!(
        ctx.supervisor.task_phase(&ctx.task),
        TaskPhase::Terminal(TerminalState::Complete)
    );
    let record = ctx.store.record(&ctx.task).unwrap();
    assert_eq!(record.history.last().map(|h| h.trigger), Some(TriggerKind::ProcessExit));
    ctx.supervisor.shutdown();
}

#[tokio::test(start_paused = true)]
async fn idle_detection_reprompts_a_stalled_agent() {
    let ctx = setup(no_debounce_config()).await;
    ctx.backend.set_output(&ctx.session, "thinking really hard...");

    // let the poll/sweeper workers register their first timers before advancing
    tokio::task::yield_now().await;

    // three poll cycles: sample, unchanged, unchanged → idle → inject
    for _ in 0..3 {
        ctx.clock.advance(Duration::from_secs(120));
        tokio::time::advance(Duration::from_secs(120)).await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    let backend = Arc::clone(&ctx.backend);
    let session = ctx.session.clone();
    wait_until(move || !backend.writes(&session).is_empty()).await;

    let record = ctx.store.record(&ctx.task).unwrap();
    assert_eq!(record.iterations, 1);
    assert_eq!(record.history[0].trigger, TriggerKind::OutputIdle);
    ctx.supervisor.shutdown();
}

#[tokio::test(start_paused = true)]
async fn stale_heartbeat_flows_through_the_sweeper() {
    let ctx = setup(no_debounce_config()).await;
    ctx.backend.set_output(&ctx.session, "quiet terminal, busy agent");
    ctx.supervisor.record_heartbeat(&ctx.session);

    // let the poll/sweeper workers register their first timers before advancing
    tokio::task::yield_now().await;

    // heartbeat goes stale well past the 30m threshold
    ctx.clock.advance_mins(31);
    tokio::time::advance(Duration::from_secs(61)).await;
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }

    let backend = Arc::clone(&ctx.backend);
    let session = ctx.session.clone();
    wait_until(move || !backend.writes(&session).is_empty()).await;

    let record = ctx.store.record(&ctx.task).unwrap();
    assert_eq!(record.history[0].trigger, TriggerKind::HeartbeatStale);
    ctx.supervisor.shutdown();
}

#[tokio::test(start_paused = true)]
async fn terminate_session_cancels_pending_events_and_unbinds() {
    // real debounce so an event is pending when we terminate
    let ctx = setup(SupervisorConfig::default()).await;
    ctx.backend.set_output(&ctx.session, "some output");

    // a debounced event is waiting out its quiet period
    ctx.supervisor.bus().publish(vigil_core::ContinuationEvent::new(
        ctx.session.clone(),
        AgentId::new(),
        PathBuf::from("/tmp/p"),
        0,
        vigil_core::TriggerMeta::OutputIdle { idle_ms: 240_000, last_output: None },
    ));
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(ctx.supervisor.bus().pending_count(), 1);

    ctx.supervisor.terminate_session(&ctx.session).await.unwrap();
    assert_eq!(ctx.supervisor.bus().pending_count(), 0);
    assert!(ctx.supervisor.watched_sessions().is_empty());
    assert!(!ctx.backend.is_live(&ctx.session));

    // even if time elapses, nothing fires for the dead session
    tokio::time::advance(Duration::from_secs(10)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(ctx.backend.writes(&ctx.session).is_empty());
    assert!(ctx.notify.calls().is_empty());
    ctx.supervisor.shutdown();
}

#[tokio::test(start_paused = true)]
async fn exit_after_terminate_is_a_stale_event() {
    let ctx = setup(no_debounce_config()).await;
    ctx.supervisor.terminate_session(&ctx.session).await.unwrap();

    // the exit notification arrives after the unbind and is dropped quietly
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert!(ctx.backend.writes(&ctx.session).is_empty());
    assert_eq!(ctx.store.record(&ctx.task).unwrap().iterations, 0);
    ctx.supervisor.shutdown();
}

#[tokio::test(start_paused = true)]
async fn independent_supervisors_do_not_interfere() {
    let a = setup(no_debounce_config()).await;
    let b = setup(no_debounce_config()).await;

    a.backend.set_output(&a.session, "compiling");
    a.supervisor.request_continuation(&a.session, None).unwrap();

    let backend = Arc::clone(&a.backend);
    let session = a.session.clone();
    wait_until(move || !backend.writes(&session).is_empty()).await;

    assert!(b.backend.writes(&b.session).is_empty());
    assert_eq!(b.store.record(&b.task).unwrap().iterations, 0);
    a.supervisor.shutdown();
    b.supervisor.shutdown();
}
