// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Continuation decision service.
//!
//! Consumes published continuation events, classifies the agent's state via
//! the analyzer, and executes the resulting action under the per-task state
//! machine `Active → Deciding → Acting → Active | Terminal`.
//!
//! Safety properties enforced here:
//! - the iteration bound is re-checked before any prompt injection, even
//!   though the analyzer already forces `MaxIterations` at the limit; both
//!   components must independently agree the system may continue;
//! - task completion is never granted while a required quality gate fails;
//! - a failed cycle leaves the continuation record unmodified (mutations
//!   are the last step) and the event is simply unresolved, so the next
//!   detector trigger retries;
//! - a session terminated mid-cycle aborts the cycle quietly.

use crate::analyzer::{AnalyzerContext, OutputAnalyzer};
use crate::error::SupervisorError;
use crate::prompt::{PromptTemplate, PromptVars};
use crate::store::TaskStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::timeout;
use vigil_adapters::{NotifyAdapter, SessionBackend, SessionError};
use vigil_core::{
    AgentStateAnalysis, Clock, Conclusion, ContinuationEvent, ContinuationRecord, HistoryEntry,
    RecommendedAction, SessionName, SupervisorConfig, TaskId, TaskPhase, TerminalState,
    TriggerKind, TriggerMeta,
};

/// Task bound to a session for the duration of a watch.
#[derive(Debug, Clone)]
pub struct TaskBinding {
    pub task: TaskId,
    /// Human-readable task title, used in prompts and escalations.
    pub title: String,
}

impl TaskBinding {
    pub fn new(task: impl Into<TaskId>, title: impl Into<String>) -> Self {
        Self { task: task.into(), title: title.into() }
    }
}

/// Decides and executes continuation actions for watched sessions.
pub struct DecisionService<B, N, S, P, C> {
    backend: Arc<B>,
    notify: N,
    store: Arc<S>,
    template: P,
    clock: C,
    config: SupervisorConfig,
    analyzer: OutputAnalyzer,
    bindings: Mutex<HashMap<SessionName, TaskBinding>>,
    phases: Mutex<HashMap<TaskId, TaskPhase>>,
    /// Advisory per-task lock serializing record read-modify-write. The
    /// per-session worker queue already serializes events for one session;
    /// this is the second, independent layer.
    locks: Mutex<HashMap<TaskId, Arc<tokio::sync::Mutex<()>>>>,
}

impl<B, N, S, P, C> DecisionService<B, N, S, P, C>
where
    B: SessionBackend,
    N: NotifyAdapter,
    S: TaskStore,
    P: PromptTemplate,
    C: Clock,
{
    pub fn new(
        backend: Arc<B>,
        notify: N,
        store: Arc<S>,
        template: P,
        clock: C,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            backend,
            notify,
            store,
            template,
            clock,
            config,
            analyzer: OutputAnalyzer::new(),
            bindings: Mutex::new(HashMap::new()),
            phases: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the default analyzer (rule set or action mapping overrides).
    pub fn with_analyzer(mut self, analyzer: OutputAnalyzer) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Bind a task to a session and start accepting events for it.
    pub fn bind(&self, session: SessionName, binding: TaskBinding) {
        self.phases.lock().insert(binding.task.clone(), TaskPhase::Active);
        self.bindings.lock().insert(session, binding);
    }

    /// Drop the session→task binding. The task phase is kept for audit.
    pub fn unbind(&self, session: &SessionName) -> Option<TaskBinding> {
        self.bindings.lock().remove(session)
    }

    pub fn binding_for(&self, session: &SessionName) -> Option<TaskBinding> {
        self.bindings.lock().get(session).cloned()
    }

    pub fn phase(&self, task: &TaskId) -> TaskPhase {
        self.phases.lock().get(task).copied().unwrap_or(TaskPhase::Idle)
    }

    fn set_phase(&self, task: &TaskId, phase: TaskPhase) {
        tracing::debug!(task = %task, phase = %phase, "task phase");
        self.phases.lock().insert(task.clone(), phase);
    }

    fn task_lock(&self, task: &TaskId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.locks.lock().entry(task.clone()).or_default())
    }

    /// Run one decision cycle for a published event.
    ///
    /// Events for unbound sessions (stale after unwatch/terminate) and for
    /// terminal tasks are dropped silently.
    pub async fn handle_event(&self, event: &ContinuationEvent) -> Result<(), SupervisorError> {
        let Some(binding) = self.binding_for(&event.session) else {
            tracing::debug!(session = %event.session, trigger = %event.trigger(), "stale event");
            return Ok(());
        };
        let task = binding.task.clone();

        let lock = self.task_lock(&task);
        let _guard = lock.lock().await;

        if self.phase(&task).is_terminal() {
            tracing::debug!(task = %task, "event for terminal task dropped");
            return Ok(());
        }

        self.set_phase(&task, TaskPhase::Deciding);
        match self.decide(event, &binding).await {
            Ok(next) => {
                self.set_phase(&task, next);
                Ok(())
            }
            Err(e) => {
                // Record untouched; the event stays unresolved and the next
                // detector trigger gets another chance.
                self.set_phase(&task, TaskPhase::Active);
                tracing::warn!(task = %task, error = %e, "decision cycle failed");
                Err(e)
            }
        }
    }

    async fn decide(
        &self,
        event: &ContinuationEvent,
        binding: &TaskBinding,
    ) -> Result<TaskPhase, SupervisorError> {
        let task = &binding.task;
        let mut record = self.store.load(task).await?;
        if record.max_iterations == 0 {
            record.max_iterations = self.config.default_max_iterations;
        }

        // The bus debounces per (session, kind); two detectors reporting the
        // same stall arrive as separate events. A continuation injected
        // within the quiet period means this trigger is that same stall.
        if event.trigger() != TriggerKind::ExplicitRequest {
            if let Some(last) = record.last_iteration_at_ms {
                let elapsed = self.clock.epoch_ms().saturating_sub(last);
                if elapsed < self.config.debounce.as_millis() as u64 {
                    tracing::debug!(
                        task = %task,
                        trigger = %event.trigger(),
                        elapsed_ms = elapsed,
                        "continuation just injected, dropping duplicate trigger"
                    );
                    return Ok(TaskPhase::Active);
                }
            }
        }

        let output = match self
            .backend
            .capture_recent_output(&event.session, self.config.capture_lines)
            .await
        {
            Ok(output) => output,
            Err(SessionError::NotFound(_)) | Err(SessionError::Closed(_)) => {
                tracing::debug!(session = %event.session, "session gone mid-cycle, aborting");
                return Ok(TaskPhase::Active);
            }
            Err(e) => return Err(e.into()),
        };

        let exit_code = match &event.meta {
            TriggerMeta::ProcessExit { exit_code } => *exit_code,
            _ => None,
        };
        let ctx = AnalyzerContext {
            task,
            record: &record,
            output: &output,
            exit_code,
            absolute_max_iterations: self.config.absolute_max_iterations,
            error_retry_budget: self.config.error_retry_budget,
        };
        let analysis = timeout(self.config.analysis_timeout, async { self.analyzer.analyze(&ctx) })
            .await
            .map_err(|_| SupervisorError::AnalysisTimeout(self.config.analysis_timeout))?;

        tracing::info!(
            session = %event.session,
            task = %task,
            trigger = %event.trigger(),
            conclusion = %analysis.conclusion,
            action = %analysis.recommended,
            confidence = analysis.confidence,
            "analysis complete"
        );

        self.set_phase(task, TaskPhase::Acting);
        timeout(self.config.action_timeout, self.execute(event, binding, &record, &analysis))
            .await
            .map_err(|_| SupervisorError::ActionTimeout(self.config.action_timeout))?
    }

    async fn execute(
        &self,
        event: &ContinuationEvent,
        binding: &TaskBinding,
        record: &ContinuationRecord,
        analysis: &AgentStateAnalysis,
    ) -> Result<TaskPhase, SupervisorError> {
        match analysis.recommended {
            RecommendedAction::NoAction => Ok(TaskPhase::Active),
            RecommendedAction::AdvanceTask => self.advance(event, binding, record, analysis).await,
            RecommendedAction::InjectPrompt => {
                self.checked_inject(event, binding, record, analysis, Vec::new()).await
            }
            RecommendedAction::RetryWithHints => {
                // hints drawn specifically from the error evidence
                let hints = analysis.evidence.clone();
                self.checked_inject(event, binding, record, analysis, hints).await
            }
            RecommendedAction::NotifyOwner => {
                self.escalate(event, binding, analysis.conclusion, &analysis.evidence).await
            }
            RecommendedAction::PauseAgent => self.pause(event, binding, analysis).await,
        }
    }

    /// Complete the task, but only with every quality gate green.
    async fn advance(
        &self,
        event: &ContinuationEvent,
        binding: &TaskBinding,
        record: &ContinuationRecord,
        analysis: &AgentStateAnalysis,
    ) -> Result<TaskPhase, SupervisorError> {
        let task = &binding.task;
        if !record.all_gates_passed() {
            let hints: Vec<String> = record
                .failing_gates()
                .into_iter()
                .map(|(name, output)| match output {
                    Some(output) => format!("quality gate `{}` failing: {}", name, output),
                    None => format!("quality gate `{}` failing", name),
                })
                .collect();
            tracing::info!(
                task = %task,
                gates = hints.len(),
                "completion blocked by failing gates, re-engaging agent"
            );
            return self.checked_inject(event, binding, record, analysis, hints).await;
        }

        let entry = self.history_entry(event, RecommendedAction::AdvanceTask, analysis.conclusion);
        let cap = self.config.history_cap;
        self.store.update(task, Box::new(move |rec| rec.push_history(entry, cap))).await?;
        self.store.mark_complete(task).await?;
        tracing::info!(task = %task, "task complete, advancing");
        Ok(TaskPhase::Terminal(TerminalState::Complete))
    }

    /// Inject a continuation prompt, guarded by the iteration bound.
    async fn checked_inject(
        &self,
        event: &ContinuationEvent,
        binding: &TaskBinding,
        record: &ContinuationRecord,
        analysis: &AgentStateAnalysis,
        hints: Vec<String>,
    ) -> Result<TaskPhase, SupervisorError> {
        let task = &binding.task;
        let max_iterations = record.effective_max(self.config.absolute_max_iterations);

        // Defensive re-check, independent of the analyzer's own bound. If
        // this fires the analyzer disagreed with us: refuse to act.
        if record.iterations >= max_iterations {
            let limit = SupervisorError::IterationLimitExceeded {
                task: task.clone(),
                iterations: record.iterations,
                max_iterations,
            };
            tracing::warn!(task = %task, error = %limit, "refusing to inject past the bound");
            let evidence = vec![limit.to_string()];
            return self.escalate(event, binding, Conclusion::MaxIterations, &evidence).await;
        }

        // Gate-blocked completions re-engage as incomplete work.
        let conclusion = match analysis.conclusion {
            Conclusion::TaskComplete => Conclusion::Incomplete,
            other => other,
        };

        let vars = PromptVars {
            task: task.clone(),
            title: binding.title.clone(),
            iteration: record.iterations + 1,
            max_iterations,
            conclusion,
            hints,
        };
        let message = format!("{}\n", self.template.render(&vars));
        match self.backend.write(&event.session, message.as_bytes()).await {
            Ok(()) => {}
            Err(SessionError::NotFound(_)) | Err(SessionError::Closed(_)) => {
                tracing::debug!(session = %event.session, "session gone before injection");
                return Ok(TaskPhase::Active);
            }
            Err(e) => return Err(e.into()),
        }

        // Record what was actually executed (gate-blocked completions fall
        // back to a plain prompt injection).
        let action = match analysis.recommended {
            RecommendedAction::RetryWithHints => RecommendedAction::RetryWithHints,
            _ => RecommendedAction::InjectPrompt,
        };
        let entry = self.history_entry(event, action, conclusion);
        let cap = self.config.history_cap;
        let now_ms = self.clock.epoch_ms();
        let is_error = analysis.conclusion == Conclusion::StuckOrError;
        self.store
            .update(
                task,
                Box::new(move |rec| {
                    rec.record_iteration(now_ms);
                    rec.consecutive_errors =
                        if is_error { rec.consecutive_errors + 1 } else { 0 };
                    rec.push_history(entry, cap);
                }),
            )
            .await?;

        tracing::info!(
            session = %event.session,
            task = %task,
            iteration = record.iterations + 1,
            max_iterations,
            "continuation prompt injected"
        );
        Ok(TaskPhase::Active)
    }

    /// Hand the task to a human and stop driving it.
    async fn escalate(
        &self,
        event: &ContinuationEvent,
        binding: &TaskBinding,
        conclusion: Conclusion,
        evidence: &[String],
    ) -> Result<TaskPhase, SupervisorError> {
        let task = &binding.task;

        // Audit trail first: the history entry plus the evidence must let a
        // human understand why automatic continuation stopped.
        let entry = self.history_entry(event, RecommendedAction::NotifyOwner, conclusion);
        let cap = self.config.history_cap;
        self.store.update(task, Box::new(move |rec| rec.push_history(entry, cap))).await?;

        let title = format!("Decision needed: {}", binding.title);
        let mut message = format!("{} ({})", conclusion, event.trigger());
        if !evidence.is_empty() {
            message.push_str("\nevidence:");
            for line in evidence {
                message.push_str("\n- ");
                message.push_str(line);
            }
        }
        if let Err(e) = self.notify.notify(&title, &message).await {
            tracing::warn!(task = %task, error = %e, "owner notification failed");
        }

        tracing::warn!(task = %task, conclusion = %conclusion, "escalated to human");
        Ok(TaskPhase::Terminal(TerminalState::Escalated))
    }

    /// Suspend the session and park the task.
    async fn pause(
        &self,
        event: &ContinuationEvent,
        binding: &TaskBinding,
        analysis: &AgentStateAnalysis,
    ) -> Result<TaskPhase, SupervisorError> {
        let task = &binding.task;
        match self.backend.terminate(&event.session).await {
            // already gone is fine; pausing a dead session is a no-op
            Ok(()) | Err(SessionError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let entry = self.history_entry(event, RecommendedAction::PauseAgent, analysis.conclusion);
        let cap = self.config.history_cap;
        self.store.update(task, Box::new(move |rec| rec.push_history(entry, cap))).await?;

        tracing::info!(task = %task, session = %event.session, "agent paused");
        Ok(TaskPhase::Terminal(TerminalState::Paused))
    }

    fn history_entry(
        &self,
        event: &ContinuationEvent,
        action: RecommendedAction,
        conclusion: Conclusion,
    ) -> HistoryEntry {
        HistoryEntry {
            at_ms: self.clock.epoch_ms(),
            trigger: event.trigger(),
            action,
            conclusion,
        }
    }
}

#[cfg(test)]
#[path = "decision_tests.rs"]
mod tests;
