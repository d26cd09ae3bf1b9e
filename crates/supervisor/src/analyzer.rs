// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Output state analysis.
//!
//! Pure classification: `(recent output, continuation record, trigger
//! context) -> AgentStateAnalysis`. No side effects, no I/O; the decision
//! service owns everything stateful.
//!
//! Signal detection is a prioritized data-driven rule list rather than
//! nested conditionals, so the rule set can be extended and tested without
//! touching control flow. Priority: explicit completion > explicit error >
//! explicit question/waiting > default incomplete. The iteration bound is
//! checked before any of that and wins unconditionally: it is the primary
//! guard against runaway continuation loops.

use std::collections::HashMap;
use vigil_core::{AgentStateAnalysis, Conclusion, ContinuationRecord, RecommendedAction, TaskId};

/// Confidence for a conclusion backed by exactly one explicit signal.
pub const CONFIDENCE_SINGLE_SIGNAL: f64 = 0.7;
/// Added per additional agreeing signal, up to [`CONFIDENCE_CEILING`].
pub const CONFIDENCE_AGREEMENT_BONUS: f64 = 0.1;
pub const CONFIDENCE_CEILING: f64 = 0.95;
/// Confidence when competing signal classes disagree.
pub const CONFIDENCE_CONFLICT: f64 = 0.55;
/// Confidence for conclusions inferred from absence of signals.
pub const CONFIDENCE_ABSENCE: f64 = 0.35;

/// Class of textual signal a rule detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalClass {
    Completion,
    Error,
    Waiting,
}

/// How a rule matches against recent output.
#[derive(Debug, Clone)]
enum Matcher {
    /// Case-insensitive substring anywhere in the output.
    Phrase(&'static str),
    /// Last non-empty line ends with `?` (the agent asked something).
    QuestionTail,
    /// The same error-looking line occurs at least `min` times.
    RepeatedErrorLine { min: usize },
}

/// One signal-detection rule.
#[derive(Debug, Clone)]
struct SignalRule {
    class: SignalClass,
    matcher: Matcher,
}

impl SignalRule {
    fn phrase(class: SignalClass, phrase: &'static str) -> Self {
        Self { class, matcher: Matcher::Phrase(phrase) }
    }

    /// Evidence string when the rule matches, `None` otherwise.
    fn matches(&self, output: &str, lowered: &str) -> Option<String> {
        match &self.matcher {
            Matcher::Phrase(phrase) => lowered
                .contains(phrase)
                .then(|| format!("{} signal: \"{}\"", class_label(self.class), phrase)),
            Matcher::QuestionTail => {
                let last = output.lines().rev().find(|l| !l.trim().is_empty())?;
                last.trim_end().ends_with('?').then(|| {
                    format!("question signal: line ends with '?' ({})", last.trim())
                })
            }
            Matcher::RepeatedErrorLine { min } => {
                let mut counts: HashMap<&str, usize> = HashMap::new();
                for line in lowered.lines() {
                    let line = line.trim();
                    if !line.is_empty() && line.contains("error") {
                        *counts.entry(line).or_default() += 1;
                    }
                }
                counts
                    .into_iter()
                    .filter(|(_, n)| n >= min)
                    .max_by_key(|(_, n)| *n)
                    .map(|(line, n)| format!("error signal: line repeated {}x ({})", n, line))
            }
        }
    }
}

fn class_label(class: SignalClass) -> &'static str {
    match class {
        SignalClass::Completion => "completion",
        SignalClass::Error => "error",
        SignalClass::Waiting => "waiting",
    }
}

fn default_rules() -> Vec<SignalRule> {
    use SignalClass::*;
    vec![
        // explicit success phrases
        SignalRule::phrase(Completion, "task complete"),
        SignalRule::phrase(Completion, "task is complete"),
        SignalRule::phrase(Completion, "successfully completed"),
        SignalRule::phrase(Completion, "all tests pass"),
        SignalRule::phrase(Completion, "nothing left to do"),
        SignalRule::phrase(Completion, "marked the task as done"),
        // explicit failure phrases and stack-trace heads
        SignalRule::phrase(Error, "error:"),
        SignalRule::phrase(Error, "fatal:"),
        SignalRule::phrase(Error, "panicked at"),
        SignalRule::phrase(Error, "stack backtrace:"),
        SignalRule::phrase(Error, "traceback (most recent call last)"),
        SignalRule::phrase(Error, "command not found"),
        SignalRule::phrase(Error, "permission denied"),
        SignalRule { class: Error, matcher: Matcher::RepeatedErrorLine { min: 3 } },
        // prompt/question markers
        SignalRule::phrase(Waiting, "waiting for"),
        SignalRule::phrase(Waiting, "let me know"),
        SignalRule::phrase(Waiting, "should i proceed"),
        SignalRule::phrase(Waiting, "please confirm"),
        SignalRule::phrase(Waiting, "which option"),
        SignalRule { class: SignalClass::Waiting, matcher: Matcher::QuestionTail },
    ]
}

/// Inputs for one analysis pass.
#[derive(Debug)]
pub struct AnalyzerContext<'a> {
    pub task: &'a TaskId,
    pub record: &'a ContinuationRecord,
    /// Recent terminal output (stable snapshot).
    pub output: &'a str,
    /// Exit code when the trigger was a process exit.
    pub exit_code: Option<i32>,
    pub absolute_max_iterations: u32,
    /// Consecutive stuck-or-error retries allowed before escalating.
    pub error_retry_budget: u32,
}

/// Classifies agent state from terminal output.
pub struct OutputAnalyzer {
    rules: Vec<SignalRule>,
    /// Conclusion → action overrides (the default mapping is design policy,
    /// not a hard rule).
    action_overrides: HashMap<Conclusion, RecommendedAction>,
}

impl Default for OutputAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputAnalyzer {
    pub fn new() -> Self {
        Self { rules: default_rules(), action_overrides: HashMap::new() }
    }

    /// Override the recommended action for a conclusion.
    pub fn override_action(mut self, conclusion: Conclusion, action: RecommendedAction) -> Self {
        self.action_overrides.insert(conclusion, action);
        self
    }

    pub fn analyze(&self, ctx: &AnalyzerContext<'_>) -> AgentStateAnalysis {
        let max_iterations = ctx.record.effective_max(ctx.absolute_max_iterations);

        // Hard bound first: at the limit nothing in the output matters.
        if ctx.record.iterations >= max_iterations {
            return self.build(
                ctx,
                Conclusion::MaxIterations,
                1.0,
                vec![format!(
                    "iteration limit reached ({}/{})",
                    ctx.record.iterations, max_iterations
                )],
                max_iterations,
            );
        }

        let lowered = ctx.output.to_lowercase();
        let mut evidence_by_class: HashMap<SignalClass, Vec<String>> = HashMap::new();
        for rule in &self.rules {
            if let Some(evidence) = rule.matches(ctx.output, &lowered) {
                evidence_by_class.entry(rule.class).or_default().push(evidence);
            }
        }
        if let Some(code) = ctx.exit_code {
            if code != 0 {
                evidence_by_class
                    .entry(SignalClass::Error)
                    .or_default()
                    .push(format!("process exited with code {}", code));
            }
        }

        let count = |class: SignalClass| {
            evidence_by_class.get(&class).map(Vec::len).unwrap_or(0)
        };
        let completion = count(SignalClass::Completion);
        let error = count(SignalClass::Error);
        let waiting = count(SignalClass::Waiting);

        // Ordered priority: completion > error > waiting.
        let (conclusion, class) = if completion > 0 {
            (Conclusion::TaskComplete, Some(SignalClass::Completion))
        } else if error > 0 {
            (Conclusion::StuckOrError, Some(SignalClass::Error))
        } else if waiting > 0 {
            (Conclusion::WaitingInput, Some(SignalClass::Waiting))
        } else if ctx.output.trim().is_empty() {
            (Conclusion::Unknown, None)
        } else {
            (Conclusion::Incomplete, None)
        };

        let (confidence, evidence) = match class {
            Some(class) => {
                let own = evidence_by_class.remove(&class).unwrap_or_default();
                let conflicting: usize = evidence_by_class.values().map(Vec::len).sum();
                let confidence = if conflicting > 0 {
                    CONFIDENCE_CONFLICT
                } else {
                    (CONFIDENCE_SINGLE_SIGNAL
                        + CONFIDENCE_AGREEMENT_BONUS * (own.len().saturating_sub(1)) as f64)
                        .min(CONFIDENCE_CEILING)
                };
                // Keep the winning class's evidence first, then the rest.
                let mut evidence = own;
                for other in evidence_by_class.into_values() {
                    evidence.extend(other);
                }
                (confidence, evidence)
            }
            None => {
                let evidence = match conclusion {
                    Conclusion::Unknown => vec!["no output captured".to_string()],
                    _ => vec!["no explicit signal; output present but unchanged".to_string()],
                };
                (if conclusion == Conclusion::Unknown { 0.2 } else { CONFIDENCE_ABSENCE }, evidence)
            }
        };

        self.build(ctx, conclusion, confidence, evidence, max_iterations)
    }

    fn build(
        &self,
        ctx: &AnalyzerContext<'_>,
        conclusion: Conclusion,
        confidence: f64,
        evidence: Vec<String>,
        max_iterations: u32,
    ) -> AgentStateAnalysis {
        AgentStateAnalysis {
            conclusion,
            confidence,
            evidence,
            recommended: self.action_for(conclusion, ctx),
            task: ctx.task.clone(),
            iterations: ctx.record.iterations,
            max_iterations,
        }
    }

    /// Design-default conclusion → action mapping, with overrides applied.
    fn action_for(&self, conclusion: Conclusion, ctx: &AnalyzerContext<'_>) -> RecommendedAction {
        if let Some(action) = self.action_overrides.get(&conclusion) {
            return *action;
        }
        match conclusion {
            Conclusion::TaskComplete => RecommendedAction::AdvanceTask,
            Conclusion::WaitingInput => RecommendedAction::NotifyOwner,
            // First occurrences retry with hints; repeat offenders escalate.
            // Consecutive-error count is tracked separately from iterations.
            Conclusion::StuckOrError => {
                if ctx.record.consecutive_errors < ctx.error_retry_budget {
                    RecommendedAction::RetryWithHints
                } else {
                    RecommendedAction::NotifyOwner
                }
            }
            Conclusion::Incomplete => RecommendedAction::InjectPrompt,
            Conclusion::MaxIterations => RecommendedAction::NotifyOwner,
            Conclusion::Unknown => RecommendedAction::NoAction,
        }
    }
}

#[cfg(test)]
#[path = "analyzer_tests.rs"]
mod tests;
