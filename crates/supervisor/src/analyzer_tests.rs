// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use vigil_core::ContinuationRecord;
use yare::parameterized;

struct Fixture {
    task: TaskId,
    record: ContinuationRecord,
}

impl Fixture {
    fn new() -> Self {
        Self { task: TaskId::new("tickets/t1.md"), record: ContinuationRecord::new(10) }
    }

    fn ctx<'a>(&'a self, output: &'a str) -> AnalyzerContext<'a> {
        AnalyzerContext {
            task: &self.task,
            record: &self.record,
            output,
            exit_code: None,
            absolute_max_iterations: 50,
            error_retry_budget: 1,
        }
    }
}

#[parameterized(
    explicit_done = { "I have finished.\nTask complete.", Conclusion::TaskComplete },
    success_phrase = { "the refactor was successfully completed", Conclusion::TaskComplete },
    error_line = { "error: expected `;` at line 3", Conclusion::StuckOrError },
    rust_panic = { "thread 'main' panicked at src/main.rs:4", Conclusion::StuckOrError },
    python_trace = { "Traceback (most recent call last):\n  File ...", Conclusion::StuckOrError },
    question = { "Which database should this migrate?", Conclusion::WaitingInput },
    waiting_phrase = { "Waiting for your review of the plan", Conclusion::WaitingInput },
    no_signal = { "compiling crate foo v0.1.0 ...", Conclusion::Incomplete },
    empty = { "", Conclusion::Unknown },
)]
fn classifies_output(output: &str, expect: Conclusion) {
    let fixture = Fixture::new();
    let analysis = OutputAnalyzer::new().analyze(&fixture.ctx(output));
    assert_eq!(analysis.conclusion, expect, "evidence: {:?}", analysis.evidence);
}

#[test]
fn completion_outranks_waiting_and_error_outranks_waiting() {
    let fixture = Fixture::new();
    let analyzer = OutputAnalyzer::new();

    let both = analyzer.analyze(&fixture.ctx("task complete\nlet me know if anything else"));
    assert_eq!(both.conclusion, Conclusion::TaskComplete);

    let err = analyzer.analyze(&fixture.ctx("error: tests failed\nshould I proceed?"));
    assert_eq!(err.conclusion, Conclusion::StuckOrError);
}

#[test]
fn single_completion_signal_without_errors_scores_the_baseline() {
    let fixture = Fixture::new();
    let analysis = OutputAnalyzer::new().analyze(&fixture.ctx("Task complete."));
    assert_eq!(analysis.conclusion, Conclusion::TaskComplete);
    assert!(analysis.confidence >= CONFIDENCE_SINGLE_SIGNAL);
    assert_eq!(analysis.recommended, RecommendedAction::AdvanceTask);
}

#[test]
fn agreeing_signals_raise_confidence_above_single_signal() {
    let fixture = Fixture::new();
    let analyzer = OutputAnalyzer::new();
    let single = analyzer.analyze(&fixture.ctx("task complete"));
    let double = analyzer.analyze(&fixture.ctx("task complete — all tests pass"));
    assert!(double.confidence > single.confidence);
    assert!(double.confidence <= CONFIDENCE_CEILING);
}

#[test]
fn conflicting_signals_lower_confidence() {
    let fixture = Fixture::new();
    let analysis =
        OutputAnalyzer::new().analyze(&fixture.ctx("task complete\nerror: lint found issues"));
    assert_eq!(analysis.conclusion, Conclusion::TaskComplete);
    assert_eq!(analysis.confidence, CONFIDENCE_CONFLICT);
    // conflicting evidence is still recorded for audit
    assert!(analysis.evidence.iter().any(|e| e.contains("error")));
}

#[test]
fn absence_of_signals_scores_below_explicit_signals() {
    let fixture = Fixture::new();
    let analysis = OutputAnalyzer::new().analyze(&fixture.ctx("building module 7 of 20"));
    assert_eq!(analysis.conclusion, Conclusion::Incomplete);
    assert_eq!(analysis.confidence, CONFIDENCE_ABSENCE);
    assert_eq!(analysis.recommended, RecommendedAction::InjectPrompt);
}

#[test]
fn repeated_identical_error_lines_are_an_error_signal() {
    let fixture = Fixture::new();
    let output = "connection error: timeout\n".repeat(4);
    let analysis = OutputAnalyzer::new().analyze(&fixture.ctx(&output));
    assert_eq!(analysis.conclusion, Conclusion::StuckOrError);
    assert!(analysis.evidence.iter().any(|e| e.contains("repeated")), "{:?}", analysis.evidence);
}

#[test]
fn nonzero_exit_code_counts_as_error_signal() {
    let fixture = Fixture::new();
    let mut ctx = fixture.ctx("session ended");
    ctx.exit_code = Some(137);
    let analysis = OutputAnalyzer::new().analyze(&ctx);
    assert_eq!(analysis.conclusion, Conclusion::StuckOrError);
    assert!(analysis.evidence.iter().any(|e| e.contains("exited with code 137")));
}

#[test]
fn iteration_limit_forces_max_iterations_regardless_of_output() {
    let mut fixture = Fixture::new();
    fixture.record.iterations = 10;
    let analysis = OutputAnalyzer::new().analyze(&fixture.ctx("task complete — all tests pass"));
    assert_eq!(analysis.conclusion, Conclusion::MaxIterations);
    assert_eq!(analysis.confidence, 1.0);
    assert_eq!(analysis.recommended, RecommendedAction::NotifyOwner);
    assert_eq!(analysis.iterations, 10, "analysis must not touch the count");
}

#[test]
fn absolute_max_clamps_a_corrupt_record_budget() {
    let mut fixture = Fixture::new();
    fixture.record.max_iterations = u32::MAX;
    fixture.record.iterations = 50;
    let analysis = OutputAnalyzer::new().analyze(&fixture.ctx("still working"));
    assert_eq!(analysis.conclusion, Conclusion::MaxIterations);
    assert_eq!(analysis.max_iterations, 50);
}

#[test]
fn first_error_retries_then_escalates_past_budget() {
    let mut fixture = Fixture::new();
    let analyzer = OutputAnalyzer::new();

    let first = analyzer.analyze(&fixture.ctx("error: build failed"));
    assert_eq!(first.recommended, RecommendedAction::RetryWithHints);

    fixture.record.consecutive_errors = 1;
    let second = analyzer.analyze(&fixture.ctx("error: build failed"));
    assert_eq!(second.conclusion, Conclusion::StuckOrError);
    assert_eq!(second.recommended, RecommendedAction::NotifyOwner);
}

#[test]
fn waiting_input_notifies_owner_by_default() {
    let fixture = Fixture::new();
    let analysis = OutputAnalyzer::new().analyze(&fixture.ctx("Should I proceed with the merge?"));
    assert_eq!(analysis.conclusion, Conclusion::WaitingInput);
    assert_eq!(analysis.recommended, RecommendedAction::NotifyOwner);
}

#[test]
fn action_overrides_replace_the_default_mapping() {
    let fixture = Fixture::new();
    let analyzer = OutputAnalyzer::new()
        .override_action(Conclusion::WaitingInput, RecommendedAction::PauseAgent);
    let analysis = analyzer.analyze(&fixture.ctx("Should I proceed with the merge?"));
    assert_eq!(analysis.recommended, RecommendedAction::PauseAgent);
}

#[test]
fn unknown_output_recommends_no_action() {
    let fixture = Fixture::new();
    let analysis = OutputAnalyzer::new().analyze(&fixture.ctx("   \n  "));
    assert_eq!(analysis.conclusion, Conclusion::Unknown);
    assert_eq!(analysis.recommended, RecommendedAction::NoAction);
}
