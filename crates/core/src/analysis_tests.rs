// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn conclusion_serializes_kebab_case() {
    assert_eq!(serde_json::to_string(&Conclusion::TaskComplete).unwrap(), "\"task-complete\"");
    assert_eq!(serde_json::to_string(&Conclusion::StuckOrError).unwrap(), "\"stuck-or-error\"");
    assert_eq!(serde_json::to_string(&Conclusion::MaxIterations).unwrap(), "\"max-iterations\"");
}

#[test]
fn action_display_matches_wire_format() {
    assert_eq!(RecommendedAction::AdvanceTask.to_string(), "advance-task");
    assert_eq!(RecommendedAction::InjectPrompt.to_string(), "inject-prompt");
    assert_eq!(RecommendedAction::NotifyOwner.to_string(), "notify-owner");
    assert_eq!(
        serde_json::to_string(&RecommendedAction::RetryWithHints).unwrap(),
        "\"retry-with-hints\""
    );
}

#[test]
fn at_iteration_limit_tracks_conclusion() {
    let analysis = AgentStateAnalysis {
        conclusion: Conclusion::MaxIterations,
        confidence: 1.0,
        evidence: vec!["iterations 10/10".to_string()],
        recommended: RecommendedAction::NotifyOwner,
        task: TaskId::new("t1"),
        iterations: 10,
        max_iterations: 10,
    };
    assert!(analysis.at_iteration_limit());
}
