// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Continuation prompt rendering.
//!
//! The decision service only supplies variable values; the message text is
//! owned by the template collaborator. The default template keeps a stalled
//! agent oriented: task title, continuation budget, and hints derived from
//! the analysis.

use vigil_core::{Conclusion, TaskId};

/// Variables available to a continuation template.
#[derive(Debug, Clone)]
pub struct PromptVars {
    pub task: TaskId,
    pub title: String,
    /// 1-based number of the continuation being started.
    pub iteration: u32,
    pub max_iterations: u32,
    pub conclusion: Conclusion,
    /// Hints derived from evidence (error lines, failing gates, ...).
    pub hints: Vec<String>,
}

/// Renders the message injected into a session to re-engage its agent.
pub trait PromptTemplate: Send + Sync + 'static {
    fn render(&self, vars: &PromptVars) -> String;
}

const CONTINUATION_TEMPLATE: &str = "\
[vigil] Task \"{title}\" is still open (continuation {iteration}/{max_iterations}, \
last state: {conclusion}).
{hints}Please continue with the task.";

/// Substitute `{name}` placeholders from a variable map.
fn interpolate(template: &str, vars: &[(&str, String)]) -> String {
    let mut text = template.to_string();
    for (name, value) in vars {
        text = text.replace(&format!("{{{}}}", name), value);
    }
    text
}

/// Built-in template used when no external prompt collaborator is wired in.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultPromptTemplate;

impl PromptTemplate for DefaultPromptTemplate {
    fn render(&self, vars: &PromptVars) -> String {
        let hints = if vars.hints.is_empty() {
            String::new()
        } else {
            let mut block = String::from("Hints:\n");
            for hint in &vars.hints {
                block.push_str("- ");
                block.push_str(hint);
                block.push('\n');
            }
            block
        };

        interpolate(
            CONTINUATION_TEMPLATE,
            &[
                ("title", vars.title.clone()),
                ("iteration", vars.iteration.to_string()),
                ("max_iterations", vars.max_iterations.to_string()),
                ("conclusion", vars.conclusion.to_string()),
                ("hints", hints),
            ],
        )
    }
}

#[cfg(test)]
#[path = "prompt_tests.rs"]
mod tests;
