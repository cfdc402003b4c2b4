//! Pipeline state threaded through the agent stages.
//!
//! The state is an immutable value owned by the pipeline run. Each stage
//! receives a reference and returns a [`StateDelta`] (the subset of fields
//! it produced) which the driver merges before the next stage executes.
//! No two stages ever share mutable state.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Structured output of the locate stage: which source file the model
/// believes is responsible for the failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocatedFile {
    /// Name of the source file (not the test file) causing the error.
    pub file_name: String,
    /// The line of code the model suspects, written out.
    pub suspected_line: String,
    /// Human-readable explanation of the error.
    pub explanation: String,
}

/// Shared state record for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub repo_id: String,
    pub repo_path: PathBuf,
    pub problem_statement: String,
    /// Accumulated failure output from the test run.
    pub error_text: String,
    pub located: Option<LocatedFile>,
    pub context_text: Option<String>,
    /// Ordered candidate patches, in generation order.
    pub candidates: Vec<String>,
    pub selected: Option<String>,
}

impl PipelineState {
    pub fn new(
        repo_id: impl Into<String>,
        repo_path: PathBuf,
        problem_statement: impl Into<String>,
        error_text: impl Into<String>,
    ) -> Self {
        Self {
            repo_id: repo_id.into(),
            repo_path,
            problem_statement: problem_statement.into(),
            error_text: error_text.into(),
            located: None,
            context_text: None,
            candidates: Vec::new(),
            selected: None,
        }
    }

    /// Merge a stage's partial update into the state, consuming both.
    /// Fields the delta does not set are preserved.
    pub fn apply(mut self, delta: StateDelta) -> Self {
        if let Some(located) = delta.located {
            self.located = Some(located);
        }
        if let Some(context_text) = delta.context_text {
            self.context_text = Some(context_text);
        }
        if let Some(candidates) = delta.candidates {
            self.candidates = candidates;
        }
        if let Some(selected) = delta.selected {
            self.selected = Some(selected);
        }
        self
    }
}

/// A stage's partial update: only the fields the stage produced.
#[derive(Debug, Default)]
pub struct StateDelta {
    pub located: Option<LocatedFile>,
    pub context_text: Option<String>,
    pub candidates: Option<Vec<String>>,
    pub selected: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> PipelineState {
        PipelineState::new(
            "a/b",
            PathBuf::from("/tmp/a_b"),
            "scalar input fails",
            "Traceback ...",
        )
    }

    #[test]
    fn apply_merges_set_fields_only() {
        let merged = state().apply(StateDelta {
            context_text: Some("def foo(): ...".to_string()),
            ..Default::default()
        });
        assert_eq!(merged.context_text.as_deref(), Some("def foo(): ..."));
        assert_eq!(merged.error_text, "Traceback ...");
        assert!(merged.located.is_none());
        assert!(merged.candidates.is_empty());
    }

    #[test]
    fn later_delta_wins_per_field() {
        let merged = state()
            .apply(StateDelta {
                context_text: Some("first".to_string()),
                ..Default::default()
            })
            .apply(StateDelta {
                context_text: Some("second".to_string()),
                ..Default::default()
            });
        assert_eq!(merged.context_text.as_deref(), Some("second"));
    }

    #[test]
    fn candidates_replace_as_a_unit() {
        let merged = state().apply(StateDelta {
            candidates: Some(vec!["diff a".to_string(), "diff b".to_string()]),
            ..Default::default()
        });
        assert_eq!(merged.candidates.len(), 2);
    }

    #[test]
    fn located_file_requires_all_fields() {
        let err = serde_json::from_str::<LocatedFile>(r#"{"file_name": "mod.py"}"#);
        assert!(err.is_err(), "partial locate output must not deserialize");

        let ok = serde_json::from_str::<LocatedFile>(
            r#"{"file_name": "mod.py", "suspected_line": "x = y[0]", "explanation": "index"}"#,
        );
        assert!(ok.is_ok());
    }
}
