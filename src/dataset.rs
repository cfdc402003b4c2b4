//! Benchmark dataset loading.
//!
//! The dataset collaborator is a JSON array export with one record per
//! bug-fix task. Records are read-only; unknown fields are ignored so the
//! harness tolerates schema additions upstream.

use std::path::Path;

use serde::Deserialize;

/// One bug-fix task: a repository, a commit, a failing test, a description.
#[derive(Debug, Clone, Deserialize)]
pub struct BenchmarkEntry {
    pub instance_id: String,
    /// Repository key in `owner/name` form.
    pub repo: String,
    pub base_commit: String,
    pub problem_statement: String,
    /// Unified diff that adds or modifies tests to reproduce the failure.
    pub test_patch: String,
    #[serde(default)]
    pub hints_text: Option<String>,
    #[serde(default)]
    pub relevant_files: Vec<String>,
    /// Gold patch shipped with the dataset. Kept for diagnostics only and
    /// never shown to the model.
    #[serde(default)]
    pub patch: Option<String>,
}

/// Load benchmark entries from a JSON array file.
///
/// A load failure is non-fatal to the caller: the error is logged and an
/// empty list is returned.
pub fn load_entries(path: &Path) -> Vec<BenchmarkEntry> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read dataset file");
            return Vec::new();
        }
    };

    match serde_json::from_str::<Vec<BenchmarkEntry>>(&text) {
        Ok(entries) => {
            tracing::info!(path = %path.display(), count = entries.len(), "loaded benchmark entries");
            entries
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to parse dataset file");
            Vec::new()
        }
    }
}
