//! Result recording and serialization.

use std::path::Path;

use serde::Serialize;

use crate::error::RecorderError;

/// One scored prediction: the output record for a benchmark entry.
#[derive(Debug, Clone, Serialize)]
pub struct ResultRecord {
    pub instance_id: String,
    pub model_name_or_path: String,
    /// Candidate patch text, de-fenced. Empty when the entry failed before
    /// a candidate could be produced.
    pub model_patch: String,
}

/// Accumulates one record per benchmark entry, in input order, and writes
/// the batch exactly once.
#[derive(Debug, Default)]
pub struct ResultRecorder {
    records: Vec<ResultRecord>,
}

impl ResultRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. Raw model output is not guaranteed to be bare diff
    /// text, so surrounding code-block markers are stripped here.
    pub fn record(
        &mut self,
        instance_id: impl Into<String>,
        model_id: impl Into<String>,
        patch_text: &str,
    ) {
        self.records.push(ResultRecord {
            instance_id: instance_id.into(),
            model_name_or_path: model_id.into(),
            model_patch: strip_code_fences(patch_text).to_string(),
        });
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialize the full batch as a JSON array.
    pub fn flush(&self, path: &Path) -> Result<(), RecorderError> {
        let json = serde_json::to_string_pretty(&self.records)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), records = self.records.len(), "wrote predictions");
        Ok(())
    }
}

/// Strip a surrounding Markdown code fence, if present.
///
/// Handles an optional language tag on the opening fence (```diff, ```patch)
/// and trailing whitespace after the closing fence. Text without a fence is
/// returned unchanged apart from trimming.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();

    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the rest of the opening fence line (language tag, if any).
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => return trimmed,
    };

    match body.rfind("```") {
        Some(close) => body[..close].trim_end_matches(['\n', ' ']),
        None => body.trim_end(),
    }
}
