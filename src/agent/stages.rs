//! The four agent pipeline stages.
//!
//! Each stage is a pure function over the pipeline state: it reads the
//! fields it needs and returns a delta with the fields it produced. Model
//! calls go through the [`ModelProvider`] trait; any provider failure
//! propagates as [`AgentError`] and the pipeline does not retry; retry, if
//! wanted, belongs to the caller at the whole-entry level.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::agent::state::{LocatedFile, PipelineState, StateDelta};
use crate::error::{AgentError, LlmError};
use crate::llm::{parse_structured, CompletionRequest, ModelProvider};

/// One stage of the agent pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, state: &PipelineState) -> Result<StateDelta, AgentError>;
}

fn llm_err(stage: &'static str) -> impl FnOnce(LlmError) -> AgentError {
    move |source| AgentError::Llm { stage, source }
}

// ---------------------------------------------------------------------------
// Locate

const LOCATE_SYSTEM_PROMPT: &str = "You are an expert software engineer reviewing a test failure. \
Your task is to locate the actual source code file (not a test file) that is responsible for \
the failure. The error message may come from a test file, but your goal is to trace the root \
cause to the source code being tested. Do not choose files named like `test_*.py` or located \
in `tests/`. Respond with a JSON object containing exactly these fields: \
\"file_name\" (name of the source file), \"suspected_line\" (the line of code you believe is \
causing the error, written out), and \"explanation\" (a clear human-readable explanation of \
the error). Output only the JSON object.";

/// Locate the source file implicated by the accumulated error text.
pub struct LocateStage {
    provider: Arc<dyn ModelProvider>,
}

impl LocateStage {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Stage for LocateStage {
    fn name(&self) -> &'static str {
        "locate"
    }

    async fn run(&self, state: &PipelineState) -> Result<StateDelta, AgentError> {
        let request = CompletionRequest::new(
            LOCATE_SYSTEM_PROMPT,
            format!("Here is the error:\n{}", state.error_text),
        );

        let response = self
            .provider
            .complete(request)
            .await
            .map_err(llm_err(self.name()))?;

        let located: LocatedFile =
            parse_structured(&response.content).into_stage_result(self.name())?;

        tracing::info!(file = %located.file_name, "locate stage identified source file");

        Ok(StateDelta {
            located: Some(located),
            ..Default::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Load

/// Load the located file's content from the working repository.
pub struct LoadStage;

impl LoadStage {
    /// Resolve a bare file name inside the repository's expected source
    /// layout: `src/<package>/<file>` first (the common layout for the
    /// benchmark's Python projects), then a repository-wide search by name.
    fn resolve(repo_id: &str, repo_path: &Path, file_name: &str) -> Option<PathBuf> {
        let base_name = Path::new(file_name)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())?;

        let package = repo_id.rsplit('/').next().unwrap_or(repo_id);
        let conventional = repo_path.join("src").join(package).join(&base_name);
        if conventional.is_file() {
            return Some(conventional);
        }

        find_by_name(repo_path, &base_name)
    }
}

/// Depth-first search for a file by name, directories visited name-sorted
/// so the result is deterministic.
fn find_by_name(root: &Path, base_name: &str) -> Option<PathBuf> {
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries: Vec<PathBuf> = match std::fs::read_dir(&dir) {
            Ok(read) => read.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => continue,
        };
        entries.sort();

        for entry in entries.iter() {
            if entry.is_file() && entry.file_name().is_some_and(|n| n == base_name) {
                return Some(entry.clone());
            }
        }
        for entry in entries.into_iter().rev() {
            if entry.is_dir() && entry.file_name().is_some_and(|n| n != ".git") {
                stack.push(entry);
            }
        }
    }
    None
}

#[async_trait]
impl Stage for LoadStage {
    fn name(&self) -> &'static str {
        "load"
    }

    async fn run(&self, state: &PipelineState) -> Result<StateDelta, AgentError> {
        let located = state.located.as_ref().ok_or(AgentError::MissingInput {
            stage: "load",
            field: "located",
        })?;

        let path = Self::resolve(&state.repo_id, &state.repo_path, &located.file_name)
            .ok_or_else(|| AgentError::FileNotFound {
                file: located.file_name.clone(),
            })?;

        let content = std::fs::read_to_string(&path).map_err(|_| AgentError::FileNotFound {
            file: located.file_name.clone(),
        })?;

        tracing::debug!(path = %path.display(), chars = content.len(), "loaded implicated file");

        Ok(StateDelta {
            context_text: Some(content),
            ..Default::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Generate

const GENERATE_SYSTEM_PROMPT: &str = "You are an expert Python developer fixing a bug in a \
project. You are given a source file and an error that occurred during test execution. Your \
task is to write a minimal and correct unified diff (git diff format) that fixes the root \
cause of the issue, not the test file itself. Do not silence or bypass the error unless it \
leads to a correct fix. You must keep all other behavior unchanged and modify only what is \
needed to resolve the specific bug. Do not patch unrelated code. Output only the diff.";

/// Generate one or more candidate patches.
///
/// Calls are issued sequentially with a fixed inter-call delay to respect
/// provider rate limits; the resulting candidates keep generation order.
pub struct GenerateStage {
    provider: Arc<dyn ModelProvider>,
    count: usize,
    delay: Duration,
}

impl GenerateStage {
    pub fn new(provider: Arc<dyn ModelProvider>, count: usize, delay: Duration) -> Self {
        Self {
            provider,
            count,
            delay,
        }
    }

    fn user_prompt(state: &PipelineState, located: &LocatedFile, context: &str) -> String {
        format!(
            "The following error occurred when running the test suite:\n\n\
             {}\n\n\
             Suspected location: {} ({})\n\n\
             Problem description:\n{}\n\n\
             This file appears to be the source of the issue. Below is its full content:\n\n\
             {}\n\n\
             Write a minimal and correct unified diff (git diff format) that resolves the \
             error. The fix must change only the logic directly responsible for the failure. \
             Do not comment out failing code or alter test files. Output only the diff.",
            state.error_text, located.file_name, located.explanation, state.problem_statement, context,
        )
    }
}

#[async_trait]
impl Stage for GenerateStage {
    fn name(&self) -> &'static str {
        "generate"
    }

    async fn run(&self, state: &PipelineState) -> Result<StateDelta, AgentError> {
        let located = state.located.as_ref().ok_or(AgentError::MissingInput {
            stage: "generate",
            field: "located",
        })?;
        let context = state.context_text.as_ref().ok_or(AgentError::MissingInput {
            stage: "generate",
            field: "context_text",
        })?;

        let user = Self::user_prompt(state, located, context);

        let mut candidates = Vec::with_capacity(self.count);
        for i in 0..self.count {
            if i > 0 {
                tokio::time::sleep(self.delay).await;
            }

            let request = CompletionRequest::new(GENERATE_SYSTEM_PROMPT, user.clone());
            let response = self
                .provider
                .complete(request)
                .await
                .map_err(llm_err(self.name()))?;

            tracing::info!(candidate = i + 1, total = self.count, "generated candidate patch");
            candidates.push(response.content);
        }

        Ok(StateDelta {
            candidates: Some(candidates),
            ..Default::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Select

const SELECT_SYSTEM_PROMPT: &str = "You are a senior software engineer. Your job is to evaluate \
several proposed patches (in unified git diff format) and select the best one. The best patch \
is the one that: (1) directly fixes the root cause of the error, (2) avoids silencing the \
error, and (3) changes as little code as necessary. Respond with a JSON object containing \
exactly one field: \"best\", the 1-based number of the best patch. Output only the JSON object.";

/// Expected selector response: the 1-based index of the winning candidate.
#[derive(Debug, Deserialize)]
struct ChosenCandidate {
    best: usize,
}

/// Pick the best candidate patch.
///
/// A single candidate is the result unmodified. With more, one model call
/// judges them side by side and returns an index, so the selected patch is
/// always one of the inputs verbatim; the model never gets a chance to
/// rewrite the text it is judging.
pub struct SelectStage {
    provider: Arc<dyn ModelProvider>,
}

impl SelectStage {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self { provider }
    }

    fn user_prompt(state: &PipelineState) -> String {
        let mut prompt = format!(
            "The original error was:\n\n{}\n\nHere are the proposed patches:\n",
            state.error_text
        );
        for (i, candidate) in state.candidates.iter().enumerate() {
            prompt.push_str(&format!("\n[PATCH {}]\n{}\n", i + 1, candidate));
        }
        prompt.push_str("\nWhich one is best? Answer with the JSON object only.");
        prompt
    }
}

#[async_trait]
impl Stage for SelectStage {
    fn name(&self) -> &'static str {
        "select"
    }

    async fn run(&self, state: &PipelineState) -> Result<StateDelta, AgentError> {
        if state.candidates.is_empty() {
            return Err(AgentError::MissingInput {
                stage: "select",
                field: "candidates",
            });
        }

        if state.candidates.len() == 1 {
            return Ok(StateDelta {
                selected: Some(state.candidates[0].clone()),
                ..Default::default()
            });
        }

        let request = CompletionRequest::new(SELECT_SYSTEM_PROMPT, Self::user_prompt(state));
        let response = self
            .provider
            .complete(request)
            .await
            .map_err(llm_err(self.name()))?;

        let chosen: ChosenCandidate =
            parse_structured(&response.content).into_stage_result(self.name())?;

        if chosen.best == 0 || chosen.best > state.candidates.len() {
            return Err(AgentError::SchemaViolation {
                stage: "select",
                reason: format!(
                    "index {} out of range for {} candidates",
                    chosen.best,
                    state.candidates.len()
                ),
            });
        }

        tracing::info!(best = chosen.best, "select stage chose candidate");

        Ok(StateDelta {
            selected: Some(state.candidates[chosen.best - 1].clone()),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{CompletionResponse, FinishReason};
    use std::sync::Mutex;

    /// Provider that replays scripted responses in order.
    struct ScriptedProvider {
        responses: Mutex<Vec<Result<String, LlmError>>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
            })
        }
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            let next = self
                .responses
                .lock()
                .unwrap()
                .remove(0);
            next.map(|content| CompletionResponse {
                content,
                input_tokens: 0,
                output_tokens: 0,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    fn state_with_candidates(candidates: Vec<&str>) -> PipelineState {
        let mut state = PipelineState::new(
            "a/b",
            PathBuf::from("/tmp/a_b"),
            "problem",
            "error",
        );
        state.candidates = candidates.into_iter().map(str::to_string).collect();
        state
    }

    #[tokio::test]
    async fn select_single_candidate_is_identity() {
        let provider = ScriptedProvider::new(vec![]);
        let stage = SelectStage::new(provider);
        let state = state_with_candidates(vec!["only diff"]);

        let delta = stage.run(&state).await.unwrap();
        assert_eq!(delta.selected.as_deref(), Some("only diff"));
    }

    #[tokio::test]
    async fn select_returns_an_input_verbatim() {
        let provider = ScriptedProvider::new(vec![Ok(r#"{"best": 2}"#.to_string())]);
        let stage = SelectStage::new(provider);
        let state = state_with_candidates(vec!["diff 1", "diff 2", "diff 3"]);

        let delta = stage.run(&state).await.unwrap();
        assert_eq!(delta.selected.as_deref(), Some("diff 2"));
    }

    #[tokio::test]
    async fn select_rejects_out_of_range_index() {
        let provider = ScriptedProvider::new(vec![Ok(r#"{"best": 4}"#.to_string())]);
        let stage = SelectStage::new(provider);
        let state = state_with_candidates(vec!["diff 1", "diff 2", "diff 3"]);

        let err = stage.run(&state).await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::SchemaViolation { stage: "select", .. }
        ));
    }

    #[tokio::test]
    async fn select_with_no_candidates_is_missing_input() {
        let provider = ScriptedProvider::new(vec![]);
        let stage = SelectStage::new(provider);
        let state = state_with_candidates(vec![]);

        let err = stage.run(&state).await.unwrap_err();
        assert!(matches!(err, AgentError::MissingInput { .. }));
    }

    #[tokio::test]
    async fn locate_parses_schema_constrained_output() {
        let provider = ScriptedProvider::new(vec![Ok(
            r#"{"file_name": "modelchain.py", "suspected_line": "x = y[0]", "explanation": "bad index"}"#
                .to_string(),
        )]);
        let stage = LocateStage::new(provider);
        let state = state_with_candidates(vec![]);

        let delta = stage.run(&state).await.unwrap();
        let located = delta.located.unwrap();
        assert_eq!(located.file_name, "modelchain.py");
    }

    #[tokio::test]
    async fn locate_malformed_output_is_schema_violation() {
        let provider =
            ScriptedProvider::new(vec![Ok("the file is probably modelchain.py".to_string())]);
        let stage = LocateStage::new(provider);
        let state = state_with_candidates(vec![]);

        let err = stage.run(&state).await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::SchemaViolation { stage: "locate", .. }
        ));
    }

    #[tokio::test]
    async fn locate_provider_failure_propagates() {
        let provider = ScriptedProvider::new(vec![Err(LlmError::RateLimited {
            provider: "scripted".to_string(),
            retry_after: None,
        })]);
        let stage = LocateStage::new(provider);
        let state = state_with_candidates(vec![]);

        let err = stage.run(&state).await.unwrap_err();
        assert!(matches!(err, AgentError::Llm { stage: "locate", .. }));
    }

    #[tokio::test]
    async fn generate_produces_ordered_candidates() {
        let provider = ScriptedProvider::new(vec![
            Ok("diff one".to_string()),
            Ok("diff two".to_string()),
        ]);
        let stage = GenerateStage::new(provider, 2, Duration::ZERO);

        let mut state = state_with_candidates(vec![]);
        state.located = Some(LocatedFile {
            file_name: "mod.py".to_string(),
            suspected_line: "x = y[0]".to_string(),
            explanation: "index error".to_string(),
        });
        state.context_text = Some("def foo(): ...".to_string());

        let delta = stage.run(&state).await.unwrap();
        assert_eq!(
            delta.candidates,
            Some(vec!["diff one".to_string(), "diff two".to_string()])
        );
    }

    #[tokio::test]
    async fn generate_without_context_is_missing_input() {
        let provider = ScriptedProvider::new(vec![]);
        let stage = GenerateStage::new(provider, 1, Duration::ZERO);

        let mut state = state_with_candidates(vec![]);
        state.located = Some(LocatedFile {
            file_name: "mod.py".to_string(),
            suspected_line: "x".to_string(),
            explanation: "e".to_string(),
        });

        let err = stage.run(&state).await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::MissingInput {
                stage: "generate",
                field: "context_text",
            }
        ));
    }

    #[test]
    fn load_resolves_conventional_layout_first() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src").join("pkg");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("mod.py"), "CONVENTIONAL").unwrap();
        std::fs::create_dir_all(dir.path().join("other")).unwrap();
        std::fs::write(dir.path().join("other").join("mod.py"), "OTHER").unwrap();

        let path = LoadStage::resolve("owner/pkg", dir.path(), "mod.py").unwrap();
        assert!(path.ends_with("src/pkg/mod.py"));
    }

    #[test]
    fn load_falls_back_to_repo_wide_search() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("lib").join("deep");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("helpers.py"), "FOUND").unwrap();

        let path = LoadStage::resolve("owner/pkg", dir.path(), "helpers.py").unwrap();
        assert!(path.ends_with("lib/deep/helpers.py"));
    }

    #[test]
    fn load_strips_directories_from_model_supplied_name() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src").join("pkg");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("mod.py"), "X").unwrap();

        // Models often answer with a path; only the base name is trusted.
        let path = LoadStage::resolve("owner/pkg", dir.path(), "some/where/mod.py").unwrap();
        assert!(path.ends_with("src/pkg/mod.py"));
    }
}
