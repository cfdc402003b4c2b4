//! Batch runner: per-entry orchestration and the per-entry error boundary.
//!
//! Entries are processed strictly sequentially. Each entry gets a fresh
//! sandbox that is torn down (or intentionally left alive in setup-only
//! mode) before the next entry begins. Every error class is caught at the
//! entry boundary: a failed entry still yields a result record, with an
//! empty patch marking the failure point, and the batch continues.

use std::path::Path;
use std::sync::Arc;

use crate::agent::{AgentPipeline, PipelineState};
use crate::config::Config;
use crate::context;
use crate::dataset::BenchmarkEntry;
use crate::error::{Error, Result};
use crate::llm::ModelProvider;
use crate::patch;
use crate::repo::{self, WorkingRepository};
use crate::results::ResultRecorder;
use crate::sandbox::{install_plan, run_install_plan, Sandbox};
use crate::testrun;

/// Drives benchmark entries through the full pipeline.
pub struct Runner {
    config: Config,
    provider: Arc<dyn ModelProvider>,
    pipeline: AgentPipeline,
}

impl Runner {
    pub fn new(config: Config, provider: Arc<dyn ModelProvider>) -> Self {
        let pipeline = AgentPipeline::standard(provider.clone(), &config.agent);
        Self {
            config,
            provider,
            pipeline,
        }
    }

    /// Process a batch of entries and write the predictions document.
    ///
    /// No partial-entry result is dropped: every entry produces a record,
    /// failed entries with an empty patch field.
    pub async fn run_batch(&self, entries: &[BenchmarkEntry], output: &Path) -> Result<()> {
        let mut recorder = ResultRecorder::new();
        let model_id = self.provider.model_name().to_string();

        for (i, entry) in entries.iter().enumerate() {
            tracing::info!(
                instance = %entry.instance_id,
                repo = %entry.repo,
                progress = %format!("{}/{}", i + 1, entries.len()),
                "processing entry"
            );

            let patch_text = match self.process_entry(entry).await {
                Ok(patch_text) => patch_text,
                Err(e) => {
                    tracing::error!(
                        instance = %entry.instance_id,
                        repo = %entry.repo,
                        commit = %entry.base_commit,
                        error = %e,
                        "entry failed, recording empty patch"
                    );
                    String::new()
                }
            };

            recorder.record(&entry.instance_id, &model_id, &patch_text);
        }

        recorder.flush(output)?;
        Ok(())
    }

    /// Run one entry end to end, returning the selected candidate patch.
    ///
    /// The sandbox teardown attempt runs on every exit path, including
    /// stage failure; teardown itself never fails the entry.
    pub async fn process_entry(&self, entry: &BenchmarkEntry) -> Result<String> {
        let repo = repo::materialize(
            &entry.repo,
            &entry.base_commit,
            &self.config.runner.repos_dir,
        )
        .await?;

        let mut sandbox = Sandbox::launch(&self.config.sandbox).await?;
        let result = self.run_entry_inner(&sandbox, entry, &repo).await;
        sandbox.teardown().await;
        result
    }

    async fn run_entry_inner(
        &self,
        sandbox: &Sandbox,
        entry: &BenchmarkEntry,
        repo: &WorkingRepository,
    ) -> Result<String> {
        let repo_workdir = self.repo_workdir(repo);
        let timeout = self.config.sandbox.exec_timeout;

        let report = run_install_plan(sandbox, &install_plan(&repo_workdir), timeout).await?;
        if !report.all_succeeded() {
            tracing::warn!(
                failed = ?report.failed_optional,
                "optional install steps failed, continuing"
            );
        }

        // The working tree is bind-mounted, so the test patch is applied on
        // the host side and the sandbox sees the mutated tree.
        let applied = patch::apply_patch(&repo.path, &entry.test_patch).await?;
        if !applied {
            tracing::error!(
                instance = %entry.instance_id,
                repo = %entry.repo,
                commit = %entry.base_commit,
                "test patch could not be validated against the tree, skipping entry"
            );
            return Ok(String::new());
        }

        let test_result = testrun::run_tests(
            sandbox,
            &repo_workdir,
            &self.config.runner.test_command,
            timeout,
        )
        .await?;

        if test_result.success() {
            tracing::warn!(
                instance = %entry.instance_id,
                "test suite passed after test patch; no failure signal to repair"
            );
        }

        let error_text = self.failure_context(entry, repo, &test_result.combined_output());

        let state = PipelineState::new(
            entry.repo.clone(),
            repo.path.clone(),
            entry.problem_statement.clone(),
            error_text,
        );

        let finished = self.pipeline.run(state).await.map_err(Error::Agent)?;

        Ok(finished
            .selected
            .or_else(|| finished.candidates.into_iter().next_back())
            .unwrap_or_default())
    }

    /// Environment bring-up only: install the repository and its
    /// dependencies, then leave the sandbox alive for later invocations.
    /// This is a distinct terminal state from the full pipeline run.
    pub async fn setup_entry(&self, entry: &BenchmarkEntry) -> Result<()> {
        let repo = repo::materialize(
            &entry.repo,
            &entry.base_commit,
            &self.config.runner.repos_dir,
        )
        .await?;

        let mut sandbox_config = self.config.sandbox.clone();
        sandbox_config.lifetime = crate::config::SandboxLifetime::Persistent;

        let mut sandbox = Sandbox::launch(&sandbox_config).await?;
        let repo_workdir = self.repo_workdir(&repo);
        let result = run_install_plan(
            &sandbox,
            &install_plan(&repo_workdir),
            self.config.sandbox.exec_timeout,
        )
        .await;

        // Persistent lifetime: teardown logs and leaves the container alive.
        sandbox.teardown().await;

        let report = result?;
        tracing::info!(
            container = %sandbox.container_id(),
            failed_optional = ?report.failed_optional,
            "setup-only run complete, sandbox left alive"
        );
        Ok(())
    }

    /// In-container path of the entry's working tree.
    fn repo_workdir(&self, repo: &WorkingRepository) -> String {
        format!(
            "{}/{}",
            self.config.sandbox.container_workdir.trim_end_matches('/'),
            repo::repo_dir_name(&repo.repo_id)
        )
    }

    /// Assemble the pipeline's error text: the raw test output, a
    /// line-radius excerpt around the first located failure frame when the
    /// heuristic finds one, and any relevant-file context shipped with the
    /// entry itself.
    fn failure_context(
        &self,
        entry: &BenchmarkEntry,
        repo: &WorkingRepository,
        test_output: &str,
    ) -> String {
        let mut error_text = context_budgeted(test_output);

        if let Some(location) = testrun::locate_failure(test_output) {
            let window = context::extract_window(
                &repo.path,
                &location.file_path,
                location.line_number,
                self.config.runner.context_radius,
            );
            if !window.is_empty() {
                error_text.push_str(&format!(
                    "\n\nExcerpt around {} line {}:\n{}",
                    location.file_path, location.line_number, window
                ));
            }
        }

        // Only entries that name their relevant files get the file-list
        // context; running the recursive-scan fallback for every entry
        // would inline half the repository into each prompt.
        if !entry.relevant_files.is_empty() {
            let listed = context::extract_for_files(
                &repo.path,
                &entry.relevant_files,
                entry.hints_text.as_deref(),
            );
            if !listed.is_empty() {
                error_text.push_str("\n\nRelevant files supplied with the task:\n");
                error_text.push_str(&listed);
            }
        } else if let Some(hints) = entry.hints_text.as_deref() {
            if !hints.trim().is_empty() {
                error_text.push_str("\n\nHints supplied with the task:\n");
                error_text.push_str(hints.trim());
            }
        }

        error_text
    }
}

/// Clamp raw test output to the context budget so a pathological test log
/// cannot blow up the prompt.
fn context_budgeted(output: &str) -> String {
    let cut = crate::util::floor_char_boundary(output, context::MAX_CONTEXT_CHARS);
    output[..cut].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_budgeted_clamps_huge_output() {
        let huge = "y".repeat(context::MAX_CONTEXT_CHARS * 3);
        assert_eq!(context_budgeted(&huge).len(), context::MAX_CONTEXT_CHARS);
        assert_eq!(context_budgeted("short"), "short");
    }
}
