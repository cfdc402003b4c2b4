//! Per-entry error boundary tests for the batch runner.
//!
//! A failed entry must never abort the batch or drop its record: the
//! predictions document always carries one record per input entry, in input
//! order, with an empty patch marking the failure point.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use repairbench::config::{AgentConfig, Config, LlmConfig, RunnerConfig, SandboxConfig, SandboxLifetime};
use repairbench::dataset::BenchmarkEntry;
use repairbench::error::LlmError;
use repairbench::llm::{CompletionRequest, CompletionResponse, FinishReason, ModelProvider};
use repairbench::runner::Runner;

struct UnreachableProvider;

#[async_trait]
impl ModelProvider for UnreachableProvider {
    fn model_name(&self) -> &str {
        "test-model"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        unreachable!("entries fail before any model call");
    }
}

fn test_config(base: &std::path::Path) -> Config {
    Config {
        llm: LlmConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            model: "test-model".to_string(),
            api_key: None,
            temperature: 0.2,
            max_tokens: 64,
            timeout: Duration::from_secs(5),
        },
        sandbox: SandboxConfig {
            image: "python:3.9-slim".to_string(),
            workspace_dir: base.join("workspace"),
            container_workdir: "/workspace".to_string(),
            shared_volume: "repairbench_test".to_string(),
            exec_timeout: Duration::from_secs(5),
            lifetime: SandboxLifetime::Ephemeral,
        },
        agent: AgentConfig {
            candidates: 1,
            candidate_delay: Duration::ZERO,
        },
        runner: RunnerConfig {
            repos_dir: base.join("repos"),
            test_command: "pytest -q".to_string(),
            context_radius: 50,
        },
    }
}

/// Entry whose repository can never be cloned (invalid remote key), so the
/// entry fails at materialization.
fn doomed_entry(n: usize) -> BenchmarkEntry {
    serde_json::from_value(serde_json::json!({
        "instance_id": format!("doomed-{n}"),
        "repo": "no such repo !",
        "base_commit": "0000000000000000000000000000000000000000",
        "problem_statement": "unreachable",
        "test_patch": "diff --git a/x b/x",
    }))
    .unwrap()
}

#[tokio::test]
async fn failed_entries_still_yield_records_in_order() {
    // Never let a misconfigured fixture URL fall through to a credential
    // prompt in CI.
    std::env::set_var("GIT_TERMINAL_PROMPT", "0");

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("predictions.json");

    let entries: Vec<BenchmarkEntry> = (1..=3).map(doomed_entry).collect();
    let runner = Runner::new(test_config(dir.path()), Arc::new(UnreachableProvider));

    runner.run_batch(&entries, &output).await.unwrap();

    let text = std::fs::read_to_string(&output).unwrap();
    let records: Vec<serde_json::Value> = serde_json::from_str(&text).unwrap();

    assert_eq!(records.len(), 3, "one record per entry, failures included");
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record["instance_id"], format!("doomed-{}", i + 1));
        assert_eq!(record["model_name_or_path"], "test-model");
        assert_eq!(record["model_patch"], "", "failed entry records an empty patch");
    }
}

#[tokio::test]
async fn output_document_is_written_once_per_batch() {
    std::env::set_var("GIT_TERMINAL_PROMPT", "0");

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("predictions.json");

    let runner = Runner::new(test_config(dir.path()), Arc::new(UnreachableProvider));
    runner.run_batch(&[doomed_entry(1)], &output).await.unwrap();

    assert!(output.exists());
    let first_len = std::fs::metadata(&output).unwrap().len();
    assert!(first_len > 0);

    // A second batch overwrites rather than appends.
    runner.run_batch(&[doomed_entry(1)], &output).await.unwrap();
    assert_eq!(std::fs::metadata(&output).unwrap().len(), first_len);
}
