//! Test execution and failure location.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::error::SandboxError;
use crate::sandbox::{ExecResult, Sandbox};

/// Where a test failure appears to originate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureLocation {
    pub file_path: String,
    pub line_number: u32,
}

/// Build the in-sandbox test command for a repository at `repo_workdir`.
///
/// The repository source root (and its `src/` subdirectory, if the project
/// uses that layout) is prepended to `PYTHONPATH` so an uninstalled package
/// can still be imported by its own test suite.
pub fn test_command(repo_workdir: &str, test_cmd: &str) -> String {
    format!(
        "cd {repo_workdir} && \
         export PYTHONPATH=\"{repo_workdir}:{repo_workdir}/src:$PYTHONPATH\" && \
         {test_cmd}"
    )
}

/// Run the project's test suite inside the sandbox.
///
/// A non-zero exit is expected and informative: the captured output is the
/// very signal the pipeline needs. Only exec-level failures are errors.
pub async fn run_tests(
    sandbox: &Sandbox,
    repo_workdir: &str,
    test_cmd: &str,
    timeout: Duration,
) -> Result<ExecResult, SandboxError> {
    let command = test_command(repo_workdir, test_cmd);
    tracing::info!(workdir = repo_workdir, "running test suite");
    let result = sandbox.exec(&command, None, timeout).await?;
    tracing::info!(exit_code = result.exit_code, "test suite finished");
    Ok(result)
}

fn failure_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)file "([^"]+)", line (\d+)"#).expect("failure pattern compiles")
    })
}

/// Scan test output for the first `File "<path>", line <n>` occurrence.
///
/// This is a best-effort heuristic, not a root-cause locator: in a deep
/// traceback the first matching frame is often the test file rather than
/// the source frame under test. The match order is deliberately first-wins
/// and must not be changed without product input.
pub fn locate_failure(output: &str) -> Option<FailureLocation> {
    for line in output.lines() {
        if let Some(caps) = failure_pattern().captures(line) {
            let file_path = caps[1].to_string();
            let line_number = caps[2].parse().ok()?;
            return Some(FailureLocation {
                file_path,
                line_number,
            });
        }
    }
    None
}
