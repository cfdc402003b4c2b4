//! Sandbox environment bring-up.
//!
//! Dependency installation is an explicit ordered list of steps, each marked
//! required or optional. A required step that fails aborts the chain with
//! [`SandboxError::Setup`]; optional failures are collected into the
//! aggregate report so the caller sees exactly which ones were skipped
//! instead of the failures disappearing into the log.

use std::time::Duration;

use crate::error::SandboxError;
use crate::sandbox::Sandbox;

/// One step of the environment bring-up chain.
#[derive(Debug, Clone)]
pub struct InstallStep {
    pub name: String,
    pub command: String,
    pub required: bool,
}

impl InstallStep {
    pub fn required(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            required: false,
        }
    }
}

/// Aggregate outcome of an install chain.
#[derive(Debug, Default)]
pub struct InstallReport {
    /// Names of optional steps that exited non-zero.
    pub failed_optional: Vec<String>,
}

impl InstallReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed_optional.is_empty()
    }
}

/// Default bring-up plan for a Python benchmark repository checked out at
/// `repo_workdir` (an in-container path).
///
/// Only the system-package step and the package install itself are
/// mandatory; requirement files frequently do not exist in older commits
/// and their absence must not abort the entry.
pub fn install_plan(repo_workdir: &str) -> Vec<InstallStep> {
    vec![
        InstallStep::required(
            "system-packages",
            "apt-get update && \
             DEBIAN_FRONTEND=noninteractive apt-get install -y --no-install-recommends \
             git build-essential libssl-dev python3-dev python3-pip && \
             pip install --upgrade pip pytest",
        ),
        InstallStep::required(
            "install-package",
            format!(
                "cd {repo_workdir} && pip install simplejson pytz python-dateutil && pip install ."
            ),
        ),
        InstallStep::optional(
            "install-requirements",
            format!("cd {repo_workdir} && pip install -r requirements.txt && pip install hypothesis"),
        ),
        InstallStep::optional(
            "install-dev-requirements",
            format!("cd {repo_workdir} && pip install -r requirements-dev.txt"),
        ),
    ]
}

/// Run an install chain inside the sandbox.
pub async fn run_install_plan(
    sandbox: &Sandbox,
    steps: &[InstallStep],
    timeout: Duration,
) -> Result<InstallReport, SandboxError> {
    let mut report = InstallReport::default();

    for step in steps {
        tracing::info!(step = %step.name, required = step.required, "running install step");
        let result = sandbox.exec(&step.command, None, timeout).await?;

        if result.success() {
            continue;
        }

        if step.required {
            return Err(SandboxError::Setup {
                step: step.name.clone(),
                reason: format!(
                    "exit {}: {}",
                    result.exit_code,
                    result.stderr.trim().chars().take(500).collect::<String>()
                ),
            });
        }

        tracing::warn!(
            step = %step.name,
            exit_code = result.exit_code,
            "optional install step failed, continuing"
        );
        report.failed_optional.push(step.name.clone());
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_plan_marks_requirements_optional() {
        let plan = install_plan("/workspace/pvlib_pvlib-python");
        assert_eq!(plan.len(), 4);
        assert!(plan[0].required, "system packages are mandatory");
        assert!(plan[1].required, "package install is mandatory");
        assert!(!plan[2].required, "requirements.txt is best-effort");
        assert!(!plan[3].required, "dev requirements are best-effort");
    }

    #[test]
    fn default_plan_installs_into_repo_workdir() {
        let plan = install_plan("/workspace/a_b");
        assert!(plan[1].command.contains("cd /workspace/a_b"));
        assert!(plan[1].command.contains("pip install ."));
    }

    #[test]
    fn empty_report_means_all_succeeded() {
        assert!(InstallReport::default().all_succeeded());

        let report = InstallReport {
            failed_optional: vec!["install-requirements".to_string()],
        };
        assert!(!report.all_succeeded());
    }
}
