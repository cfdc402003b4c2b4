//! Container sandbox for running untrusted build and test commands.
//!
//! Backed by the local Docker (or Podman) daemon via bollard. Each sandbox
//! is one long-lived container started with `sleep infinity`; commands are
//! exec'd into it through `bash -lc` so multi-statement shell strings chained
//! with `&&` behave as a single logical step. The host workspace directory is
//! bind-mounted at a fixed in-container path, so working trees materialized
//! on the host are visible inside.
//!
//! Teardown is best-effort by contract: a failed or already-removed
//! container is not an error for the caller. Cleanup runs on every exit path
//! of the runner; failures are logged and swallowed, never propagated.

mod install;

pub use install::{install_plan, run_install_plan, InstallReport, InstallStep};

use std::time::Duration;

use bollard::container::{
    Config as ContainerConfig, LogOutput, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::HostConfig;
use bollard::volume::CreateVolumeOptions;
use bollard::Docker;
use futures::StreamExt;

use crate::config::{SandboxConfig, SandboxLifetime};
use crate::error::SandboxError;

/// Outcome of one exec'd command: the atomic unit every sandboxed step
/// produces. Exit code 0 is the sole success signal.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Combined output, stdout first. Test failure parsing wants both
    /// streams since pytest and the interpreter disagree on where
    /// tracebacks go.
    pub fn combined_output(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

/// A running sandbox container.
pub struct Sandbox {
    docker: Docker,
    container_id: String,
    lifetime: SandboxLifetime,
    torn_down: bool,
}

impl Sandbox {
    /// Launch a sandbox from the configured image.
    ///
    /// Creates the shared volume if missing, then creates and starts a
    /// container with the workspace bind mount.
    pub async fn launch(config: &SandboxConfig) -> Result<Self, SandboxError> {
        let docker = connect_docker().await?;

        // Idempotent: creating an existing volume with the same driver is a no-op.
        docker
            .create_volume(CreateVolumeOptions {
                name: config.shared_volume.clone(),
                ..Default::default()
            })
            .await
            .map_err(|e| SandboxError::Launch {
                image: config.image.clone(),
                reason: format!("volume creation failed: {e}"),
            })?;

        std::fs::create_dir_all(&config.workspace_dir).map_err(|e| SandboxError::Launch {
            image: config.image.clone(),
            reason: format!("workspace dir creation failed: {e}"),
        })?;

        let binds = vec![
            format!(
                "{}:{}",
                config.workspace_dir.to_string_lossy(),
                config.container_workdir
            ),
            format!("{}:/mnt/shared", config.shared_volume),
        ];

        let container_config = ContainerConfig {
            image: Some(config.image.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            working_dir: Some(config.container_workdir.clone()),
            tty: Some(true),
            host_config: Some(HostConfig {
                binds: Some(binds),
                ..Default::default()
            }),
            ..Default::default()
        };

        tracing::info!(image = %config.image, "launching sandbox container");

        let created = docker
            .create_container::<String, String>(None, container_config)
            .await
            .map_err(|e| SandboxError::Launch {
                image: config.image.clone(),
                reason: e.to_string(),
            })?;

        docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::Launch {
                image: config.image.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!(container_id = %created.id, "sandbox container started");

        Ok(Self {
            docker,
            container_id: created.id,
            lifetime: config.lifetime,
            torn_down: false,
        })
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn lifetime(&self) -> SandboxLifetime {
        self.lifetime
    }

    /// Execute a shell command inside the sandbox.
    ///
    /// The command runs through `bash -lc`, stdout and stderr are captured
    /// as independent streams, and the whole exec is bounded by `timeout`.
    pub async fn exec(
        &self,
        command: &str,
        workdir: Option<&str>,
        timeout: Duration,
    ) -> Result<ExecResult, SandboxError> {
        let exec = self
            .docker
            .create_exec(
                &self.container_id,
                CreateExecOptions {
                    cmd: Some(vec!["bash".to_string(), "-lc".to_string(), command.to_string()]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir: workdir.map(str::to_string),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| SandboxError::Exec {
                reason: format!("create_exec: {e}"),
            })?;

        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| SandboxError::Exec {
                reason: format!("start_exec: {e}"),
            })?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } = started {
            let drain = async {
                while let Some(chunk) = output.next().await {
                    match chunk {
                        Ok(LogOutput::StdOut { message }) => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(LogOutput::StdErr { message }) => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(_) => {}
                        Err(e) => {
                            return Err(SandboxError::Exec {
                                reason: format!("output stream: {e}"),
                            });
                        }
                    }
                }
                Ok(())
            };

            tokio::time::timeout(timeout, drain)
                .await
                .map_err(|_| SandboxError::Timeout { timeout })??;
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| SandboxError::Exec {
                reason: format!("inspect_exec: {e}"),
            })?;

        let exit_code = inspect.exit_code.unwrap_or(-1);
        tracing::debug!(exit_code, command, "sandbox exec finished");

        Ok(ExecResult {
            exit_code,
            stdout,
            stderr,
        })
    }

    /// Tear the sandbox down.
    ///
    /// Persistent sandboxes are intentionally left alive. For ephemeral ones
    /// the container is stopped and removed; every failure along the way is
    /// logged and swallowed.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if self.lifetime == SandboxLifetime::Persistent {
            tracing::info!(
                container_id = %self.container_id,
                "persistent sandbox left alive for later invocations"
            );
            return;
        }

        tracing::info!(container_id = %self.container_id, "tearing down sandbox");

        if let Err(e) = self
            .docker
            .stop_container(&self.container_id, Some(StopContainerOptions { t: 5 }))
            .await
        {
            tracing::warn!(container_id = %self.container_id, error = %e, "failed to stop sandbox container");
        }

        if let Err(e) = self
            .docker
            .remove_container(
                &self.container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            tracing::warn!(container_id = %self.container_id, error = %e, "failed to remove sandbox container");
        }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        // Async teardown cannot run here. The runner calls teardown() on
        // every exit path; this catches the paths it cannot.
        if !self.torn_down && self.lifetime == SandboxLifetime::Ephemeral {
            tracing::warn!(
                container_id = %self.container_id,
                "ephemeral sandbox dropped without teardown; container may be left running"
            );
        }
    }
}

/// Connect to the local container runtime and verify the daemon responds.
pub async fn connect_docker() -> Result<Docker, SandboxError> {
    let docker = Docker::connect_with_local_defaults()
        .map_err(|e| SandboxError::Connect(e.to_string()))?;
    docker
        .ping()
        .await
        .map_err(|e| SandboxError::Connect(format!("daemon not responding: {e}")))?;
    Ok(docker)
}
