//! Configuration for the repair harness.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Main configuration for the harness.
#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub sandbox: SandboxConfig,
    pub agent: AgentConfig,
    pub runner: RunnerConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Ok(Self {
            llm: LlmConfig::from_env()?,
            sandbox: SandboxConfig::from_env()?,
            agent: AgentConfig::from_env()?,
            runner: RunnerConfig::from_env()?,
        })
    }
}

/// Model provider configuration.
///
/// Targets any endpoint speaking the OpenAI Chat Completions API.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL of the provider (e.g. "https://api.openai.com").
    pub base_url: String,
    /// Model identifier sent with each request and recorded in the output.
    pub model: String,
    /// API key, if the endpoint requires one.
    pub api_key: Option<SecretString>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Local per-request timeout. The provider enforces its own timeout too,
    /// but a hung connection must not stall the batch indefinitely.
    pub timeout: Duration,
}

impl LlmConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let base_url = optional_env("LLM_BASE_URL")?
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        let model = optional_env("LLM_MODEL")?.unwrap_or_else(|| "gpt-4o".to_string());
        let api_key = optional_env("LLM_API_KEY")?.map(SecretString::from);
        let temperature = parse_optional_env("LLM_TEMPERATURE", 0.2)?;
        let max_tokens = parse_optional_env("LLM_MAX_TOKENS", 1500)?;
        let timeout = Duration::from_secs(parse_optional_env("LLM_TIMEOUT_SECS", 120)?);

        Ok(Self {
            base_url,
            model,
            api_key,
            temperature,
            max_tokens,
            timeout,
        })
    }
}

/// Sandbox lifetime policy.
///
/// `Ephemeral` sandboxes are torn down when their entry completes, on every
/// exit path. `Persistent` sandboxes are left alive after environment
/// bring-up so later invocations can reuse them (setup-only mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SandboxLifetime {
    #[default]
    Ephemeral,
    Persistent,
}

/// Container sandbox configuration.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Image to launch (must provide a POSIX shell).
    pub image: String,
    /// Host directory bind-mounted into the container as the workspace.
    pub workspace_dir: PathBuf,
    /// Fixed in-container workspace path the host directory is bound to.
    pub container_workdir: String,
    /// Named volume mounted at /mnt/shared for state shared across entries.
    pub shared_volume: String,
    /// Upper bound for a single exec'd command.
    pub exec_timeout: Duration,
    pub lifetime: SandboxLifetime,
}

impl SandboxConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let image = optional_env("SANDBOX_IMAGE")?
            .unwrap_or_else(|| "python:3.9-slim".to_string());
        let workspace_dir = optional_env("SANDBOX_WORKSPACE")?
            .map(PathBuf::from)
            .unwrap_or_else(default_workspace_dir);
        let container_workdir = optional_env("SANDBOX_CONTAINER_WORKDIR")?
            .unwrap_or_else(|| "/workspace".to_string());
        let shared_volume = optional_env("SANDBOX_SHARED_VOLUME")?
            .unwrap_or_else(|| "repairbench_shared".to_string());
        let exec_timeout =
            Duration::from_secs(parse_optional_env("SANDBOX_EXEC_TIMEOUT_SECS", 600)?);

        Ok(Self {
            image,
            workspace_dir,
            container_workdir,
            shared_volume,
            exec_timeout,
            lifetime: SandboxLifetime::Ephemeral,
        })
    }
}

/// Agent pipeline configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Number of candidate patches to generate per entry.
    pub candidates: usize,
    /// Delay between sequential generation calls, to stay under provider
    /// rate limits.
    pub candidate_delay: Duration,
}

impl AgentConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let candidates = parse_optional_env("AGENT_CANDIDATES", 3)?;
        if candidates == 0 {
            return Err(ConfigError::InvalidValue {
                key: "AGENT_CANDIDATES".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        let candidate_delay =
            Duration::from_secs(parse_optional_env("AGENT_CANDIDATE_DELAY_SECS", 10)?);

        Ok(Self {
            candidates,
            candidate_delay,
        })
    }
}

/// Batch runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Base directory for checked-out repositories. Placed under the sandbox
    /// workspace so working trees are visible inside the container.
    pub repos_dir: PathBuf,
    /// Test command executed inside the sandbox.
    pub test_command: String,
    /// Line radius for the failure-window context excerpt.
    pub context_radius: u32,
}

impl RunnerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let repos_dir = optional_env("RUNNER_REPOS_DIR")?
            .map(PathBuf::from)
            .unwrap_or_else(default_workspace_dir);
        let test_command =
            optional_env("RUNNER_TEST_COMMAND")?.unwrap_or_else(|| "pytest -q".to_string());
        let context_radius = parse_optional_env("RUNNER_CONTEXT_RADIUS", 50)?;

        Ok(Self {
            repos_dir,
            test_command,
            context_radius,
        })
    }
}

fn default_workspace_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".repairbench")
        .join("workspace")
}

pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::ParseError(format!(
            "failed to read {key}: {e}"
        ))),
    }
}

pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| {
            s.parse().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{e}"),
            })
        })
        .transpose()
        .map(|opt| opt.unwrap_or(default))
}
