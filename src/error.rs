//! Error types for the repair harness.

use std::time::Duration;

/// Top-level error type for the harness.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Version control error: {0}")]
    Vcs(#[from] VcsError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Patch error: {0}")]
    Patch(#[from] PatchError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Agent stage error: {0}")]
    Agent(#[from] AgentError),

    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Git clone/fetch/checkout failures. Fatal for the entry that hit them:
/// no context can be built without a valid working tree.
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("git {op} failed for {repo} (exit {code}): {stderr}")]
    CommandFailed {
        op: String,
        repo: String,
        code: i32,
        stderr: String,
    },

    #[error("Failed to spawn git for {repo}: {source}")]
    SpawnFailed {
        repo: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error preparing working copy for {repo}: {source}")]
    Io {
        repo: String,
        #[source]
        source: std::io::Error,
    },
}

/// Sandbox/container errors.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Failed to connect to container runtime: {0}")]
    Connect(String),

    #[error("Failed to launch sandbox from image {image}: {reason}")]
    Launch { image: String, reason: String },

    #[error("Exec failed in sandbox: {reason}")]
    Exec { reason: String },

    #[error("Command timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Environment setup failed at step {step}: {reason}")]
    Setup { step: String, reason: String },
}

/// Patch application I/O errors.
///
/// A patch that fails validation is not an error: `apply_patch` reports that
/// outcome as `Ok(false)`. These variants cover the cases where the applier
/// could not even attempt the apply.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("Failed to write scratch patch file: {0}")]
    Scratch(std::io::Error),

    #[error("Failed to spawn git apply: {0}")]
    Git(std::io::Error),
}

/// Model provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} request timed out")]
    Timeout { provider: String },

    #[error("Provider {provider} server error (HTTP {status})")]
    ServerError { provider: String, status: u16 },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Agent pipeline stage errors. Fatal to the entry's candidate generation;
/// caught at the batch boundary so the run proceeds to the next entry.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("LLM error in stage {stage}: {source}")]
    Llm {
        stage: &'static str,
        #[source]
        source: LlmError,
    },

    #[error("Stage {stage} produced output violating its schema: {reason}")]
    SchemaViolation { stage: &'static str, reason: String },

    #[error("Implicated file not found: {file}")]
    FileNotFound { file: String },

    #[error("Stage {stage} missing required input: {field}")]
    MissingInput {
        stage: &'static str,
        field: &'static str,
    },
}

/// Result recording/serialization errors.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("Failed to write output document: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize output document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for the harness.
pub type Result<T> = std::result::Result<T, Error>;
