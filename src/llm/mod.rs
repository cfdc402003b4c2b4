//! Model provider integration.
//!
//! A single backend: any endpoint speaking the OpenAI Chat Completions API.
//! The provider sits behind the [`ModelProvider`] trait so the agent
//! pipeline can be exercised against a mock in tests.

mod openai_compatible;
mod provider;

pub use openai_compatible::OpenAiCompatibleProvider;
pub use provider::{
    parse_structured, CompletionRequest, CompletionResponse, FinishReason, ModelProvider,
    StructuredOutput,
};

use std::sync::Arc;

use crate::config::LlmConfig;
use crate::error::LlmError;

/// Create a model provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn ModelProvider>, LlmError> {
    tracing::info!(base_url = %config.base_url, model = %config.model, "using OpenAI-compatible endpoint");
    Ok(Arc::new(OpenAiCompatibleProvider::new(config.clone())?))
}
