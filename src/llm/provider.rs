//! Model provider trait and types.

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::LlmError;

/// Request for a completion: one system prompt, one user prompt.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// Create a new completion request.
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    /// Set temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set max tokens.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Response from a completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub finish_reason: FinishReason,
}

/// Why the completion finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Unknown,
}

/// Trait for model providers.
///
/// The provider is a black box: prompt in, text out. All failure modes are
/// expressed through [`LlmError`] and must be caught per benchmark entry so
/// a batch run continues past individual failures.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Get the model name.
    fn model_name(&self) -> &str;

    /// Complete a prompt.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

/// Outcome of parsing a schema-constrained model response.
///
/// Provider output is never trusted at runtime: it either parses into the
/// expected record or is tagged as a violation carrying the raw text for
/// diagnostics.
#[derive(Debug)]
pub enum StructuredOutput<T> {
    Valid(T),
    Violation { reason: String, raw: String },
}

impl<T> StructuredOutput<T> {
    /// Convert into a stage result, turning a violation into the stage's
    /// schema error.
    pub fn into_stage_result(
        self,
        stage: &'static str,
    ) -> Result<T, crate::error::AgentError> {
        match self {
            StructuredOutput::Valid(value) => Ok(value),
            StructuredOutput::Violation { reason, .. } => {
                Err(crate::error::AgentError::SchemaViolation { stage, reason })
            }
        }
    }
}

/// Parse raw model output into a typed record.
///
/// Tolerates code fences and prose around the JSON object (the first `{` to
/// the last `}` is taken as the payload), but the payload itself must
/// deserialize into `T` exactly.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> StructuredOutput<T> {
    let start = raw.find('{');
    let end = raw.rfind('}');

    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => {
            return StructuredOutput::Violation {
                reason: "no JSON object in response".to_string(),
                raw: raw.to_string(),
            };
        }
    };

    match serde_json::from_str::<T>(json) {
        Ok(value) => StructuredOutput::Valid(value),
        Err(e) => StructuredOutput::Violation {
            reason: e.to_string(),
            raw: raw.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Probe {
        name: String,
        value: u32,
    }

    #[test]
    fn parses_bare_json_object() {
        let output = parse_structured::<Probe>(r#"{"name": "x", "value": 3}"#);
        match output {
            StructuredOutput::Valid(probe) => {
                assert_eq!(
                    probe,
                    Probe {
                        name: "x".to_string(),
                        value: 3
                    }
                );
            }
            StructuredOutput::Violation { reason, .. } => panic!("unexpected violation: {reason}"),
        }
    }

    #[test]
    fn parses_json_inside_code_fence() {
        let raw = "```json\n{\"name\": \"x\", \"value\": 3}\n```";
        assert!(matches!(
            parse_structured::<Probe>(raw),
            StructuredOutput::Valid(_)
        ));
    }

    #[test]
    fn parses_json_with_surrounding_prose() {
        let raw = "Here is the answer:\n{\"name\": \"x\", \"value\": 3}\nHope that helps.";
        assert!(matches!(
            parse_structured::<Probe>(raw),
            StructuredOutput::Valid(_)
        ));
    }

    #[test]
    fn missing_field_is_a_violation() {
        let output = parse_structured::<Probe>(r#"{"name": "x"}"#);
        match output {
            StructuredOutput::Violation { reason, raw } => {
                assert!(reason.contains("value"), "reason should name the field: {reason}");
                assert!(raw.contains("\"name\""), "raw text preserved for diagnostics");
            }
            StructuredOutput::Valid(_) => panic!("missing field must not parse"),
        }
    }

    #[test]
    fn no_json_at_all_is_a_violation() {
        assert!(matches!(
            parse_structured::<Probe>("I could not find the file."),
            StructuredOutput::Violation { .. }
        ));
    }

    #[test]
    fn violation_converts_to_schema_error() {
        let output = parse_structured::<Probe>("nope");
        let err = output.into_stage_result("locate").unwrap_err();
        assert!(matches!(
            err,
            crate::error::AgentError::SchemaViolation { stage: "locate", .. }
        ));
    }
}
