//! Agent pipeline driver.

use std::sync::Arc;

use crate::agent::stages::{GenerateStage, LoadStage, LocateStage, SelectStage, Stage};
use crate::agent::state::PipelineState;
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::llm::ModelProvider;

/// A directed sequence of stages sharing state through merged deltas.
///
/// Stages execute in fixed topological order; each blocks until its model
/// or filesystem work completes, so no stage ever observes a partially
/// updated state. There is no automatic retry: a stage failure aborts the
/// run and surfaces at the per-entry boundary.
pub struct AgentPipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl AgentPipeline {
    /// The standard four-stage pipeline: locate → load → generate → select.
    pub fn standard(provider: Arc<dyn ModelProvider>, config: &AgentConfig) -> Self {
        Self {
            stages: vec![
                Box::new(LocateStage::new(provider.clone())),
                Box::new(LoadStage),
                Box::new(GenerateStage::new(
                    provider.clone(),
                    config.candidates,
                    config.candidate_delay,
                )),
                Box::new(SelectStage::new(provider)),
            ],
        }
    }

    /// Build a pipeline from an explicit stage list (used by tests).
    pub fn from_stages(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// Run all stages to completion, threading the state by value.
    pub async fn run(&self, mut state: PipelineState) -> Result<PipelineState, AgentError> {
        for stage in &self.stages {
            tracing::debug!(stage = stage.name(), "running pipeline stage");
            let delta = stage.run(&state).await?;
            state = state.apply(delta);
        }
        Ok(state)
    }
}
