//! Multi-stage repair agent.
//!
//! A fixed pipeline of model-backed stages over an explicit state value:
//! locate the implicated file, load it, generate candidate patches, select
//! the best one.

mod pipeline;
mod stages;
mod state;

pub use pipeline::AgentPipeline;
pub use stages::{GenerateStage, LoadStage, LocateStage, SelectStage, Stage};
pub use state::{LocatedFile, PipelineState, StateDelta};
