//! Harness for evaluating LLM code-repair agents against a benchmark of
//! real-world software bugs.
//!
//! Per benchmark entry: materialize the target repository at its commit,
//! bring up an isolated sandbox, apply the failure-reproducing test patch,
//! run the test suite, feed the failure context through a multi-stage model
//! pipeline, and record the candidate patch for downstream scoring.

pub mod agent;
pub mod config;
pub mod context;
pub mod dataset;
pub mod error;
pub mod llm;
pub mod patch;
pub mod repo;
pub mod results;
pub mod runner;
pub mod sandbox;
pub mod testrun;
pub mod util;

pub use error::{Error, Result};
