//! Investment Research Agent
//!
//! An autonomous research agent for a single stock ticker that:
//! - Plans a short research run from the ticker, user context and past learnings
//! - Executes each step with one of five tools (data fetch, knowledge graph,
//!   specialist routing, news pipeline, evaluator-optimizer)
//! - Reflects on the run and appends what it learned to persistent memory
//!
//! AGENT LOOP:
//! PLAN → EXECUTE → REFLECT → LEARN

pub mod agent;
pub mod api;
pub mod bootstrap;
pub mod config;
pub mod content;
pub mod error;
pub mod execution;
pub mod fetch;
pub mod graph;
pub mod memory;
pub mod models;
pub mod optimizer;
pub mod pipeline;
pub mod planner;
pub mod routing;
pub mod tools;

pub use error::{OrchestrationError, Result};

// Re-export common types
pub use agent::{OrchestratorSettings, ResearchOrchestrator};
pub use config::AgentConfig;
pub use models::*;
