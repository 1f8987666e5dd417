//! Tool trait and registry
//!
//! One tool per capability. The orchestrator looks tools up by the
//! capability the planner assigned, never by step text.

use crate::fetch::FetchedData;
use crate::graph::{GraphSummary, KnowledgeGraph};
use crate::optimizer::OptimizationOutcome;
use crate::pipeline::NewsSummary;
use crate::planner::Capability;
use crate::routing::BatchItemResult;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub mod research;

pub use research::{DataFetchTool, EvaluatorOptimizerTool, KnowledgeGraphTool, PipelineTool, RoutingTool};

/// Everything a tool may read for one step.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub ticker: String,
    pub step: String,
    pub user_context: String,
    /// Documents fetched by earlier steps of the same run.
    pub documents: Vec<FetchedData>,
    /// Condensed view of earlier findings, used as analysis input.
    pub seed_data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolPayload {
    Fetched { documents: Vec<FetchedData> },
    Graph { graph: KnowledgeGraph, summary: GraphSummary },
    Routed { items: Vec<BatchItemResult> },
    News { summaries: Vec<NewsSummary> },
    Analysis { outcome: OptimizationOutcome },
}

#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// One line for the invocation record.
    pub summary: String,
    pub payload: ToolPayload,
}

#[async_trait]
pub trait ResearchTool: Send + Sync {
    fn name(&self) -> &'static str;
    fn capability(&self) -> Capability;
    async fn invoke(&self, call: &ToolCall) -> Result<ToolOutput>;
}

pub struct ToolRegistry {
    tools: HashMap<Capability, Arc<dyn ResearchTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Replaces any tool already registered for the same capability.
    pub fn register(&mut self, tool: Arc<dyn ResearchTool>) {
        self.tools.insert(tool.capability(), tool);
    }

    pub fn get(&self, capability: Capability) -> Option<Arc<dyn ResearchTool>> {
        self.tools.get(&capability).cloned()
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|c| self.tools.contains_key(c))
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
