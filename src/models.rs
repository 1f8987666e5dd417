//! Run-level data models for the research agent

use crate::fetch::FetchedData;
use crate::graph::{GraphSummary, KnowledgeGraph};
use crate::optimizer::{InvestmentAnalysis, OptimizationOutcome};
use crate::pipeline::NewsSummary;
use crate::planner::{Capability, ResearchPlan};
use crate::routing::BatchItemResult;
use crate::tools::ToolPayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

const SEED_DOCUMENT_CHARS: usize = 2000;

/// One tool call; never mutated after it is appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocationRecord {
    pub step_index: usize,
    pub tool: String,
    pub capability: Capability,
    pub input_summary: String,
    /// Short description of what the call produced.
    pub output_ref: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchReflection {
    pub completeness: f64,
    pub confidence: f64,
    pub data_quality: f64,
    pub strengths: Vec<String>,
    pub gaps: Vec<String>,
    pub recommendations: Vec<String>,
    /// False when the reflection was computed locally.
    pub from_content_service: bool,
}

/// Typed results gathered during Execute.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchFindings {
    pub documents: Vec<FetchedData>,
    pub graph: Option<KnowledgeGraph>,
    pub graph_summary: Option<GraphSummary>,
    pub routed: Vec<BatchItemResult>,
    pub news: Vec<NewsSummary>,
    pub analysis: Option<OptimizationOutcome>,
}

impl ResearchFindings {
    pub fn absorb(&mut self, payload: ToolPayload) {
        match payload {
            ToolPayload::Fetched { documents } => self.documents.extend(documents),
            ToolPayload::Graph { graph, summary } => {
                self.graph = Some(graph);
                self.graph_summary = Some(summary);
            }
            ToolPayload::Routed { items } => self.routed.extend(items),
            ToolPayload::News { summaries } => self.news.extend(summaries),
            ToolPayload::Analysis { outcome } => self.analysis = Some(outcome),
        }
    }

    /// Condensed findings handed to analysis generation.
    pub fn seed_data(&self, user_context: &str) -> Value {
        let documents: Vec<Value> = self
            .documents
            .iter()
            .map(|d| {
                json!({
                    "kind": d.kind,
                    "source": d.source,
                    "content": d.content.chars().take(SEED_DOCUMENT_CHARS).collect::<String>(),
                })
            })
            .collect();

        let specialist_views: Vec<&crate::routing::SpecialistOutput> = self
            .routed
            .iter()
            .filter_map(|r| r.routed.as_ref().map(|r| &r.output))
            .collect();

        json!({
            "user_context": user_context,
            "documents": documents,
            "graph_summary": self.graph_summary.as_ref().map(ToString::to_string),
            "specialist_views": specialist_views,
            "news_summaries": self.news,
        })
    }
}

/// The top-level artifact of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchResult {
    pub run_id: Uuid,
    pub ticker: String,
    pub user_context: String,
    pub plan: ResearchPlan,
    pub tool_invocations: Vec<ToolInvocationRecord>,
    pub findings: ResearchFindings,
    pub analysis: Option<InvestmentAnalysis>,
    pub analysis_text: Option<String>,
    pub reflection: ResearchReflection,
    pub learned: bool,
    pub started_at: DateTime<Utc>,
    pub execution_time_ms: u64,
}

impl ResearchResult {
    pub fn failed_tools(&self) -> Vec<&ToolInvocationRecord> {
        self.tool_invocations.iter().filter(|r| !r.success).collect()
    }
}
