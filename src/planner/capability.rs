//! Capability table
//!
//! Maps plan-step text onto the fixed set of tool capabilities. Rows are
//! checked in order; the first row with a matching keyword wins.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    KnowledgeGraph,
    DataFetch,
    Routing,
    Pipeline,
    EvaluatorOptimizer,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::KnowledgeGraph,
        Capability::DataFetch,
        Capability::Routing,
        Capability::Pipeline,
        Capability::EvaluatorOptimizer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::KnowledgeGraph => "knowledge_graph",
            Capability::DataFetch => "data_fetch",
            Capability::Routing => "routing",
            Capability::Pipeline => "pipeline",
            Capability::EvaluatorOptimizer => "evaluator_optimizer",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| format!("unknown capability '{}'", s))
    }
}

lazy_static! {
    static ref CAPABILITY_TABLE: Vec<(Capability, &'static [&'static str])> = vec![
        (
            Capability::EvaluatorOptimizer,
            &[
                "investment analysis",
                "recommendation",
                "thesis",
                "price target",
                "valuation",
                "synthesize",
                "refine",
                "final report",
            ][..],
        ),
        (
            Capability::KnowledgeGraph,
            &[
                "relationship",
                "competitor",
                "partner",
                "supplier",
                "peer",
                "ecosystem",
                "graph",
                "entities",
                "connection",
            ][..],
        ),
        (
            Capability::Pipeline,
            &[
                "summarize news",
                "news summary",
                "process news",
                "pipeline",
                "headline",
                "key facts",
            ][..],
        ),
        (
            Capability::Routing,
            &[
                "classify",
                "categorize",
                "route",
                "sentiment",
                "earnings",
                "specialist",
            ][..],
        ),
        (
            Capability::DataFetch,
            &[
                "fetch",
                "quote",
                "price",
                "financial data",
                "news",
                "retrieve",
                "gather",
                "collect",
                "market data",
            ][..],
        ),
    ];
}

/// Capability for a step description; data fetch when nothing matches.
pub fn capability_for(step: &str) -> Capability {
    let lowered = step.to_lowercase();
    CAPABILITY_TABLE
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(capability, _)| *capability)
        .unwrap_or(Capability::DataFetch)
}
