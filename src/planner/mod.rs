//! Research planning
//!
//! A planner turns a ticker, the user's context and what earlier runs learned
//! into a `ResearchPlan`. Every step gets its capability here, so execution
//! never inspects step text.

use crate::content::{self, ContentService, ContentTask, SchemaDescriptor, StructuredOutput};
use crate::memory::LearnedContext;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

pub mod capability;
pub use capability::{capability_for, Capability};

pub const MIN_PLAN_STEPS: usize = 2;
pub const MAX_PLAN_STEPS: usize = 6;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl FromStr for Complexity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Complexity::Low),
            "medium" => Ok(Complexity::Medium),
            "high" => Ok(Complexity::High),
            other => Err(format!("unknown complexity '{}'", other)),
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Complexity::Low => "low",
            Complexity::Medium => "medium",
            Complexity::High => "high",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannedStep {
    pub description: String,
    pub capability: Capability,
}

impl PlannedStep {
    pub fn new(description: impl Into<String>) -> Self {
        let description = description.into();
        Self {
            capability: capability_for(&description),
            description,
        }
    }
}

/// Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub ticker: String,
    pub steps: Vec<PlannedStep>,
    pub data_sources: Vec<String>,
    pub key_questions: Vec<String>,
    pub complexity: Complexity,
    pub created_at: DateTime<Utc>,
}

impl ResearchPlan {
    /// Truncate to the step cap, pad to the minimum, and make sure the run
    /// ends up with an analysis step.
    pub fn normalized(
        ticker: &str,
        steps: Vec<PlannedStep>,
        data_sources: Vec<String>,
        key_questions: Vec<String>,
        complexity: Complexity,
    ) -> Self {
        let mut steps: Vec<PlannedStep> = steps
            .into_iter()
            .filter(|s| !s.description.trim().is_empty())
            .take(MAX_PLAN_STEPS)
            .collect();

        let has = |steps: &[PlannedStep], c: Capability| steps.iter().any(|s| s.capability == c);

        if steps.len() < MIN_PLAN_STEPS && !has(&steps, Capability::DataFetch) {
            steps.insert(
                0,
                PlannedStep {
                    description: format!("Fetch the current quote and recent news for {}", ticker),
                    capability: Capability::DataFetch,
                },
            );
        }

        if !has(&steps, Capability::EvaluatorOptimizer) {
            let analysis = PlannedStep {
                description: format!("Generate and refine the investment analysis for {}", ticker),
                capability: Capability::EvaluatorOptimizer,
            };
            if steps.len() == MAX_PLAN_STEPS {
                steps.pop();
            }
            steps.push(analysis);
        }

        Self {
            ticker: ticker.to_string(),
            steps,
            data_sources,
            key_questions,
            complexity,
            created_at: Utc::now(),
        }
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        self.steps.iter().map(|s| s.capability).collect()
    }
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn create_plan(&self, ticker: &str, user_context: &str, learned: &LearnedContext) -> Result<ResearchPlan>;
}

/// A step is either plain text or text plus an explicit capability.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StepAnswer {
    Text(String),
    Detailed {
        description: String,
        #[serde(default)]
        capability: Option<String>,
    },
}

impl StepAnswer {
    fn into_step(self) -> PlannedStep {
        match self {
            StepAnswer::Text(description) => PlannedStep::new(description),
            StepAnswer::Detailed { description, capability } => match capability.and_then(|c| c.parse().ok()) {
                Some(capability) => PlannedStep { description, capability },
                None => PlannedStep::new(description),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlanAnswer {
    steps: Vec<StepAnswer>,
    #[serde(default)]
    data_sources: Vec<String>,
    #[serde(default)]
    key_questions: Vec<String>,
    #[serde(deserialize_with = "complexity_from_str")]
    complexity: Complexity,
}

/// Accepts any casing, unlike the derived lowercase form.
fn complexity_from_str<'de, D>(deserializer: D) -> std::result::Result<Complexity, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

impl StructuredOutput for PlanAnswer {
    const SCHEMA: SchemaDescriptor = SchemaDescriptor {
        name: "research_plan",
        required_fields: &["steps", "complexity"],
    };
}

/// Planner backed by the content service.
pub struct ContentPlanner {
    service: Arc<dyn ContentService>,
}

impl ContentPlanner {
    pub fn new(service: Arc<dyn ContentService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Planner for ContentPlanner {
    async fn create_plan(&self, ticker: &str, user_context: &str, learned: &LearnedContext) -> Result<ResearchPlan> {
        let answer: PlanAnswer = content::generate(
            self.service.as_ref(),
            ContentTask::Plan,
            format!(
                "Plan {}-{} research steps for an investment analysis of {}. \
                 Each step should use one capability.",
                MIN_PLAN_STEPS, MAX_PLAN_STEPS, ticker
            ),
            json!({
                "ticker": ticker,
                "user_context": user_context,
                "past_learnings": learned.render(),
                "capabilities": Capability::ALL,
            }),
        )
        .await?;

        let steps = answer.steps.into_iter().map(StepAnswer::into_step).collect();
        let plan = ResearchPlan::normalized(
            ticker,
            steps,
            answer.data_sources,
            answer.key_questions,
            answer.complexity,
        );

        debug!(ticker, steps = plan.steps.len(), complexity = %plan.complexity, "Plan created");
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ScriptedContentService;
    use crate::error::OrchestrationError;
    use crate::memory::sample_record;

    fn steps(texts: &[&str]) -> Vec<PlannedStep> {
        texts.iter().map(|t| PlannedStep::new(*t)).collect()
    }

    #[test]
    fn test_short_plan_is_padded() {
        let plan = ResearchPlan::normalized("AAPL", vec![], vec![], vec![], Complexity::Low);
        assert_eq!(plan.capabilities(), vec![Capability::DataFetch, Capability::EvaluatorOptimizer]);
    }

    #[test]
    fn test_long_plan_is_truncated_and_ends_with_analysis() {
        let plan = ResearchPlan::normalized(
            "AAPL",
            steps(&["fetch quote", "fetch news", "map competitors", "classify sentiment", "summarize news", "gather filings", "more data"]),
            vec![],
            vec![],
            Complexity::High,
        );
        assert_eq!(plan.steps.len(), MAX_PLAN_STEPS);
        assert_eq!(plan.steps.last().unwrap().capability, Capability::EvaluatorOptimizer);
    }

    #[test]
    fn test_plan_with_analysis_is_kept() {
        let plan = ResearchPlan::normalized(
            "AAPL",
            steps(&["map competitors", "write the investment analysis"]),
            vec![],
            vec![],
            Complexity::Medium,
        );
        assert_eq!(plan.capabilities(), vec![Capability::KnowledgeGraph, Capability::EvaluatorOptimizer]);
    }

    #[tokio::test]
    async fn test_content_planner_uses_learnings_and_explicit_capabilities() {
        let service = Arc::new(ScriptedContentService::new().with_response(
            ContentTask::Plan,
            json!({
                "steps": [
                    "Fetch the latest quote",
                    {"description": "Look at who Apple depends on", "capability": "knowledge_graph"},
                    {"description": "Write the investment analysis", "capability": "teleport"}
                ],
                "data_sources": ["quote", "news"],
                "key_questions": ["Is services growth durable?"],
                "complexity": "High"
            }),
        ));
        let planner = ContentPlanner::new(service.clone());
        let learned = LearnedContext::fold(&[sample_record("AAPL", "Add peer valuation", 60.0)]);
        let plan = planner.create_plan("AAPL", "long-term holder", &learned).await.unwrap();

        assert_eq!(
            plan.capabilities(),
            vec![Capability::DataFetch, Capability::KnowledgeGraph, Capability::EvaluatorOptimizer]
        );
        assert_eq!(plan.complexity, Complexity::High);

        let call = &service.calls()[0];
        assert!(call.context_str("past_learnings").unwrap().contains("Add peer valuation"));
    }

    #[tokio::test]
    async fn test_invalid_complexity_is_schema_violation() {
        let service = Arc::new(
            ScriptedContentService::new()
                .with_response(ContentTask::Plan, json!({"steps": ["fetch"], "complexity": "extreme"})),
        );
        let planner = ContentPlanner::new(service);
        let err = planner
            .create_plan("AAPL", "", &LearnedContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::SchemaViolation { ref detail, .. } if detail.contains("extreme")));
    }
}
