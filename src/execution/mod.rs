//! Execution engine for research plans
//!
//! Steps run in plan order. A failing, missing or timed-out tool becomes a
//! failed `ToolInvocationRecord` and the remaining steps still run.

use crate::error::OrchestrationError;
use crate::models::{ResearchFindings, ToolInvocationRecord};
use crate::planner::ResearchPlan;
use crate::tools::{ToolCall, ToolOutput, ToolRegistry};
use crate::Result;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Runs every step of a plan against the tool registry.
pub struct ExecutionEngine {
    tool_registry: ToolRegistry,
    tool_timeout: Duration,
}

impl ExecutionEngine {
    pub fn new(tool_registry: ToolRegistry, tool_timeout: Duration) -> Self {
        Self {
            tool_registry,
            tool_timeout,
        }
    }

    pub fn registry_mut(&mut self) -> &mut ToolRegistry {
        &mut self.tool_registry
    }

    pub async fn execute_plan(
        &self,
        plan: &ResearchPlan,
        user_context: &str,
    ) -> (Vec<ToolInvocationRecord>, ResearchFindings) {
        let mut records = Vec::with_capacity(plan.steps.len());
        let mut findings = ResearchFindings::default();

        for (index, step) in plan.steps.iter().enumerate() {
            debug!(
                step = index + 1,
                capability = %step.capability,
                description = %step.description,
                "Processing step"
            );

            let start = Instant::now();
            let call = ToolCall {
                ticker: plan.ticker.clone(),
                step: step.description.clone(),
                user_context: user_context.to_string(),
                documents: findings.documents.clone(),
                seed_data: findings.seed_data(user_context),
            };

            let (tool_name, outcome) = match self.tool_registry.get(step.capability) {
                Some(tool) => (tool.name().to_string(), self.invoke_bounded(tool.as_ref(), &call).await),
                None => (
                    step.capability.to_string(),
                    Err(OrchestrationError::ToolFailure(format!(
                        "no tool registered for capability '{}'",
                        step.capability
                    ))),
                ),
            };

            let mut record = ToolInvocationRecord {
                step_index: index,
                tool: tool_name,
                capability: step.capability,
                input_summary: format!("{} | {}", plan.ticker, step.description),
                output_ref: None,
                success: false,
                error: None,
                duration_ms: start.elapsed().as_millis() as u64,
            };

            match outcome {
                Ok(output) => {
                    record.success = true;
                    record.output_ref = Some(output.summary);
                    findings.absorb(output.payload);
                }
                Err(e) => {
                    warn!(
                        step = index + 1,
                        tool = %record.tool,
                        error = %e,
                        "Tool execution failed"
                    );
                    record.error = Some(e.to_string());
                }
            }

            records.push(record);
        }

        (records, findings)
    }

    async fn invoke_bounded(
        &self,
        tool: &dyn crate::tools::ResearchTool,
        call: &ToolCall,
    ) -> Result<ToolOutput> {
        match tokio::time::timeout(self.tool_timeout, tool.invoke(call)).await {
            Ok(result) => result,
            Err(_) => Err(OrchestrationError::Timeout(self.tool_timeout.as_secs())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{Capability, Complexity, PlannedStep};
    use crate::tools::{ResearchTool, ToolPayload};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct SlowTool;

    #[async_trait]
    impl ResearchTool for SlowTool {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn capability(&self) -> Capability {
            Capability::Routing
        }

        async fn invoke(&self, _call: &ToolCall) -> Result<ToolOutput> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolOutput {
                summary: "late".to_string(),
                payload: ToolPayload::Routed { items: vec![] },
            })
        }
    }

    struct FixedFetch;

    #[async_trait]
    impl ResearchTool for FixedFetch {
        fn name(&self) -> &'static str {
            "fixed_fetch"
        }

        fn capability(&self) -> Capability {
            Capability::DataFetch
        }

        async fn invoke(&self, call: &ToolCall) -> Result<ToolOutput> {
            Ok(ToolOutput {
                summary: format!("fetched for {}", call.ticker),
                payload: ToolPayload::Fetched { documents: vec![] },
            })
        }
    }

    fn plan(capabilities: &[Capability]) -> ResearchPlan {
        ResearchPlan {
            ticker: "AAPL".to_string(),
            steps: capabilities
                .iter()
                .map(|c| PlannedStep {
                    description: format!("{} step", c),
                    capability: *c,
                })
                .collect(),
            data_sources: vec![],
            key_questions: vec![],
            complexity: Complexity::Low,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_records_follow_plan_order_through_failures() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool));
        registry.register(Arc::new(FixedFetch));
        let engine = ExecutionEngine::new(registry, Duration::from_millis(50));

        let (records, _) = engine
            .execute_plan(
                &plan(&[Capability::Routing, Capability::KnowledgeGraph, Capability::DataFetch]),
                "",
            )
            .await;

        assert_eq!(records.len(), 3);
        assert_eq!(records.iter().map(|r| r.step_index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(records[0].error.as_deref().unwrap().contains("Timed out"));
        assert!(records[1].error.as_deref().unwrap().contains("no tool registered"));
        assert!(records[2].success);
        assert_eq!(records[2].output_ref.as_deref(), Some("fetched for AAPL"));
    }
}
