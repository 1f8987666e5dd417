//! Research orchestrator - implements the agent loop
//!
//! PLAN → EXECUTE → REFLECT → LEARN
//!
//! Only a planning failure aborts a run. Tool failures are recorded, a
//! failed reflection is computed locally, and learning is best-effort.

use crate::content::{self, check_percent, ContentService, ContentTask, SchemaDescriptor, StructuredOutput};
use crate::error::OrchestrationError;
use crate::execution::ExecutionEngine;
use crate::fetch::DataFetcher;
use crate::graph::{GraphSummary, KnowledgeGraph, KnowledgeGraphEngine};
use crate::memory::{LearnedContext, MemoryRecord, MemoryStore};
use crate::models::{ResearchFindings, ResearchReflection, ResearchResult, ToolInvocationRecord};
use crate::optimizer::{EvaluatorOptimizerLoop, OptimizationOutcome};
use crate::pipeline::{NewsSummary, SequentialPipeline};
use crate::planner::{ContentPlanner, Planner, ResearchPlan};
use crate::routing::{
    BatchItemResult, ContentItem, RoutedItem, RoutingClassifier, RoutingDecision, SpecialistRegistry,
};
use crate::tools::{
    DataFetchTool, EvaluatorOptimizerTool, KnowledgeGraphTool, PipelineTool, ResearchTool, RoutingTool, ToolRegistry,
};
use crate::Result;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Knobs for one orchestrator instance.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub graph_max_depth: u32,
    pub eo_max_iterations: u32,
    pub eo_quality_threshold: f64,
    pub tool_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            graph_max_depth: 2,
            eo_max_iterations: crate::optimizer::DEFAULT_MAX_ITERATIONS,
            eo_quality_threshold: crate::optimizer::DEFAULT_QUALITY_THRESHOLD,
            tool_timeout: Duration::from_secs(120),
        }
    }
}

impl From<&crate::config::AgentConfig> for OrchestratorSettings {
    fn from(config: &crate::config::AgentConfig) -> Self {
        Self {
            graph_max_depth: config.graph_max_depth,
            eo_max_iterations: config.eo_max_iterations,
            eo_quality_threshold: config.eo_quality_threshold,
            tool_timeout: config.tool_timeout,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReflectionAnswer {
    completeness: f64,
    confidence: f64,
    data_quality: f64,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    gaps: Vec<String>,
    #[serde(default)]
    recommendations: Vec<String>,
}

impl StructuredOutput for ReflectionAnswer {
    const SCHEMA: SchemaDescriptor = SchemaDescriptor {
        name: "research_reflection",
        required_fields: &["completeness", "confidence", "data_quality"],
    };

    fn validate(&self) -> std::result::Result<(), String> {
        check_percent("completeness", self.completeness)?;
        check_percent("confidence", self.confidence)?;
        check_percent("data_quality", self.data_quality)
    }
}

/// Reflection built from the invocation records alone.
fn local_reflection(records: &[ToolInvocationRecord], findings: &ResearchFindings) -> ResearchReflection {
    let total = records.len().max(1) as f64;
    let succeeded = records.iter().filter(|r| r.success).count() as f64;
    let ratio = succeeded / total * 100.0;

    let mut recommendations: Vec<String> = records
        .iter()
        .filter(|r| !r.success)
        .map(|r| format!("Retry or replace the {} step ({})", r.capability, r.tool))
        .collect();
    if findings.analysis.is_none() {
        recommendations.push("Produce an investment analysis before reflecting".to_string());
    }

    ResearchReflection {
        completeness: ratio,
        confidence: findings
            .analysis
            .as_ref()
            .map(|a| a.final_evaluation.overall)
            .unwrap_or(ratio / 2.0),
        data_quality: if findings.documents.is_empty() { ratio / 2.0 } else { ratio },
        strengths: records
            .iter()
            .filter(|r| r.success)
            .map(|r| format!("{}: {}", r.tool, r.output_ref.as_deref().unwrap_or("completed")))
            .collect(),
        gaps: records
            .iter()
            .filter(|r| !r.success)
            .map(|r| format!("{} failed: {}", r.tool, r.error.as_deref().unwrap_or("unknown error")))
            .collect(),
        recommendations,
        from_content_service: false,
    }
}

/// Main orchestrator that coordinates the research workflow
pub struct ResearchOrchestrator {
    service: Arc<dyn ContentService>,
    planner: Arc<dyn Planner>,
    execution_engine: ExecutionEngine,
    memory: Arc<dyn MemoryStore>,
    graph_engine: Arc<KnowledgeGraphEngine>,
    classifier: Arc<RoutingClassifier>,
    pipeline: Arc<SequentialPipeline>,
    optimizer: Arc<EvaluatorOptimizerLoop>,
    settings: OrchestratorSettings,
}

impl ResearchOrchestrator {
    /// Wire the standard components and one tool per capability.
    pub fn new(
        service: Arc<dyn ContentService>,
        fetcher: Arc<dyn DataFetcher>,
        memory: Arc<dyn MemoryStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        let graph_engine = Arc::new(KnowledgeGraphEngine::new(service.clone()).with_fetcher(fetcher.clone()));
        let classifier = Arc::new(RoutingClassifier::new(
            service.clone(),
            SpecialistRegistry::standard(service.clone()),
        ));
        let pipeline = Arc::new(SequentialPipeline::new(service.clone()));
        let optimizer = Arc::new(EvaluatorOptimizerLoop::new(service.clone()));

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DataFetchTool::new(fetcher.clone())));
        registry.register(Arc::new(KnowledgeGraphTool::new(graph_engine.clone(), settings.graph_max_depth)));
        registry.register(Arc::new(RoutingTool::new(classifier.clone(), fetcher.clone())));
        registry.register(Arc::new(PipelineTool::new(pipeline.clone(), fetcher)));
        registry.register(Arc::new(EvaluatorOptimizerTool::new(
            optimizer.clone(),
            settings.eo_max_iterations,
            settings.eo_quality_threshold,
        )));

        Self {
            planner: Arc::new(ContentPlanner::new(service.clone())),
            execution_engine: ExecutionEngine::new(registry, settings.tool_timeout),
            service,
            memory,
            graph_engine,
            classifier,
            pipeline,
            optimizer,
            settings,
        }
    }

    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = planner;
        self
    }

    /// Replace the tool for the capability `tool` serves.
    pub fn with_tool(mut self, tool: Arc<dyn ResearchTool>) -> Self {
        self.execution_engine.registry_mut().register(tool);
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn memory_backend(&self) -> &'static str {
        self.memory.backend_name()
    }

    /// Run one full research cycle for `ticker`.
    pub async fn research_stock(&self, ticker: &str, user_context: &str) -> Result<ResearchResult> {
        let ticker = ticker.trim().to_uppercase();
        if ticker.is_empty() {
            return Err(OrchestrationError::InvalidInput("ticker is empty".to_string()));
        }

        let start_time = Instant::now();
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        info!(%run_id, ticker = %ticker, "Research run starting");

        // === PLAN ===
        let plan = self.plan(&ticker, user_context).await?;
        info!(%run_id, steps = plan.steps.len(), complexity = %plan.complexity, "PLAN complete");

        // === EXECUTE ===
        let (records, findings) = self.execute(&plan, user_context).await;
        info!(
            %run_id,
            succeeded = records.iter().filter(|r| r.success).count(),
            failed = records.iter().filter(|r| !r.success).count(),
            "EXECUTE complete"
        );

        // === REFLECT ===
        let reflection = self.reflect(&ticker, &records, &findings).await;
        info!(
            %run_id,
            completeness = reflection.completeness,
            confidence = reflection.confidence,
            data_quality = reflection.data_quality,
            "REFLECT complete"
        );

        // === LEARN ===
        let learned = self.learn(run_id, &ticker, &reflection).await;

        let analysis = findings.analysis.as_ref().map(|o| o.final_analysis.clone());
        let execution_time_ms = start_time.elapsed().as_millis() as u64;
        info!(%run_id, learned, execution_time_ms, "Research run complete");

        Ok(ResearchResult {
            run_id,
            ticker,
            user_context: user_context.to_string(),
            plan,
            tool_invocations: records,
            analysis_text: analysis.as_ref().map(ToString::to_string),
            analysis,
            findings,
            reflection,
            learned,
            started_at,
            execution_time_ms,
        })
    }

    /// Read memory, fold it, and ask the planner for a plan. An unreadable
    /// store degrades to planning without learnings.
    pub async fn plan(&self, ticker: &str, user_context: &str) -> Result<ResearchPlan> {
        let learned = match self.memory.load_all().await {
            Ok(records) => LearnedContext::fold(&records),
            Err(e) => {
                warn!(error = %e, "Memory unavailable, planning without past learnings");
                LearnedContext::default()
            }
        };
        debug!(past_runs = learned.past_runs, "Loaded learnings");

        self.planner
            .create_plan(ticker, user_context, &learned)
            .await
            .map_err(|e| match e {
                OrchestrationError::PlanFailure(_) => e,
                other => OrchestrationError::PlanFailure(other.to_string()),
            })
    }

    pub async fn execute(&self, plan: &ResearchPlan, user_context: &str) -> (Vec<ToolInvocationRecord>, ResearchFindings) {
        self.execution_engine.execute_plan(plan, user_context).await
    }

    pub async fn reflect(
        &self,
        ticker: &str,
        records: &[ToolInvocationRecord],
        findings: &ResearchFindings,
    ) -> ResearchReflection {
        let analysis = findings.analysis.as_ref().map(|o| {
            json!({
                "text": o.final_analysis.to_string(),
                "quality_score": o.final_evaluation.overall,
                "iterations": o.iterations(),
            })
        });

        let answer = content::generate::<ReflectionAnswer>(
            self.service.as_ref(),
            ContentTask::Reflect,
            "Assess this research run: how complete it was, how confident the conclusion is, \
             how good the data was, and what to do better next time.",
            json!({
                "ticker": ticker,
                "tool_invocations": records,
                "analysis": analysis,
                "graph_summary": findings.graph_summary.as_ref().map(ToString::to_string),
                "document_count": findings.documents.len(),
                "routed_count": findings.routed.len(),
                "news_count": findings.news.len(),
            }),
        )
        .await;

        match answer {
            Ok(a) => ResearchReflection {
                completeness: a.completeness,
                confidence: a.confidence,
                data_quality: a.data_quality,
                strengths: a.strengths,
                gaps: a.gaps,
                recommendations: a.recommendations,
                from_content_service: true,
            },
            Err(e) => {
                warn!(error = %e, "Reflection failed, using local assessment");
                local_reflection(records, findings)
            }
        }
    }

    /// Append what this run learned. Returns whether the record was stored.
    pub async fn learn(&self, run_id: Uuid, ticker: &str, reflection: &ResearchReflection) -> bool {
        let record = MemoryRecord {
            run_id,
            ticker: ticker.to_string(),
            recorded_at: Utc::now(),
            recommendations: reflection.recommendations.clone(),
            gaps: reflection.gaps.clone(),
            completeness: reflection.completeness,
            confidence: reflection.confidence,
            data_quality: reflection.data_quality,
        };

        match self.memory.append(&record).await {
            Ok(()) => true,
            Err(e) => {
                warn!(%run_id, error = %e, "Could not record learnings");
                false
            }
        }
    }

    pub async fn expand_graph(&self, seed: &str, max_depth: u32) -> Result<KnowledgeGraph> {
        self.graph_engine.expand(seed, max_depth).await
    }

    pub fn summarize_graph(&self, graph: &KnowledgeGraph) -> GraphSummary {
        self.graph_engine.summarize(graph)
    }

    pub async fn narrate_graph(&self, graph: &KnowledgeGraph, focus: &str) -> Result<String> {
        self.graph_engine.narrate(graph, focus).await
    }

    pub async fn route(&self, content: &str, title: &str) -> Result<RoutingDecision> {
        self.classifier.route(content, title).await
    }

    /// Route one item and hand it to the matching specialist.
    pub async fn route_item(&self, item: &ContentItem) -> Result<RoutedItem> {
        self.classifier.process(item).await
    }

    pub async fn route_batch(&self, items: &[ContentItem]) -> Result<Vec<BatchItemResult>> {
        self.classifier.process_batch(items).await
    }

    pub async fn run_pipeline(&self, raw_news: &str, source: &str) -> Result<NewsSummary> {
        self.pipeline.run(raw_news, source).await
    }

    pub async fn run_evaluator_optimizer(
        &self,
        subject: &str,
        seed_data: &Value,
        max_iterations: u32,
        threshold: f64,
    ) -> Result<OptimizationOutcome> {
        self.optimizer.run(subject, seed_data, max_iterations, threshold).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ScriptedContentService;
    use crate::fetch::{FetchKind, StaticDataFetcher};
    use crate::memory::InMemoryMemoryStore;
    use crate::planner::Capability;
    use async_trait::async_trait;

    struct BrokenMemory;

    #[async_trait]
    impl MemoryStore for BrokenMemory {
        async fn append(&self, _record: &MemoryRecord) -> Result<()> {
            Err(OrchestrationError::MemoryUnavailable("disk full".to_string()))
        }

        async fn load_all(&self) -> Result<Vec<MemoryRecord>> {
            Err(OrchestrationError::MemoryUnavailable("corrupt".to_string()))
        }

        fn backend_name(&self) -> &'static str {
            "broken"
        }
    }

    fn fetcher() -> Arc<StaticDataFetcher> {
        Arc::new(
            StaticDataFetcher::new()
                .with_document(FetchKind::Quote, "AAPL", "AAPL last 190.12, P/E 29")
                .with_document(FetchKind::News, "AAPL", "Apple beats estimates\nServices revenue up 14%"),
        )
    }

    fn scripted() -> ScriptedContentService {
        ScriptedContentService::new()
            .with_default(
                ContentTask::Plan,
                json!({
                    "steps": [
                        "Fetch the latest quote and news",
                        "Map competitors and suppliers",
                        "Write the investment analysis with a price target"
                    ],
                    "data_sources": ["quote", "news"],
                    "key_questions": ["Is services growth durable?"],
                    "complexity": "medium"
                }),
            )
            .with_default(
                ContentTask::ExtractRelations,
                json!({
                    "entities": [{"name": "Foxconn", "category": "company", "confidence": 0.9}],
                    "relationships": [{"source": "Foxconn", "relation": "supplies", "target": "AAPL"}]
                }),
            )
            .with_default(
                ContentTask::GenerateAnalysis,
                json!({
                    "ticker": "AAPL",
                    "recommendation": "Hold",
                    "target_price": 205.0,
                    "thesis": "Services offset hardware",
                    "conclusion": "Hold"
                }),
            )
            .with_default(
                ContentTask::EvaluateAnalysis,
                json!({"scores": {"completeness": 88, "accuracy": 92}, "feedback": []}),
            )
            .with_default(
                ContentTask::Reflect,
                json!({
                    "completeness": 85,
                    "confidence": 80,
                    "data_quality": 75,
                    "strengths": ["clear thesis"],
                    "gaps": ["no peer valuation"],
                    "recommendations": ["Add peer multiples"]
                }),
            )
    }

    fn orchestrator(service: Arc<ScriptedContentService>, memory: Arc<dyn MemoryStore>) -> ResearchOrchestrator {
        ResearchOrchestrator::new(service, fetcher(), memory, OrchestratorSettings::default())
    }

    #[tokio::test]
    async fn test_full_run_learns() {
        let service = Arc::new(scripted());
        let memory = Arc::new(InMemoryMemoryStore::new());
        let agent = orchestrator(service.clone(), memory.clone());

        let result = agent.research_stock("aapl", "long-term investor").await.unwrap();

        assert_eq!(result.ticker, "AAPL");
        assert_eq!(
            result.plan.capabilities(),
            vec![Capability::DataFetch, Capability::KnowledgeGraph, Capability::EvaluatorOptimizer]
        );
        assert_eq!(result.tool_invocations.len(), 3);
        assert!(result.failed_tools().is_empty());
        assert_eq!(result.findings.documents.len(), 2);
        assert!(result.findings.graph.as_ref().unwrap().contains("Foxconn"));
        assert!(result.analysis_text.as_deref().unwrap().contains("AAPL: Hold"));
        assert!(result.reflection.from_content_service);
        assert!(result.learned);

        let stored = memory.load_all().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].recommendations, vec!["Add peer multiples"]);

        let reflect = &service.calls_for(ContentTask::Reflect)[0];
        assert!(reflect.context_str("graph_summary").unwrap().contains("Foxconn"));
        assert_eq!(reflect.context["document_count"], 2);
        assert_eq!(reflect.context["routed_count"], 0);
        assert_eq!(reflect.context["news_count"], 0);
    }

    #[tokio::test]
    async fn test_second_run_plans_with_learnings() {
        let service = Arc::new(scripted());
        let memory = Arc::new(InMemoryMemoryStore::new());
        let agent = orchestrator(service.clone(), memory);

        agent.research_stock("AAPL", "").await.unwrap();
        agent.research_stock("AAPL", "").await.unwrap();

        let plans = service.calls_for(ContentTask::Plan);
        assert_eq!(plans[0].context_str("past_learnings"), Some(""));
        assert!(plans[1].context_str("past_learnings").unwrap().contains("Add peer multiples"));
    }

    #[tokio::test]
    async fn test_tool_failure_is_recorded_and_run_continues() {
        let service = Arc::new(scripted().with_response(
            ContentTask::Plan,
            json!({
                "steps": ["Classify recent news sentiment", "Write the investment analysis"],
                "complexity": "low"
            }),
        ));
        // No Route answer scripted, so routing fails.
        let agent = orchestrator(service, Arc::new(InMemoryMemoryStore::new()));
        let result = agent.research_stock("AAPL", "").await.unwrap();

        assert_eq!(result.tool_invocations.len(), 2);
        let failed = result.failed_tools();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].capability, Capability::Routing);
        assert!(result.analysis.is_some());
    }

    #[tokio::test]
    async fn test_plan_failure_is_fatal() {
        let service = Arc::new(ScriptedContentService::new().with_failure(ContentTask::Plan, "model overloaded"));
        let memory = Arc::new(InMemoryMemoryStore::new());
        let agent = orchestrator(service, memory.clone());

        let err = agent.research_stock("AAPL", "").await.unwrap_err();
        assert!(matches!(err, OrchestrationError::PlanFailure(ref m) if m.contains("model overloaded")));
        assert!(memory.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_memory_and_failed_learning_are_not_fatal() {
        let agent = orchestrator(Arc::new(scripted()), Arc::new(BrokenMemory));
        let result = agent.research_stock("AAPL", "").await.unwrap();
        assert!(!result.learned);
        assert!(result.analysis.is_some());
    }

    #[tokio::test]
    async fn test_reflection_falls_back_to_local() {
        let service = Arc::new(scripted().with_response(ContentTask::Reflect, json!({"completeness": 500})));
        let agent = orchestrator(service, Arc::new(InMemoryMemoryStore::new()));
        let result = agent.research_stock("AAPL", "").await.unwrap();

        assert!(!result.reflection.from_content_service);
        assert_eq!(result.reflection.completeness, 100.0);
        assert_eq!(result.reflection.confidence, 90.0);
        assert_eq!(result.reflection.strengths.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_memory_planning_succeeds() {
        let agent = orchestrator(Arc::new(scripted()), Arc::new(InMemoryMemoryStore::new()));
        let plan = agent.plan("AAPL", "dividend focus").await.unwrap();
        assert_eq!(plan.steps.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_ticker_rejected() {
        let agent = orchestrator(Arc::new(scripted()), Arc::new(InMemoryMemoryStore::new()));
        assert!(matches!(
            agent.research_stock("  ", "").await,
            Err(OrchestrationError::InvalidInput(_))
        ));
    }
}
