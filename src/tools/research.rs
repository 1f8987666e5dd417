//! Concrete research tools, one per capability.

use super::{ResearchTool, ToolCall, ToolOutput, ToolPayload};
use crate::error::OrchestrationError;
use crate::fetch::{DataFetcher, FetchKind, FetchQuery, FetchedData};
use crate::graph::{Entity, EntityCategory, KnowledgeGraphEngine};
use crate::optimizer::EvaluatorOptimizerLoop;
use crate::pipeline::SequentialPipeline;
use crate::planner::Capability;
use crate::routing::{ContentItem, RoutingClassifier};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// News documents already gathered this run, or a fresh fetch.
async fn news_documents(fetcher: &dyn DataFetcher, call: &ToolCall) -> Result<Vec<FetchedData>> {
    let gathered: Vec<FetchedData> = call
        .documents
        .iter()
        .filter(|d| d.kind == FetchKind::News)
        .cloned()
        .collect();
    if !gathered.is_empty() {
        return Ok(gathered);
    }

    let fetched = fetcher
        .fetch(&FetchQuery::new(FetchKind::News, call.ticker.clone()))
        .await
        .map_err(|e| OrchestrationError::ToolFailure(format!("no news to work with: {}", e)))?;
    Ok(vec![fetched])
}

pub struct DataFetchTool {
    fetcher: Arc<dyn DataFetcher>,
}

impl DataFetchTool {
    pub fn new(fetcher: Arc<dyn DataFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ResearchTool for DataFetchTool {
    fn name(&self) -> &'static str {
        "data_fetch"
    }

    fn capability(&self) -> Capability {
        Capability::DataFetch
    }

    async fn invoke(&self, call: &ToolCall) -> Result<ToolOutput> {
        let mut documents = Vec::new();
        let mut failures = Vec::new();

        for kind in [FetchKind::Quote, FetchKind::News] {
            match self.fetcher.fetch(&FetchQuery::new(kind, call.ticker.clone())).await {
                Ok(doc) => documents.push(doc),
                Err(e) => {
                    warn!(ticker = %call.ticker, %kind, error = %e, "Fetch failed");
                    failures.push(format!("{}: {}", kind, e));
                }
            }
        }

        if documents.is_empty() {
            return Err(OrchestrationError::ToolFailure(failures.join("; ")));
        }

        let kinds: Vec<&str> = documents.iter().map(|d| d.kind.as_str()).collect();
        Ok(ToolOutput {
            summary: format!("fetched {} for {}", kinds.join(" and "), call.ticker),
            payload: ToolPayload::Fetched { documents },
        })
    }
}

pub struct KnowledgeGraphTool {
    engine: Arc<KnowledgeGraphEngine>,
    max_depth: u32,
}

impl KnowledgeGraphTool {
    pub fn new(engine: Arc<KnowledgeGraphEngine>, max_depth: u32) -> Self {
        Self { engine, max_depth }
    }
}

#[async_trait]
impl ResearchTool for KnowledgeGraphTool {
    fn name(&self) -> &'static str {
        "knowledge_graph"
    }

    fn capability(&self) -> Capability {
        Capability::KnowledgeGraph
    }

    async fn invoke(&self, call: &ToolCall) -> Result<ToolOutput> {
        let seed = Entity::new(&call.ticker, EntityCategory::Security, 1.0);
        let graph = self.engine.expand_entity(seed, self.max_depth).await?;
        let summary = self.engine.summarize(&graph);

        let hub = summary
            .most_central()
            .map(|h| format!(", top hub {}", h.name))
            .unwrap_or_default();
        Ok(ToolOutput {
            summary: format!(
                "graph with {} entities and {} relationships{}",
                graph.entity_count(),
                graph.relationship_count(),
                hub
            ),
            payload: ToolPayload::Graph { graph, summary },
        })
    }
}

pub struct RoutingTool {
    classifier: Arc<RoutingClassifier>,
    fetcher: Arc<dyn DataFetcher>,
}

impl RoutingTool {
    pub fn new(classifier: Arc<RoutingClassifier>, fetcher: Arc<dyn DataFetcher>) -> Self {
        Self { classifier, fetcher }
    }
}

#[async_trait]
impl ResearchTool for RoutingTool {
    fn name(&self) -> &'static str {
        "specialist_routing"
    }

    fn capability(&self) -> Capability {
        Capability::Routing
    }

    async fn invoke(&self, call: &ToolCall) -> Result<ToolOutput> {
        let items: Vec<ContentItem> = news_documents(self.fetcher.as_ref(), call)
            .await?
            .into_iter()
            .map(|d| ContentItem::new(format!("{} {} ({})", call.ticker, d.kind, d.source), d.content))
            .collect();

        let results = self.classifier.process_batch(&items).await?;
        let routed: Vec<String> = results
            .iter()
            .filter_map(|r| r.routed.as_ref())
            .map(|r| r.decision.category.to_string())
            .collect();

        if routed.is_empty() {
            return Err(OrchestrationError::ToolFailure(format!(
                "none of {} item(s) could be routed",
                results.len()
            )));
        }

        Ok(ToolOutput {
            summary: format!("routed {}/{} item(s): {}", routed.len(), results.len(), routed.join(", ")),
            payload: ToolPayload::Routed { items: results },
        })
    }
}

pub struct PipelineTool {
    pipeline: Arc<SequentialPipeline>,
    fetcher: Arc<dyn DataFetcher>,
}

impl PipelineTool {
    pub fn new(pipeline: Arc<SequentialPipeline>, fetcher: Arc<dyn DataFetcher>) -> Self {
        Self { pipeline, fetcher }
    }
}

#[async_trait]
impl ResearchTool for PipelineTool {
    fn name(&self) -> &'static str {
        "news_pipeline"
    }

    fn capability(&self) -> Capability {
        Capability::Pipeline
    }

    async fn invoke(&self, call: &ToolCall) -> Result<ToolOutput> {
        let mut summaries = Vec::new();
        let mut failures = Vec::new();
        for doc in news_documents(self.fetcher.as_ref(), call).await? {
            match self.pipeline.run(&doc.content, &doc.source).await {
                Ok(summary) => summaries.push(summary),
                Err(e) => {
                    warn!(source = %doc.source, error = %e, "News item failed the pipeline");
                    failures.push(e.to_string());
                }
            }
        }

        if summaries.is_empty() {
            return Err(OrchestrationError::ToolFailure(format!(
                "none of {} news item(s) could be summarized: {}",
                failures.len(),
                failures.join("; ")
            )));
        }

        let categories: Vec<&str> = summaries.iter().map(|s| s.category.as_str()).collect();
        let mut summary = format!("summarized {} news item(s) [{}]", summaries.len(), categories.join(", "));
        if !failures.is_empty() {
            summary.push_str(&format!(", {} failed", failures.len()));
        }
        Ok(ToolOutput {
            summary,
            payload: ToolPayload::News { summaries },
        })
    }
}

pub struct EvaluatorOptimizerTool {
    optimizer: Arc<EvaluatorOptimizerLoop>,
    max_iterations: u32,
    threshold: f64,
}

impl EvaluatorOptimizerTool {
    pub fn new(optimizer: Arc<EvaluatorOptimizerLoop>, max_iterations: u32, threshold: f64) -> Self {
        Self {
            optimizer,
            max_iterations,
            threshold,
        }
    }
}

#[async_trait]
impl ResearchTool for EvaluatorOptimizerTool {
    fn name(&self) -> &'static str {
        "evaluator_optimizer"
    }

    fn capability(&self) -> Capability {
        Capability::EvaluatorOptimizer
    }

    async fn invoke(&self, call: &ToolCall) -> Result<ToolOutput> {
        let outcome = self
            .optimizer
            .run(&call.ticker, &call.seed_data, self.max_iterations, self.threshold)
            .await?;

        Ok(ToolOutput {
            summary: format!(
                "{} after {} iteration(s), score {:.1}",
                outcome.final_analysis.recommendation,
                outcome.iterations(),
                outcome.final_evaluation.overall
            ),
            payload: ToolPayload::Analysis { outcome },
        })
    }
}
