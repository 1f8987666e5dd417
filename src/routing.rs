//! Route content items to exactly one specialist
//!
//! The classifier asks the content service for a category from a fixed
//! taxonomy, then hands the item to the specialist registered for it.

use crate::content::{self, check_unit_interval, ContentService, ContentTask, SchemaDescriptor, StructuredOutput};
use crate::error::OrchestrationError;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RouteCategory {
    Earnings,
    News,
    Market,
}

impl RouteCategory {
    pub const ALL: [RouteCategory; 3] = [RouteCategory::Earnings, RouteCategory::News, RouteCategory::Market];

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteCategory::Earnings => "earnings",
            RouteCategory::News => "news",
            RouteCategory::Market => "market",
        }
    }
}

impl fmt::Display for RouteCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouteCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        RouteCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == lowered)
            .ok_or_else(|| format!("route '{}' is outside the taxonomy", s))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub title: String,
    pub content: String,
}

impl ContentItem {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingDecision {
    pub category: RouteCategory,
    pub confidence: f64,
    pub rationale: String,
}

/// Wire shape of a routing answer. The route stays a string so an
/// out-of-taxonomy value is reported by `validate`, not coerced.
#[derive(Debug, Deserialize)]
struct RouteAnswer {
    route: String,
    confidence: f64,
    reasoning: String,
}

impl StructuredOutput for RouteAnswer {
    const SCHEMA: SchemaDescriptor = SchemaDescriptor {
        name: "routing_decision",
        required_fields: &["route", "confidence", "reasoning"],
    };

    fn validate(&self) -> std::result::Result<(), String> {
        self.route.parse::<RouteCategory>()?;
        check_unit_interval("confidence", self.confidence)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EarningsAnalysis {
    pub revenue_analysis: String,
    pub profitability: String,
    pub growth_prospects: String,
    pub guidance: String,
    #[serde(default)]
    pub key_metrics: Vec<String>,
    pub recommendation: String,
}

impl StructuredOutput for EarningsAnalysis {
    const SCHEMA: SchemaDescriptor = SchemaDescriptor {
        name: "earnings_analysis",
        required_fields: &["revenue_analysis", "profitability", "growth_prospects", "guidance", "recommendation"],
    };
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsAnalysis {
    pub event_summary: String,
    pub market_impact: String,
    #[serde(default)]
    pub stakeholders: Vec<String>,
    pub timeline: String,
    pub credibility: f64,
    #[serde(default)]
    pub key_insights: Vec<String>,
}

impl StructuredOutput for NewsAnalysis {
    const SCHEMA: SchemaDescriptor = SchemaDescriptor {
        name: "news_analysis",
        required_fields: &["event_summary", "market_impact", "timeline", "credibility"],
    };

    fn validate(&self) -> std::result::Result<(), String> {
        check_unit_interval("credibility", self.credibility)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketAnalysis {
    pub trend: String,
    #[serde(default)]
    pub technical_indicators: Vec<String>,
    pub sentiment: String,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub opportunities: Vec<String>,
    pub outlook: String,
}

impl StructuredOutput for MarketAnalysis {
    const SCHEMA: SchemaDescriptor = SchemaDescriptor {
        name: "market_analysis",
        required_fields: &["trend", "sentiment", "outlook"],
    };
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "category", rename_all = "lowercase")]
pub enum SpecialistOutput {
    Earnings(EarningsAnalysis),
    News(NewsAnalysis),
    Market(MarketAnalysis),
}

impl SpecialistOutput {
    pub fn category(&self) -> RouteCategory {
        match self {
            SpecialistOutput::Earnings(_) => RouteCategory::Earnings,
            SpecialistOutput::News(_) => RouteCategory::News,
            SpecialistOutput::Market(_) => RouteCategory::Market,
        }
    }
}

/// Produces domain-specific analysis for one routed category.
#[async_trait]
pub trait Specialist: Send + Sync {
    fn category(&self) -> RouteCategory;
    async fn analyze(&self, item: &ContentItem) -> Result<SpecialistOutput>;
}

/// Specialist backed by the content service, one per category.
pub struct ContentSpecialist {
    category: RouteCategory,
    service: Arc<dyn ContentService>,
}

impl ContentSpecialist {
    pub fn new(category: RouteCategory, service: Arc<dyn ContentService>) -> Self {
        Self { category, service }
    }
}

#[async_trait]
impl Specialist for ContentSpecialist {
    fn category(&self) -> RouteCategory {
        self.category
    }

    async fn analyze(&self, item: &ContentItem) -> Result<SpecialistOutput> {
        let service = self.service.as_ref();
        let context = json!({ "title": item.title, "content": item.content });

        let output = match self.category {
            RouteCategory::Earnings => SpecialistOutput::Earnings(
                content::generate(
                    service,
                    ContentTask::SpecialistEarnings,
                    "As an earnings specialist, analyze revenue, profitability, growth and guidance.",
                    context,
                )
                .await?,
            ),
            RouteCategory::News => SpecialistOutput::News(
                content::generate(
                    service,
                    ContentTask::SpecialistNews,
                    "As a news specialist, assess the event, its market impact and the credibility of the source.",
                    context,
                )
                .await?,
            ),
            RouteCategory::Market => SpecialistOutput::Market(
                content::generate(
                    service,
                    ContentTask::SpecialistMarket,
                    "As a market specialist, describe trend, technicals, sentiment, risks and outlook.",
                    context,
                )
                .await?,
            ),
        };
        Ok(output)
    }
}

/// Exactly one specialist per category.
#[derive(Default, Clone)]
pub struct SpecialistRegistry {
    handlers: HashMap<RouteCategory, Arc<dyn Specialist>>,
}

impl SpecialistRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content-service specialists for every category.
    pub fn standard(service: Arc<dyn ContentService>) -> Self {
        let handlers = RouteCategory::ALL
            .into_iter()
            .map(|c| (c, Arc::new(ContentSpecialist::new(c, service.clone())) as Arc<dyn Specialist>))
            .collect();
        Self { handlers }
    }

    pub fn register(&mut self, specialist: Arc<dyn Specialist>) -> Result<()> {
        let category = specialist.category();
        if self.handlers.contains_key(&category) {
            return Err(OrchestrationError::ConfigurationError(format!(
                "a specialist for '{}' is already registered",
                category
            )));
        }
        self.handlers.insert(category, specialist);
        Ok(())
    }

    pub fn get(&self, category: RouteCategory) -> Option<Arc<dyn Specialist>> {
        self.handlers.get(&category).cloned()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedItem {
    pub decision: RoutingDecision,
    pub output: SpecialistOutput,
}

/// Outcome of one batch item; exactly one of `routed` and `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItemResult {
    pub title: String,
    pub routed: Option<RoutedItem>,
    pub error: Option<String>,
}

impl BatchItemResult {
    pub fn is_success(&self) -> bool {
        self.routed.is_some()
    }
}

pub struct RoutingClassifier {
    service: Arc<dyn ContentService>,
    specialists: SpecialistRegistry,
}

impl RoutingClassifier {
    pub fn new(service: Arc<dyn ContentService>, specialists: SpecialistRegistry) -> Self {
        Self { service, specialists }
    }

    pub async fn route(&self, content: &str, title: &str) -> Result<RoutingDecision> {
        if content.trim().is_empty() {
            return Err(OrchestrationError::InvalidInput("content to route is empty".to_string()));
        }

        let answer: RouteAnswer = content::generate(
            self.service.as_ref(),
            ContentTask::Route,
            "Classify this content into exactly one category and explain why.",
            json!({
                "title": title,
                "content": content,
                "categories": RouteCategory::ALL,
            }),
        )
        .await?;

        let category = answer
            .route
            .parse::<RouteCategory>()
            .map_err(|detail| OrchestrationError::schema(RouteAnswer::SCHEMA.name, detail))?;

        info!(title, route = %category, confidence = answer.confidence, "Routed content");

        Ok(RoutingDecision {
            category,
            confidence: answer.confidence,
            rationale: answer.reasoning,
        })
    }

    pub async fn dispatch(&self, decision: &RoutingDecision, item: &ContentItem) -> Result<SpecialistOutput> {
        let specialist = self.specialists.get(decision.category).ok_or_else(|| {
            OrchestrationError::ConfigurationError(format!(
                "no specialist registered for '{}'",
                decision.category
            ))
        })?;
        specialist.analyze(item).await
    }

    pub async fn process(&self, item: &ContentItem) -> Result<RoutedItem> {
        let decision = self.route(&item.content, &item.title).await?;
        let output = self.dispatch(&decision, item).await?;
        Ok(RoutedItem { decision, output })
    }

    /// Route and dispatch every item independently. Item failures are
    /// recorded in place; a configuration error aborts the batch.
    pub async fn process_batch(&self, items: &[ContentItem]) -> Result<Vec<BatchItemResult>> {
        let mut results = Vec::with_capacity(items.len());

        for item in items {
            let result = match self.process(item).await {
                Ok(routed) => BatchItemResult {
                    title: item.title.clone(),
                    routed: Some(routed),
                    error: None,
                },
                Err(e) if e.is_configuration() => return Err(e),
                Err(e) => {
                    warn!(title = %item.title, error = %e, "Batch item failed");
                    BatchItemResult {
                        title: item.title.clone(),
                        routed: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(result);
        }

        info!(
            items = results.len(),
            succeeded = results.iter().filter(|r| r.is_success()).count(),
            "Batch routing complete"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ScriptedContentService;

    fn earnings_answer() -> serde_json::Value {
        json!({
            "revenue_analysis": "Revenue up 12%",
            "profitability": "Margins expanded",
            "growth_prospects": "Cloud demand",
            "guidance": "Raised",
            "key_metrics": ["EPS $2.10"],
            "recommendation": "Buy"
        })
    }

    fn route_answer(route: &str) -> serde_json::Value {
        json!({"route": route, "confidence": 0.9, "reasoning": "mentions quarterly results"})
    }

    #[tokio::test]
    async fn test_route_and_dispatch() {
        let service = Arc::new(
            ScriptedContentService::new()
                .with_response(ContentTask::Route, route_answer("Earnings"))
                .with_response(ContentTask::SpecialistEarnings, earnings_answer()),
        );
        let classifier = RoutingClassifier::new(service.clone(), SpecialistRegistry::standard(service));

        let routed = classifier
            .process(&ContentItem::new("Q3 results", "Acme reported EPS of $2.10"))
            .await
            .unwrap();

        assert_eq!(routed.decision.category, RouteCategory::Earnings);
        assert_eq!(routed.output.category(), RouteCategory::Earnings);
    }

    #[tokio::test]
    async fn test_out_of_taxonomy_route_is_schema_violation() {
        let service = Arc::new(ScriptedContentService::new().with_response(ContentTask::Route, route_answer("sports")));
        let classifier = RoutingClassifier::new(service.clone(), SpecialistRegistry::standard(service));

        let err = classifier.route("Team wins cup", "Sports").await.unwrap_err();
        assert!(matches!(err, OrchestrationError::SchemaViolation { schema: "routing_decision", .. }));
    }

    #[tokio::test]
    async fn test_confidence_out_of_range() {
        let service = Arc::new(ScriptedContentService::new().with_response(
            ContentTask::Route,
            json!({"route": "news", "confidence": 1.7, "reasoning": ""}),
        ));
        let classifier = RoutingClassifier::new(service.clone(), SpecialistRegistry::standard(service));
        assert!(classifier.route("Fed holds rates", "Fed").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_specialist_is_configuration_error() {
        let service = Arc::new(ScriptedContentService::new());
        let classifier = RoutingClassifier::new(service, SpecialistRegistry::new());
        let decision = RoutingDecision {
            category: RouteCategory::Market,
            confidence: 0.8,
            rationale: String::new(),
        };
        let err = classifier
            .dispatch(&decision, &ContentItem::new("t", "c"))
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let service: Arc<dyn ContentService> = Arc::new(ScriptedContentService::new());
        let mut registry = SpecialistRegistry::standard(service.clone());
        let err = registry
            .register(Arc::new(ContentSpecialist::new(RouteCategory::News, service)))
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_batch_isolates_item_failures() {
        let service = Arc::new(
            ScriptedContentService::new()
                .with_response(ContentTask::Route, route_answer("earnings"))
                .with_response(ContentTask::Route, route_answer("crypto"))
                .with_response(ContentTask::Route, route_answer("earnings"))
                .with_default(ContentTask::SpecialistEarnings, earnings_answer()),
        );
        let classifier = RoutingClassifier::new(service.clone(), SpecialistRegistry::standard(service));

        let items = vec![
            ContentItem::new("a", "EPS beat"),
            ContentItem::new("b", "Bitcoin rallies"),
            ContentItem::new("c", "Revenue miss"),
        ];
        let results = classifier.process_batch(&items).await.unwrap();

        assert_eq!(results.len(), 3);
        assert!(results[0].is_success());
        assert!(!results[1].is_success());
        assert!(results[1].error.as_deref().unwrap().contains("taxonomy"));
        assert!(results[2].is_success());
    }

    #[tokio::test]
    async fn test_batch_aborts_on_configuration_error() {
        let service = Arc::new(ScriptedContentService::new().with_default(ContentTask::Route, route_answer("market")));
        let classifier = RoutingClassifier::new(service, SpecialistRegistry::new());
        let items = vec![ContentItem::new("a", "S&P at record"), ContentItem::new("b", "VIX spikes")];
        assert!(classifier.process_batch(&items).await.is_err());
    }
}
