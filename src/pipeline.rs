//! Five-stage news pipeline
//!
//! ingest -> preprocess -> classify -> extract -> summarize
//!
//! Each stage consumes only the previous stage's record plus the source
//! metadata captured at ingest. The first failing stage aborts the item and
//! is named in the returned error.

use crate::content::{self, check_unit_interval, ContentService, ContentTask, SchemaDescriptor, StructuredOutput};
use crate::error::OrchestrationError;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Ingest,
    Preprocess,
    Classify,
    Extract,
    Summarize,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Ingest => "ingest",
            PipelineStage::Preprocess => "preprocess",
            PipelineStage::Classify => "classify",
            PipelineStage::Extract => "extract",
            PipelineStage::Summarize => "summarize",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn failed_at(stage: PipelineStage) -> impl FnOnce(OrchestrationError) -> OrchestrationError {
    move |source| OrchestrationError::StageFailed {
        stage,
        source: Box::new(source),
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NewsCategory {
    Earnings,
    MarketAnalysis,
    Policy,
    MergerAcquisition,
    General,
}

impl NewsCategory {
    pub const ALL: [NewsCategory; 5] = [
        NewsCategory::Earnings,
        NewsCategory::MarketAnalysis,
        NewsCategory::Policy,
        NewsCategory::MergerAcquisition,
        NewsCategory::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NewsCategory::Earnings => "earnings",
            NewsCategory::MarketAnalysis => "market_analysis",
            NewsCategory::Policy => "policy",
            NewsCategory::MergerAcquisition => "merger_acquisition",
            NewsCategory::General => "general",
        }
    }
}

impl FromStr for NewsCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        NewsCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == lowered)
            .ok_or_else(|| format!("unknown news category '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl FromStr for Sentiment {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "positive" => Ok(Sentiment::Positive),
            "negative" => Ok(Sentiment::Negative),
            "neutral" => Ok(Sentiment::Neutral),
            other => Err(format!("unknown sentiment '{}'", other)),
        }
    }
}

/// Carried unchanged from ingest to the final summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMeta {
    pub title: String,
    pub source: String,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsArticle {
    pub meta: SourceMeta,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessedNews {
    pub meta: SourceMeta,
    pub cleaned_text: String,
    pub word_count: usize,
    pub contains_financials: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedNews {
    pub meta: SourceMeta,
    pub cleaned_text: String,
    pub word_count: usize,
    pub category: NewsCategory,
    pub sentiment: Sentiment,
    pub relevance: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractedEntities {
    #[serde(default)]
    pub companies: Vec<String>,
    #[serde(default)]
    pub people: Vec<String>,
    #[serde(default)]
    pub financial_metrics: Vec<String>,
    #[serde(default)]
    pub key_events: Vec<String>,
    #[serde(default)]
    pub stock_symbols: Vec<String>,
}

impl ExtractedEntities {
    pub fn is_empty(&self) -> bool {
        self.companies.is_empty()
            && self.people.is_empty()
            && self.financial_metrics.is_empty()
            && self.key_events.is_empty()
            && self.stock_symbols.is_empty()
    }
}

impl StructuredOutput for ExtractedEntities {
    const SCHEMA: SchemaDescriptor = SchemaDescriptor {
        name: "news_entities",
        required_fields: &["companies", "people", "financial_metrics", "key_events", "stock_symbols"],
    };
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedNews {
    pub classified: ClassifiedNews,
    pub entities: ExtractedEntities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsSummary {
    pub title: String,
    pub source: String,
    pub category: NewsCategory,
    pub sentiment: Sentiment,
    pub relevance: f64,
    pub word_count: usize,
    pub entities: ExtractedEntities,
    pub headline: String,
    pub summary: String,
    pub investment_implications: String,
    pub key_takeaways: Vec<String>,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct PreprocessAnswer {
    cleaned_text: String,
}

impl StructuredOutput for PreprocessAnswer {
    const SCHEMA: SchemaDescriptor = SchemaDescriptor {
        name: "preprocessed_news",
        required_fields: &["cleaned_text"],
    };

    fn validate(&self) -> std::result::Result<(), String> {
        if self.cleaned_text.trim().is_empty() {
            return Err("cleaned_text is empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ClassifyAnswer {
    category: String,
    sentiment: String,
    relevance: f64,
}

impl StructuredOutput for ClassifyAnswer {
    const SCHEMA: SchemaDescriptor = SchemaDescriptor {
        name: "news_classification",
        required_fields: &["category", "sentiment", "relevance"],
    };

    fn validate(&self) -> std::result::Result<(), String> {
        self.category.parse::<NewsCategory>()?;
        self.sentiment.parse::<Sentiment>()?;
        check_unit_interval("relevance", self.relevance)
    }
}

#[derive(Debug, Deserialize)]
struct SummaryAnswer {
    headline: String,
    summary: String,
    investment_implications: String,
    #[serde(default)]
    key_takeaways: Vec<String>,
}

impl StructuredOutput for SummaryAnswer {
    const SCHEMA: SchemaDescriptor = SchemaDescriptor {
        name: "news_summary",
        required_fields: &["headline", "summary", "investment_implications"],
    };
}

const FINANCIAL_MARKERS: &[&str] = &[
    "$", "%", "revenue", "earnings", "eps", "profit", "margin", "guidance", "dividend", "billion", "million",
];

fn contains_financials(text: &str) -> bool {
    let lowered = text.to_lowercase();
    FINANCIAL_MARKERS.iter().any(|m| lowered.contains(m))
}

/// Wrap raw text into a record. The first non-empty line is the title.
pub fn ingest(raw: &str, source: &str) -> Result<NewsArticle> {
    let mut lines = raw.lines().map(str::trim).skip_while(|l| l.is_empty());
    let title = lines
        .next()
        .ok_or_else(|| OrchestrationError::InvalidInput("raw news is empty".to_string()))?
        .to_string();
    let rest = lines.collect::<Vec<_>>().join("\n").trim().to_string();

    Ok(NewsArticle {
        meta: SourceMeta {
            title: title.clone(),
            source: source.to_string(),
            ingested_at: Utc::now(),
        },
        body: if rest.is_empty() { title } else { rest },
    })
}

pub struct SequentialPipeline {
    service: Arc<dyn ContentService>,
}

impl SequentialPipeline {
    pub fn new(service: Arc<dyn ContentService>) -> Self {
        Self { service }
    }

    pub async fn run(&self, raw_news: &str, source: &str) -> Result<NewsSummary> {
        let article = ingest(raw_news, source).map_err(failed_at(PipelineStage::Ingest))?;
        debug!(title = %article.meta.title, "Ingested");

        let preprocessed = self
            .preprocess(article)
            .await
            .map_err(failed_at(PipelineStage::Preprocess))?;
        debug!(words = preprocessed.word_count, "Preprocessed");

        let classified = self
            .classify(preprocessed)
            .await
            .map_err(failed_at(PipelineStage::Classify))?;
        debug!(category = classified.category.as_str(), "Classified");

        let extracted = self
            .extract(classified)
            .await
            .map_err(failed_at(PipelineStage::Extract))?;

        let summary = self
            .summarize(extracted)
            .await
            .map_err(failed_at(PipelineStage::Summarize))?;

        info!(
            title = %summary.title,
            source = %summary.source,
            category = summary.category.as_str(),
            "Pipeline complete"
        );
        Ok(summary)
    }

    async fn preprocess(&self, article: NewsArticle) -> Result<PreprocessedNews> {
        let answer: PreprocessAnswer = content::generate(
            self.service.as_ref(),
            ContentTask::Preprocess,
            "Clean this news text: remove boilerplate, fix whitespace, keep every fact and figure.",
            json!({ "title": article.meta.title, "text": article.body }),
        )
        .await?;

        let cleaned_text = answer.cleaned_text.trim().to_string();
        Ok(PreprocessedNews {
            word_count: cleaned_text.split_whitespace().count(),
            contains_financials: contains_financials(&cleaned_text),
            cleaned_text,
            meta: article.meta,
        })
    }

    async fn classify(&self, news: PreprocessedNews) -> Result<ClassifiedNews> {
        let answer: ClassifyAnswer = content::generate(
            self.service.as_ref(),
            ContentTask::Classify,
            "Classify this news item by category and sentiment and rate its investment relevance.",
            json!({
                "title": news.meta.title,
                "text": news.cleaned_text,
                "contains_financials": news.contains_financials,
                "categories": NewsCategory::ALL,
            }),
        )
        .await?;

        Ok(ClassifiedNews {
            category: answer
                .category
                .parse()
                .map_err(|e: String| OrchestrationError::schema(ClassifyAnswer::SCHEMA.name, e))?,
            sentiment: answer
                .sentiment
                .parse()
                .map_err(|e: String| OrchestrationError::schema(ClassifyAnswer::SCHEMA.name, e))?,
            relevance: answer.relevance,
            meta: news.meta,
            cleaned_text: news.cleaned_text,
            word_count: news.word_count,
        })
    }

    async fn extract(&self, classified: ClassifiedNews) -> Result<ExtractedNews> {
        let entities: ExtractedEntities = content::generate(
            self.service.as_ref(),
            ContentTask::Extract,
            "Extract companies, people, financial metrics, key events and stock symbols.",
            json!({
                "title": classified.meta.title,
                "text": classified.cleaned_text,
                "category": classified.category,
            }),
        )
        .await?;

        Ok(ExtractedNews { classified, entities })
    }

    async fn summarize(&self, extracted: ExtractedNews) -> Result<NewsSummary> {
        let classified = &extracted.classified;
        let answer: SummaryAnswer = content::generate(
            self.service.as_ref(),
            ContentTask::Summarize,
            "Write an investment-focused summary of this news item.",
            json!({
                "title": classified.meta.title,
                "source": classified.meta.source,
                "text": classified.cleaned_text,
                "category": classified.category,
                "sentiment": classified.sentiment,
                "relevance": classified.relevance,
                "entities": extracted.entities,
            }),
        )
        .await?;

        let ExtractedNews { classified, entities } = extracted;
        Ok(NewsSummary {
            title: classified.meta.title,
            source: classified.meta.source,
            category: classified.category,
            sentiment: classified.sentiment,
            relevance: classified.relevance,
            word_count: classified.word_count,
            entities,
            headline: answer.headline,
            summary: answer.summary,
            investment_implications: answer.investment_implications,
            key_takeaways: answer.key_takeaways,
            processed_at: Utc::now(),
        })
    }
}
