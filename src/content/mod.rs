//! Content service contract
//!
//! Every natural-language step (planning, extraction, routing, scoring,
//! rewriting) goes through a single `ContentService`. The service returns a
//! JSON value; callers declare the schema they expect and `generate` turns
//! anything that does not conform into a `SchemaViolation`.

use crate::error::OrchestrationError;
use crate::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::debug;

pub mod gemini;
pub mod offline;
pub mod stub;

pub use gemini::{GeminiClient, GeminiContentService};
pub use offline::OfflineContentService;
pub use stub::ScriptedContentService;

/// Call sites that talk to the content service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContentTask {
    Plan,
    ExtractRelations,
    NarrateGraph,
    Route,
    SpecialistEarnings,
    SpecialistNews,
    SpecialistMarket,
    Preprocess,
    Classify,
    Extract,
    Summarize,
    GenerateAnalysis,
    EvaluateAnalysis,
    RefineAnalysis,
    Reflect,
}

impl ContentTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentTask::Plan => "plan",
            ContentTask::ExtractRelations => "extract_relations",
            ContentTask::NarrateGraph => "narrate_graph",
            ContentTask::Route => "route",
            ContentTask::SpecialistEarnings => "specialist_earnings",
            ContentTask::SpecialistNews => "specialist_news",
            ContentTask::SpecialistMarket => "specialist_market",
            ContentTask::Preprocess => "preprocess",
            ContentTask::Classify => "classify",
            ContentTask::Extract => "extract",
            ContentTask::Summarize => "summarize",
            ContentTask::GenerateAnalysis => "generate_analysis",
            ContentTask::EvaluateAnalysis => "evaluate_analysis",
            ContentTask::RefineAnalysis => "refine_analysis",
            ContentTask::Reflect => "reflect",
        }
    }
}

impl fmt::Display for ContentTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Describes the shape a caller expects back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaDescriptor {
    pub name: &'static str,
    pub required_fields: &'static [&'static str],
}

impl SchemaDescriptor {
    /// Fields missing from `value`, or all of them if `value` is not an object.
    pub fn missing_fields(&self, value: &Value) -> Vec<&'static str> {
        match value.as_object() {
            Some(obj) => self
                .required_fields
                .iter()
                .filter(|f| obj.get(**f).map_or(true, Value::is_null))
                .copied()
                .collect(),
            None => self.required_fields.to_vec(),
        }
    }
}

/// A single request to the content service.
#[derive(Debug, Clone)]
pub struct ContentRequest {
    pub task: ContentTask,
    pub instructions: String,
    pub context: Value,
    pub schema: SchemaDescriptor,
}

impl ContentRequest {
    /// Convenience accessor for string fields of the prompt context.
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(Value::as_str)
    }
}

/// The structured-generation collaborator.
#[async_trait]
pub trait ContentService: Send + Sync {
    async fn invoke(&self, request: &ContentRequest) -> Result<Value>;
}

/// Typed output of a content-service call.
pub trait StructuredOutput: DeserializeOwned {
    const SCHEMA: SchemaDescriptor;

    /// Range and taxonomy checks beyond what deserialization enforces.
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Invoke the service and coerce its answer into `T`, or fail loudly.
pub async fn generate<T: StructuredOutput>(
    service: &dyn ContentService,
    task: ContentTask,
    instructions: impl Into<String>,
    context: Value,
) -> Result<T> {
    let request = ContentRequest {
        task,
        instructions: instructions.into(),
        context,
        schema: T::SCHEMA,
    };

    let value = service.invoke(&request).await?;
    debug!(task = %task, schema = T::SCHEMA.name, "Content service responded");

    let missing = T::SCHEMA.missing_fields(&value);
    if !missing.is_empty() {
        return Err(OrchestrationError::schema(
            T::SCHEMA.name,
            format!("missing required field(s): {}", missing.join(", ")),
        ));
    }

    let output: T = serde_json::from_value(value)
        .map_err(|e| OrchestrationError::schema(T::SCHEMA.name, e.to_string()))?;

    output
        .validate()
        .map_err(|detail| OrchestrationError::schema(T::SCHEMA.name, detail))?;

    Ok(output)
}

pub(crate) fn check_unit_interval(field: &str, value: f64) -> std::result::Result<(), String> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(format!("{} must be within [0, 1], got {}", field, value))
    }
}

pub(crate) fn check_percent(field: &str, value: f64) -> std::result::Result<(), String> {
    if (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(format!("{} must be within [0, 100], got {}", field, value))
    }
}
