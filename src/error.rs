//! Error types for the investment research agent

use thiserror::Error;

use crate::pipeline::PipelineStage;

/// Result type alias for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Core Taxonomy
    // =============================

    #[error("Schema violation in {schema}: {detail}")]
    SchemaViolation { schema: &'static str, detail: String },

    #[error("Tool failure: {0}")]
    ToolFailure(String),

    #[error("Planning failed: {0}")]
    PlanFailure(String),

    #[error("Memory unavailable: {0}")]
    MemoryUnavailable(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    // =============================
    // Workflow Errors
    // =============================

    #[error("Pipeline stage '{stage}' failed: {source}")]
    StageFailed {
        stage: PipelineStage,
        #[source]
        source: Box<OrchestrationError>,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Content service error: {0}")]
    ContentService(String),

    #[error("Data fetch error: {0}")]
    DataFetch(String),

    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestrationError {
    pub fn schema(schema: &'static str, detail: impl Into<String>) -> Self {
        OrchestrationError::SchemaViolation {
            schema,
            detail: detail.into(),
        }
    }

    /// Setup defects are never worth isolating or retrying.
    pub fn is_configuration(&self) -> bool {
        matches!(self, OrchestrationError::ConfigurationError(_))
    }
}
