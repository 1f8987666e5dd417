//! Raw data collaborators
//!
//! Quotes, news and background text are fetched as opaque text. The core
//! passes payloads through to the content service without parsing them.

use crate::error::OrchestrationError;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;

const MAX_CONTENT_CHARS: usize = 8000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FetchKind {
    Quote,
    News,
    Background,
}

impl FetchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchKind::Quote => "quote",
            FetchKind::News => "news",
            FetchKind::Background => "background",
        }
    }
}

impl fmt::Display for FetchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchQuery {
    pub kind: FetchKind,
    pub subject: String,
}

impl FetchQuery {
    pub fn new(kind: FetchKind, subject: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedData {
    pub kind: FetchKind,
    pub subject: String,
    pub source: String,
    pub content: String,
    pub fetched_at: DateTime<Utc>,
}

/// Source of raw research text.
#[async_trait]
pub trait DataFetcher: Send + Sync {
    async fn fetch(&self, query: &FetchQuery) -> Result<FetchedData>;
}

fn no_data(query: &FetchQuery) -> OrchestrationError {
    OrchestrationError::DataFetch(format!(
        "No relevant {} data found for {}",
        query.kind, query.subject
    ))
}

/// Fetches from a research data API at `{base_url}/api/v1/research/{kind}`.
#[derive(Clone)]
pub struct HttpDataFetcher {
    client: Client,
    base_url: String,
}

impl HttpDataFetcher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                OrchestrationError::DataFetch(format!("Data API request failed for {}: {}", path, e))
            })?;

        let status = response.status();
        let body = response
            .json::<Value>()
            .await
            .map_err(|e| OrchestrationError::DataFetch(format!("Invalid JSON response: {}", e)))?;

        if !status.is_success() {
            return Err(OrchestrationError::DataFetch(format!(
                "Data API returned {} for {}: {}",
                status, path, body
            )));
        }

        Ok(body)
    }
}

#[async_trait]
impl DataFetcher for HttpDataFetcher {
    async fn fetch(&self, query: &FetchQuery) -> Result<FetchedData> {
        let path = format!("/api/v1/research/{}", query.kind);
        let body = self
            .post_json(&path, &json!({ "subject": query.subject }))
            .await?;

        let content = match body.get("content") {
            Some(Value::String(text)) => text.clone(),
            Some(other) => serde_json::to_string_pretty(other)?,
            None => serde_json::to_string_pretty(&body)?,
        };

        if content.trim().is_empty() {
            return Err(no_data(query));
        }

        let source = body
            .get("source")
            .and_then(Value::as_str)
            .unwrap_or("data_api")
            .to_string();

        debug!(kind = %query.kind, subject = %query.subject, chars = content.len(), "Fetched research data");

        Ok(FetchedData {
            kind: query.kind,
            subject: query.subject.clone(),
            source,
            content: content.chars().take(MAX_CONTENT_CHARS).collect(),
            fetched_at: Utc::now(),
        })
    }
}

/// In-memory documents keyed by kind and subject (case-insensitive).
#[derive(Default, Clone)]
pub struct StaticDataFetcher {
    documents: HashMap<(FetchKind, String), String>,
}

impl StaticDataFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, kind: FetchKind, subject: &str, content: &str) -> Self {
        self.documents
            .insert((kind, subject.trim().to_lowercase()), content.to_string());
        self
    }
}

#[async_trait]
impl DataFetcher for StaticDataFetcher {
    async fn fetch(&self, query: &FetchQuery) -> Result<FetchedData> {
        let key = (query.kind, query.subject.trim().to_lowercase());
        let content = self
            .documents
            .get(&key)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| no_data(query))?;

        Ok(FetchedData {
            kind: query.kind,
            subject: query.subject.clone(),
            source: "static".to_string(),
            content: content.clone(),
            fetched_at: Utc::now(),
        })
    }
}
