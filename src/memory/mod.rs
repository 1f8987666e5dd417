//! Cross-run agent memory
//!
//! An append-only log of what past runs learned. Planning reads the whole
//! log and folds it into a `LearnedContext`; an unreadable store means
//! planning proceeds with no prior learnings.

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub mod file;
pub mod postgres;

pub use file::FileMemoryStore;
pub use postgres::PostgresMemoryStore;

const MAX_LEARNED_ITEMS: usize = 8;

/// One past run's feedback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryRecord {
    pub run_id: Uuid,
    pub ticker: String,
    pub recorded_at: DateTime<Utc>,
    pub recommendations: Vec<String>,
    pub gaps: Vec<String>,
    pub completeness: f64,
    pub confidence: f64,
    pub data_quality: f64,
}

/// Append-only persisted sequence of `MemoryRecord`s.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn append(&self, record: &MemoryRecord) -> Result<()>;

    /// Every record, oldest first.
    async fn load_all(&self) -> Result<Vec<MemoryRecord>>;

    fn backend_name(&self) -> &'static str;
}

#[derive(Default, Clone)]
pub struct InMemoryMemoryStore {
    records: Arc<RwLock<Vec<MemoryRecord>>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn append(&self, record: &MemoryRecord) -> Result<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<MemoryRecord>> {
        Ok(self.records.read().await.clone())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// What planning knows from earlier runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LearnedContext {
    pub past_runs: usize,
    /// Deduplicated, most recent first.
    pub recommendations: Vec<String>,
    pub gaps: Vec<String>,
    pub mean_completeness: Option<f64>,
    pub mean_confidence: Option<f64>,
    pub mean_data_quality: Option<f64>,
}

impl LearnedContext {
    pub fn fold(records: &[MemoryRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }

        let n = records.len() as f64;
        let mean = |f: fn(&MemoryRecord) -> f64| Some(records.iter().map(f).sum::<f64>() / n);

        Self {
            past_runs: records.len(),
            recommendations: recent_unique(records.iter().rev().map(|r| r.recommendations.as_slice())),
            gaps: recent_unique(records.iter().rev().map(|r| r.gaps.as_slice())),
            mean_completeness: mean(|r| r.completeness),
            mean_confidence: mean(|r| r.confidence),
            mean_data_quality: mean(|r| r.data_quality),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.past_runs == 0
    }

    /// Prompt-ready text; empty when nothing has been learned yet.
    pub fn render(&self) -> String {
        if self.is_empty() {
            return String::new();
        }

        let mut out = format!("Learnings from {} previous research run(s):\n", self.past_runs);
        if let (Some(c), Some(k), Some(d)) = (self.mean_completeness, self.mean_confidence, self.mean_data_quality) {
            let _ = writeln!(
                out,
                "Average scores: completeness {:.0}, confidence {:.0}, data quality {:.0}",
                c, k, d
            );
        }
        if !self.recommendations.is_empty() {
            out.push_str("Improvements to apply:\n");
            for r in &self.recommendations {
                let _ = writeln!(out, "- {}", r);
            }
        }
        if !self.gaps.is_empty() {
            out.push_str("Gaps seen before:\n");
            for g in &self.gaps {
                let _ = writeln!(out, "- {}", g);
            }
        }
        out
    }
}

fn recent_unique<'a>(groups: impl Iterator<Item = &'a [String]>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in groups.flatten() {
        let trimmed = item.trim();
        if trimmed.is_empty() || !seen.insert(trimmed.to_lowercase()) {
            continue;
        }
        out.push(trimmed.to_string());
        if out.len() == MAX_LEARNED_ITEMS {
            break;
        }
    }
    out
}

#[cfg(test)]
pub(crate) fn sample_record(ticker: &str, recommendation: &str, completeness: f64) -> MemoryRecord {
    MemoryRecord {
        run_id: Uuid::new_v4(),
        ticker: ticker.to_string(),
        recorded_at: Utc::now(),
        recommendations: vec![recommendation.to_string()],
        gaps: vec!["no peer comparison".to_string()],
        completeness,
        confidence: 70.0,
        data_quality: 60.0,
    }
}
