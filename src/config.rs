//! Environment-driven configuration

use crate::error::OrchestrationError;
use crate::graph::MAX_GRAPH_DEPTH;
use crate::optimizer::{DEFAULT_MAX_ITERATIONS, DEFAULT_QUALITY_THRESHOLD};
use crate::Result;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_MEMORY_PATH: &str = "./data/agent_memory.jsonl";
const DEFAULT_GRAPH_DEPTH: u32 = 2;
const DEFAULT_CONTENT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 120;
const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone, PartialEq)]
pub enum MemoryBackendKind {
    File(PathBuf),
    Postgres(String),
    InMemory,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Empty means "use the offline content service".
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub content_timeout: Duration,
    pub data_api_base_url: Option<String>,
    pub memory: MemoryBackendKind,
    pub graph_max_depth: u32,
    pub eo_max_iterations: u32,
    pub eo_quality_threshold: f64,
    pub tool_timeout: Duration,
    pub port: u16,
    pub log_level: String,
}

impl AgentConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let memory = match get("MEMORY_BACKEND").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("file") => MemoryBackendKind::File(PathBuf::from(
                get("MEMORY_PATH").unwrap_or_else(|| DEFAULT_MEMORY_PATH.to_string()),
            )),
            Some("postgres") => {
                let url = get("DATABASE_URL").or_else(|| get("POSTGRES_URL")).ok_or_else(|| {
                    OrchestrationError::ConfigurationError(
                        "MEMORY_BACKEND=postgres requires DATABASE_URL or POSTGRES_URL".to_string(),
                    )
                })?;
                MemoryBackendKind::Postgres(url)
            }
            Some("memory") => MemoryBackendKind::InMemory,
            Some(other) => {
                return Err(OrchestrationError::ConfigurationError(format!(
                    "unknown MEMORY_BACKEND '{}' (expected file, postgres or memory)",
                    other
                )))
            }
        };

        let graph_max_depth = parse_or(&get, "GRAPH_MAX_DEPTH", DEFAULT_GRAPH_DEPTH)?;
        if !(1..=MAX_GRAPH_DEPTH).contains(&graph_max_depth) {
            return Err(OrchestrationError::ConfigurationError(format!(
                "GRAPH_MAX_DEPTH must be within 1..={}, got {}",
                MAX_GRAPH_DEPTH, graph_max_depth
            )));
        }

        let eo_max_iterations = parse_or(&get, "EO_MAX_ITERATIONS", DEFAULT_MAX_ITERATIONS)?;
        if eo_max_iterations == 0 {
            return Err(OrchestrationError::ConfigurationError(
                "EO_MAX_ITERATIONS must be at least 1".to_string(),
            ));
        }

        let eo_quality_threshold = parse_or(&get, "EO_QUALITY_THRESHOLD", DEFAULT_QUALITY_THRESHOLD)?;
        if !(0.0..=100.0).contains(&eo_quality_threshold) {
            return Err(OrchestrationError::ConfigurationError(format!(
                "EO_QUALITY_THRESHOLD must be within [0, 100], got {}",
                eo_quality_threshold
            )));
        }

        let port = match get("PORT") {
            Some(_) => parse_or(&get, "PORT", DEFAULT_PORT)?,
            None => parse_or(&get, "API_PORT", DEFAULT_PORT)?,
        };

        Ok(Self {
            gemini_api_key: get("GEMINI_API_KEY").unwrap_or_default(),
            gemini_model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            content_timeout: Duration::from_secs(parse_or(&get, "CONTENT_TIMEOUT_SECS", DEFAULT_CONTENT_TIMEOUT_SECS)?),
            data_api_base_url: get("DATA_API_BASE_URL"),
            memory,
            graph_max_depth,
            eo_max_iterations,
            eo_quality_threshold,
            tool_timeout: Duration::from_secs(parse_or(&get, "TOOL_TIMEOUT_SECS", DEFAULT_TOOL_TIMEOUT_SECS)?),
            port,
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    pub fn has_gemini_key(&self) -> bool {
        !self.gemini_api_key.is_empty()
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| {
            OrchestrationError::ConfigurationError(format!("{} has invalid value '{}': {}", key, raw, e))
        }),
        None => Ok(default),
    }
}
