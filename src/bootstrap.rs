//! Builds a ready orchestrator from `AgentConfig`.

use crate::agent::{OrchestratorSettings, ResearchOrchestrator};
use crate::config::{AgentConfig, MemoryBackendKind};
use crate::content::{ContentService, GeminiClient, GeminiContentService, OfflineContentService};
use crate::fetch::{DataFetcher, HttpDataFetcher, StaticDataFetcher};
use crate::memory::{FileMemoryStore, InMemoryMemoryStore, MemoryStore, PostgresMemoryStore};
use crate::Result;
use std::sync::Arc;
use tracing::{info, warn};

pub fn content_service(config: &AgentConfig) -> Result<Arc<dyn ContentService>> {
    if config.has_gemini_key() {
        let client = GeminiClient::new(config.gemini_api_key.clone(), &config.gemini_model, config.content_timeout)?;
        info!(model = %config.gemini_model, "Using Gemini content service");
        Ok(Arc::new(GeminiContentService::new(client)))
    } else {
        warn!("GEMINI_API_KEY not set, using the offline content service");
        Ok(Arc::new(OfflineContentService::new()))
    }
}

pub fn data_fetcher(config: &AgentConfig) -> Result<Arc<dyn DataFetcher>> {
    match &config.data_api_base_url {
        Some(url) => {
            info!(base_url = %url, "Using HTTP data fetcher");
            Ok(Arc::new(HttpDataFetcher::new(url, config.tool_timeout)?))
        }
        None => {
            warn!("DATA_API_BASE_URL not set, fetches will find no documents");
            Ok(Arc::new(StaticDataFetcher::new()))
        }
    }
}

pub fn memory_store(config: &AgentConfig) -> Result<Arc<dyn MemoryStore>> {
    let store: Arc<dyn MemoryStore> = match &config.memory {
        MemoryBackendKind::File(path) => Arc::new(FileMemoryStore::new(path.clone())),
        MemoryBackendKind::Postgres(url) => Arc::new(PostgresMemoryStore::connect_lazy(url)?),
        MemoryBackendKind::InMemory => Arc::new(InMemoryMemoryStore::new()),
    };
    info!(backend = store.backend_name(), "Memory store ready");
    Ok(store)
}

pub fn build_orchestrator(config: &AgentConfig) -> Result<ResearchOrchestrator> {
    Ok(ResearchOrchestrator::new(
        content_service(config)?,
        data_fetcher(config)?,
        memory_store(config)?,
        OrchestratorSettings::from(config),
    ))
}
