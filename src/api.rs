//! The transport-agnostic public API that both the HTTP layer and the CLI
//! drive. Two read operations over the retrieval hot path, plus
//! administrative CRUD over the config store that bypasses the service
//! cache except to invalidate it on mutation.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cache::ServiceCache;
use crate::config::ConfigStore;
use crate::error::Result;
use crate::models::{Chunk, PipelineConfig};
use crate::pool::ConnectionPool;
use crate::validator::{ValidationReport, Validator};

#[derive(Debug, Serialize)]
pub struct ChunkView {
    pub chunk_id: i64,
    pub text: String,
}

impl From<&Chunk> for ChunkView {
    fn from(c: &Chunk) -> Self {
        Self {
            chunk_id: c.chunk_id,
            text: c.text.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<ChunkView>,
}

#[derive(Debug, Serialize)]
pub struct DebugInfo {
    pub per_embedder: std::collections::BTreeMap<String, Vec<Chunk>>,
    pub deduplicated: Vec<Chunk>,
    pub reranked: Vec<Chunk>,
    pub filtered: Vec<Chunk>,
}

#[derive(Debug, Serialize)]
pub struct SearchDebugResponse {
    pub query: String,
    pub results: Vec<ChunkView>,
    pub debug: DebugInfo,
}

/// The wiring every retrieval-facing transport needs: config, cache,
/// connection pool, and an on-demand validator.
pub struct Api {
    config: Arc<ConfigStore>,
    cache: Arc<ServiceCache>,
    pool: Arc<ConnectionPool>,
    validator: Validator,
}

impl Api {
    pub fn new(config: Arc<ConfigStore>, cache: Arc<ServiceCache>, pool: Arc<ConnectionPool>) -> Self {
        let validator = Validator::new(Arc::clone(&pool));
        Self {
            config,
            cache,
            pool,
            validator,
        }
    }

    pub async fn search(&self, query: &str, pipeline_name: Option<&str>) -> Result<SearchResponse> {
        let orchestrator = self.cache.get(pipeline_name).await?;
        let outcome = orchestrator
            .retrieve(query, false, &CancellationToken::new())
            .await?;
        Ok(SearchResponse {
            query: outcome.query,
            results: outcome.results.iter().map(ChunkView::from).collect(),
        })
    }

    pub async fn search_debug(
        &self,
        query: &str,
        pipeline_name: Option<&str>,
    ) -> Result<SearchDebugResponse> {
        let orchestrator = self.cache.get(pipeline_name).await?;
        let outcome = orchestrator
            .retrieve(query, true, &CancellationToken::new())
            .await?;
        let debug = outcome.debug.unwrap_or_default();
        Ok(SearchDebugResponse {
            query: outcome.query,
            results: outcome.results.iter().map(ChunkView::from).collect(),
            debug: DebugInfo {
                per_embedder: debug.per_embedder,
                deduplicated: debug.deduplicated,
                reranked: debug.reranked,
                filtered: debug.filtered,
            },
        })
    }

    pub async fn list_pipelines(&self) -> Result<crate::config::Snapshot> {
        self.config.list().await
    }

    pub async fn get_pipeline(&self, name: Option<&str>) -> Result<PipelineConfig> {
        self.config.get(name).await
    }

    pub async fn upsert_pipeline(&self, name: &str, config_text: &str) -> Result<PipelineConfig> {
        let config = self.config.upsert(name, config_text).await?;
        self.cache.invalidate(Some(name)).await;
        Ok(config)
    }

    pub async fn delete_pipeline(&self, name: &str) -> Result<()> {
        self.config.delete(name).await?;
        self.cache.invalidate(Some(name)).await;
        Ok(())
    }

    pub async fn set_default_pipeline(&self, name: &str) -> Result<()> {
        self.config.set_default(name).await?;
        // Changes which pipeline `None` resolves to; a stale cache entry
        // under the old default name would otherwise keep serving it.
        self.cache.invalidate(None).await;
        Ok(())
    }

    pub async fn validate_pipeline(&self, name: Option<&str>) -> Result<ValidationReport> {
        let config = self.config.get(name).await?;
        Ok(self.validator.validate(&config).await)
    }

    /// Invoked at service shutdown: drops every cached orchestrator, then
    /// every pooled connection.
    pub async fn shutdown(&self) {
        self.cache.invalidate(None).await;
        self.pool.close_all().await;
    }
}
