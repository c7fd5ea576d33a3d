//! Service cache: one constructed [`Orchestrator`] per pipeline name,
//! invalidated whenever [`crate::config::ConfigStore`] mutates that
//! pipeline. Backed by a `tokio::sync::Mutex`-guarded map; invalidation is
//! driven by [`crate::api`] immediately after every config mutation
//! succeeds.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::ConfigStore;
use crate::embedder::{create_embedder, Embedder};
use crate::error::Result;
use crate::llm_filter::{LlmFilter, OpenAiCompatFilter};
use crate::models::PipelineConfig;
use crate::orchestrator::Orchestrator;
use crate::pool::ConnectionPool;
use crate::reranker::{HttpReranker, Reranker};
use crate::vector_store::{MilvusVectorStore, VectorStore};

pub struct ServiceCache {
    config: Arc<ConfigStore>,
    pool: Arc<ConnectionPool>,
    orchestrators: Mutex<HashMap<String, Arc<Orchestrator>>>,
}

impl ServiceCache {
    pub fn new(config: Arc<ConfigStore>, pool: Arc<ConnectionPool>) -> Self {
        Self {
            config,
            pool,
            orchestrators: Mutex::new(HashMap::new()),
        }
    }

    /// Return the orchestrator for `name` (or the current default),
    /// constructing and caching one if absent.
    pub async fn get(&self, name: Option<&str>) -> Result<Arc<Orchestrator>> {
        let snapshot = self.config.list().await?;
        let resolved = name.unwrap_or(&snapshot.default).to_string();

        let mut cache = self.orchestrators.lock().await;
        if let Some(orchestrator) = cache.get(&resolved) {
            return Ok(Arc::clone(orchestrator));
        }

        let config = self.config.get(Some(&resolved)).await?;
        let orchestrator = Arc::new(self.build(&resolved, &config)?);
        cache.insert(resolved, Arc::clone(&orchestrator));
        Ok(orchestrator)
    }

    fn build(&self, name: &str, config: &PipelineConfig) -> Result<Orchestrator> {
        let mut embedders: Vec<Arc<dyn Embedder>> = Vec::with_capacity(config.embedding_models.len());
        for spec in &config.embedding_models {
            let embedder = create_embedder(spec).map_err(|e| {
                crate::error::RetrievalError::invalid_config(
                    format!("pipelines.{name}.embedding_models"),
                    e.to_string(),
                )
            })?;
            embedders.push(Arc::from(embedder));
        }

        let vector_store: Arc<dyn VectorStore> = Arc::new(MilvusVectorStore::new(
            Arc::clone(&self.pool),
            config.milvus.clone(),
        ));
        let reranker: Arc<dyn Reranker> = Arc::new(HttpReranker::new(config.rerank.clone()));
        let llm_filter: Arc<dyn LlmFilter> = Arc::new(OpenAiCompatFilter::new(config.llm_filter.clone()));

        Ok(Orchestrator::new(
            name.to_string(),
            embedders,
            vector_store,
            reranker,
            llm_filter,
            config.retrieval.clone(),
            config.chunk_sizes.clone(),
        ))
    }

    /// Drop the cached orchestrator for `name`, or every cached orchestrator
    /// when `name` is `None`. Called after every successful config mutation
    /// and at shutdown (followed by [`ConnectionPool::close_all`]).
    pub async fn invalidate(&self, name: Option<&str>) {
        let mut cache = self.orchestrators.lock().await;
        match name {
            Some(n) => {
                cache.remove(n);
            }
            None => cache.clear(),
        }
    }
}
