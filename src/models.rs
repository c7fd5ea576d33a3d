//! Core value types: [`Chunk`], [`Query`], and the pipeline configuration
//! entities that [`crate::config`] loads from YAML.

use serde::{Deserialize, Serialize};

/// A unit of retrieved text, identified by a `chunk_id` minted by the
/// separate indexing service that populates the vector store. Immutable
/// within a single request — stages produce new `Chunk` values rather than
/// mutating in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: i64,
    pub text: String,
    /// Search distance; lower is closer. Populated by the vector-search stage.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub score: Option<f64>,
    /// Cross-encoder relevance score; higher is better. Populated by rerank.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rerank_score: Option<f64>,
    /// Name of the embedder whose search surfaced this chunk.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub embedder: Option<String>,
}

impl Chunk {
    pub fn new(chunk_id: i64, text: impl Into<String>) -> Self {
        Self {
            chunk_id,
            text: text.into(),
            score: None,
            rerank_score: None,
            embedder: None,
        }
    }
}

/// A validated search request: non-empty text plus an optional pipeline name.
#[derive(Debug, Clone)]
pub struct Query {
    pub text: String,
    pub pipeline_name: Option<String>,
}

impl Query {
    /// Construct a query, rejecting empty or whitespace-only text.
    pub fn new(text: impl Into<String>, pipeline_name: Option<String>) -> Result<Self, String> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err("query text must not be empty".to_string());
        }
        Ok(Self { text, pipeline_name })
    }
}

/// Milvus connection binding. Doubles as the [`crate::pool`] key once its
/// fields are collected into a tuple (`host`, `port`, `user`, `password`, `database`).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct MilvusBinding {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: String,
    pub collection: String,
}

/// Reranker spec. Disabled when `api_url` is empty.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RerankSpec {
    #[serde(default)]
    pub api_url: String,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_rerank_timeout")]
    pub timeout: u64,
}

fn default_rerank_timeout() -> u64 {
    30
}

impl RerankSpec {
    pub fn is_enabled(&self) -> bool {
        !self.api_url.trim().is_empty()
    }
}

/// LLM filter spec. Disabled when `base_url` and `model` are both empty.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LlmFilterSpec {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub model: String,
}

impl LlmFilterSpec {
    pub fn is_enabled(&self) -> bool {
        !self.base_url.trim().is_empty() && !self.model.trim().is_empty()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalParams {
    #[serde(default = "default_top_k_per_model")]
    pub top_k_per_model: usize,
    #[serde(default = "default_rerank_top_k")]
    pub rerank_top_k: usize,
    #[serde(default = "default_final_top_k")]
    pub final_top_k: usize,
}

fn default_top_k_per_model() -> usize {
    10
}
fn default_rerank_top_k() -> usize {
    10
}
fn default_final_top_k() -> usize {
    5
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            top_k_per_model: default_top_k_per_model(),
            rerank_top_k: default_rerank_top_k(),
            final_top_k: default_final_top_k(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkSizes {
    #[serde(default = "default_initial_search")]
    pub initial_search: usize,
    #[serde(default = "default_rerank_input")]
    pub rerank_input: usize,
    #[serde(default = "default_llm_filter_input")]
    pub llm_filter_input: usize,
}

fn default_initial_search() -> usize {
    20
}
fn default_rerank_input() -> usize {
    10
}
fn default_llm_filter_input() -> usize {
    10
}

impl Default for ChunkSizes {
    fn default() -> Self {
        Self {
            initial_search: default_initial_search(),
            rerank_input: default_rerank_input(),
            llm_filter_input: default_llm_filter_input(),
        }
    }
}

/// A single named pipeline entry in the pipelines file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    pub milvus: MilvusBinding,
    pub embedding_models: Vec<String>,
    #[serde(default)]
    pub rerank: RerankSpec,
    #[serde(default)]
    pub llm_filter: LlmFilterSpec,
    #[serde(default)]
    pub retrieval: RetrievalParams,
    #[serde(default)]
    pub chunk_sizes: ChunkSizes,
}

/// The on-disk aggregate: `default` plus a name → config mapping.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelinesFile {
    pub default: String,
    pub pipelines: std::collections::BTreeMap<String, PipelineConfig>,
}
