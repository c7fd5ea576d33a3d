//! Administrative pre-flight checks against a pipeline config, distinct
//! from the structural checks [`crate::config`] applies on every write.
//! This validator makes live calls (does the collection exist? does the
//! reranker respond?) and is only ever invoked on demand, never from the
//! retrieval hot path. Failures are collected into a per-field error map
//! rather than raised.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::embedder::create_embedder;
use crate::models::{ChunkSizes, PipelineConfig, RetrievalParams};
use crate::pool::ConnectionPool;

#[derive(Debug, Default, Clone)]
pub struct ValidationReport {
    pub ok: bool,
    pub errors_by_field: BTreeMap<String, String>,
}

impl ValidationReport {
    fn fail(&mut self, field: impl Into<String>, detail: impl Into<String>) {
        self.ok = false;
        self.errors_by_field.insert(field.into(), detail.into());
    }
}

pub struct Validator {
    pool: Arc<ConnectionPool>,
}

impl Validator {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    pub async fn validate(&self, config: &PipelineConfig) -> ValidationReport {
        let mut report = ValidationReport {
            ok: true,
            errors_by_field: BTreeMap::new(),
        };

        for spec in &config.embedding_models {
            if let Err(e) = create_embedder(spec) {
                report.fail(format!("embedding_models[{spec}]"), e.to_string());
            }
        }

        match self.pool.acquire(&config.milvus).await {
            Some(handle) => {
                if !self.collection_exists(&handle, &config.milvus.collection).await {
                    report.fail(
                        "milvus.collection",
                        format!("collection '{}' not found", config.milvus.collection),
                    );
                }
            }
            None => {
                report.fail(
                    "milvus",
                    format!("cannot connect to {}:{}", config.milvus.host, config.milvus.port),
                );
            }
        }

        if config.rerank.is_enabled() {
            match reqwest::Client::new().get(&config.rerank.api_url).send().await {
                Ok(resp) if resp.status().is_server_error() => {
                    report.fail(
                        "rerank.api_url",
                        format!("reranker returned server error {}", resp.status()),
                    );
                }
                Err(e) => {
                    report.fail("rerank.api_url", format!("reranker unreachable: {e}"));
                }
                _ => {}
            }
        }

        if config.llm_filter.is_enabled() && config.llm_filter.api_key.trim().is_empty() {
            // Warning only — the key may be supplied via process environment
            // at call time rather than stored in config, so this is not a
            // hard failure.
            report
                .errors_by_field
                .entry("llm_filter.api_key".to_string())
                .or_insert_with(|| "no api_key configured; relying on environment provisioning".to_string());
        }

        let RetrievalParams {
            top_k_per_model,
            rerank_top_k,
            final_top_k,
        } = config.retrieval;
        for (field, value) in [
            ("retrieval.top_k_per_model", top_k_per_model),
            ("retrieval.rerank_top_k", rerank_top_k),
            ("retrieval.final_top_k", final_top_k),
        ] {
            if value == 0 {
                report.fail(field, "must be strictly positive");
            }
        }

        let ChunkSizes {
            initial_search,
            rerank_input,
            llm_filter_input,
        } = config.chunk_sizes;
        for (field, value) in [
            ("chunk_sizes.initial_search", initial_search),
            ("chunk_sizes.rerank_input", rerank_input),
            ("chunk_sizes.llm_filter_input", llm_filter_input),
        ] {
            if value == 0 {
                report.fail(field, "must be strictly positive");
            }
        }

        report
    }

    async fn collection_exists(&self, handle: &crate::pool::MilvusHandle, collection: &str) -> bool {
        let url = format!("{}/v2/vectordb/collections/describe", handle.base_url);
        let mut req = handle.client.post(&url).json(&serde_json::json!({
            "dbName": handle.database,
            "collectionName": collection,
        }));
        if !handle.user.is_empty() {
            req = req.basic_auth(&handle.user, Some(&handle.password));
        }
        matches!(req.send().await, Ok(resp) if resp.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MilvusBinding;

    fn minimal_config() -> PipelineConfig {
        PipelineConfig {
            milvus: MilvusBinding {
                host: "127.0.0.1.invalid".to_string(),
                port: 19530,
                user: String::new(),
                password: String::new(),
                database: String::new(),
                collection: "docs".to_string(),
            },
            embedding_models: vec!["qwen:text-embedding-v2".to_string()],
            rerank: Default::default(),
            llm_filter: Default::default(),
            retrieval: RetrievalParams {
                top_k_per_model: 5,
                rerank_top_k: 5,
                final_top_k: 5,
            },
            chunk_sizes: ChunkSizes {
                initial_search: 10,
                rerank_input: 5,
                llm_filter_input: 5,
            },
        }
    }

    #[tokio::test]
    async fn unreachable_milvus_is_reported() {
        let validator = Validator::new(Arc::new(ConnectionPool::new()));
        let report = validator.validate(&minimal_config()).await;
        assert!(!report.ok);
        assert!(report.errors_by_field.contains_key("milvus"));
    }

    #[tokio::test]
    async fn unknown_embedder_provider_is_reported() {
        let mut config = minimal_config();
        config.embedding_models = vec!["nonsense:model".to_string()];
        let validator = Validator::new(Arc::new(ConnectionPool::new()));
        let report = validator.validate(&config).await;
        assert!(!report.ok);
        assert!(report
            .errors_by_field
            .keys()
            .any(|k| k.starts_with("embedding_models")));
    }

    #[tokio::test]
    async fn zero_sized_params_are_reported() {
        let mut config = minimal_config();
        config.retrieval.final_top_k = 0;
        let validator = Validator::new(Arc::new(ConnectionPool::new()));
        let report = validator.validate(&config).await;
        assert!(report.errors_by_field.contains_key("retrieval.final_top_k"));
    }
}
