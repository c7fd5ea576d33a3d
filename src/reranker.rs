//! Reranker adapter: cross-encoder-style rescoring of a chunk list against
//! the query, with identity degradation on any failure.
//!
//! Posts `{query, documents, top_k, model}` and trusts the response's
//! `results` as already sorted by `relevance_score` descending — it is
//! never re-sorted defensively. The mock fallback (used when disabled)
//! mixes a token-overlap score with the chunk's existing distance.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::models::{Chunk, RerankSpec};

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Rerank `chunks` against `query`, returning at most `top_k` of them
    /// with `rerank_score` populated, ordered by the adapter's own order.
    /// Never fails: any problem degrades to the input's first `top_k`.
    async fn rerank(&self, query: &str, chunks: Vec<Chunk>, top_k: usize) -> Vec<Chunk>;
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f64,
}

/// HTTP-backed reranker. Falls back to [`MockReranker`]'s ordering whenever
/// the remote call fails, rather than erroring.
pub struct HttpReranker {
    spec: RerankSpec,
    client: reqwest::Client,
    mock: MockReranker,
}

impl HttpReranker {
    pub fn new(spec: RerankSpec) -> Self {
        let timeout = Duration::from_secs(if spec.timeout == 0 { 30 } else { spec.timeout });
        Self {
            spec,
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("reqwest client"),
            mock: MockReranker,
        }
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(&self, query: &str, chunks: Vec<Chunk>, top_k: usize) -> Vec<Chunk> {
        if !self.spec.is_enabled() {
            return self.mock.rerank(query, chunks, top_k).await;
        }

        let top_k = top_k.min(chunks.len());
        let documents: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();

        let resp = match self
            .client
            .post(&self.spec.api_url)
            .json(&json!({
                "query": query,
                "documents": documents,
                "top_k": top_k,
                "model": self.spec.model,
            }))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "reranker transport error, degrading to identity");
                return identity_truncate(chunks, top_k);
            }
        };

        if !resp.status().is_success() {
            warn!(status = %resp.status(), "reranker returned error status, degrading to identity");
            return identity_truncate(chunks, top_k);
        }

        let parsed: RerankResponse = match resp.json().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to parse reranker response, degrading to identity");
                return identity_truncate(chunks, top_k);
            }
        };

        let mut out = Vec::with_capacity(parsed.results.len());
        for r in parsed.results {
            if let Some(mut c) = chunks.get(r.index).cloned() {
                c.rerank_score = Some(r.relevance_score);
                out.push(c);
            }
        }
        out.truncate(top_k);
        out
    }
}

fn identity_truncate(mut chunks: Vec<Chunk>, top_k: usize) -> Vec<Chunk> {
    chunks.truncate(top_k);
    chunks
}

/// Offline mock used when reranking is disabled: mixes token-overlap between
/// `query` and `chunk.text` with a fraction of the chunk's existing distance
/// score, descending.
pub struct MockReranker;

#[async_trait]
impl Reranker for MockReranker {
    async fn rerank(&self, query: &str, mut chunks: Vec<Chunk>, top_k: usize) -> Vec<Chunk> {
        let query_tokens: std::collections::HashSet<String> =
            query.to_lowercase().split_whitespace().map(str::to_string).collect();

        let mut scored: Vec<(f64, usize, Chunk)> = chunks
            .drain(..)
            .enumerate()
            .map(|(i, mut c)| {
                let text_tokens: std::collections::HashSet<String> =
                    c.text.to_lowercase().split_whitespace().map(str::to_string).collect();
                let overlap = query_tokens.intersection(&text_tokens).count() as f64;
                let distance_term = 1.0 - c.score.unwrap_or(1.0).min(1.0).max(0.0);
                let score = overlap * 0.8 + distance_term * 0.2;
                c.rerank_score = Some(score);
                (score, i, c)
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal).then(a.1.cmp(&b.1)));
        scored.into_iter().take(top_k).map(|(_, _, c)| c).collect()
    }
}
