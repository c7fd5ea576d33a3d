//! The retrieval pipeline orchestrator: embed fan-out, vector-search
//! fan-out, merge/dedup, rerank, LLM filter, final truncation.
//!
//! The two fan-outs run as structured concurrency (`tokio::spawn` + join)
//! rather than a sequential loop, with each task's failure absorbed rather
//! than propagated. Cancellation is threaded through as a
//! [`CancellationToken`] raced against each stage via `tokio::select!`.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::embedder::Embedder;
use crate::error::{RetrievalError, Result};
use crate::llm_filter::LlmFilter;
use crate::models::{Chunk, ChunkSizes, RetrievalParams};
use crate::reranker::Reranker;
use crate::vector_store::VectorStore;

/// Stage-labeled intermediate results, populated only when the caller asks
/// for `want_debug`.
#[derive(Debug, Default, Clone)]
pub struct DebugTrace {
    pub per_embedder: BTreeMap<String, Vec<Chunk>>,
    pub deduplicated: Vec<Chunk>,
    pub reranked: Vec<Chunk>,
    pub filtered: Vec<Chunk>,
}

#[derive(Debug, Clone)]
pub struct RetrieveOutcome {
    pub query: String,
    pub results: Vec<Chunk>,
    pub debug: Option<DebugTrace>,
}

/// One fully-wired pipeline: a fixed set of embedders plus the three
/// downstream adapters, bound with the pipeline's retrieval and
/// chunk-size parameters. Constructed once per pipeline by [`crate::cache`].
pub struct Orchestrator {
    pipeline_name: String,
    embedders: Vec<Arc<dyn Embedder>>,
    vector_store: Arc<dyn VectorStore>,
    reranker: Arc<dyn Reranker>,
    llm_filter: Arc<dyn LlmFilter>,
    retrieval: RetrievalParams,
    chunk_sizes: ChunkSizes,
}

impl Orchestrator {
    pub fn new(
        pipeline_name: String,
        embedders: Vec<Arc<dyn Embedder>>,
        vector_store: Arc<dyn VectorStore>,
        reranker: Arc<dyn Reranker>,
        llm_filter: Arc<dyn LlmFilter>,
        retrieval: RetrievalParams,
        chunk_sizes: ChunkSizes,
    ) -> Self {
        Self {
            pipeline_name,
            embedders,
            vector_store,
            reranker,
            llm_filter,
            retrieval,
            chunk_sizes,
        }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        want_debug: bool,
        cancel: &CancellationToken,
    ) -> Result<RetrieveOutcome> {
        let embedded = select_or_cancel(cancel, self.embed_fanout(query)).await?;
        if embedded.is_empty() {
            return Err(RetrievalError::embedding_error(
                &self.pipeline_name,
                "every configured embedder failed",
            ));
        }

        let per_embedder = select_or_cancel(cancel, self.search_fanout(&embedded)).await?;

        let deduplicated = merge_and_dedup(&per_embedder, self.chunk_sizes.initial_search);

        let rerank_top_k = self.chunk_sizes.rerank_input.min(deduplicated.len());
        let reranked = select_or_cancel(
            cancel,
            self.reranker.rerank(query, deduplicated.clone(), rerank_top_k),
        )
        .await?;

        let llm_top_k = self.chunk_sizes.llm_filter_input.min(reranked.len());
        let filtered = select_or_cancel(
            cancel,
            self.llm_filter.filter(query, reranked.clone(), llm_top_k),
        )
        .await?;

        let mut results = filtered.clone();
        results.truncate(self.retrieval.final_top_k);

        let debug = want_debug.then(|| DebugTrace {
            per_embedder: per_embedder.into_iter().collect(),
            deduplicated,
            reranked,
            filtered,
        });

        Ok(RetrieveOutcome {
            query: query.to_string(),
            results,
            debug,
        })
    }

    /// Stage 1: embed the query with every configured embedder in parallel.
    /// A failing embedder is logged and dropped; the caller decides whether
    /// the whole request fails (zero survivors).
    async fn embed_fanout(&self, query: &str) -> Vec<(String, Vec<f32>)> {
        let text = vec![query.to_string()];
        let mut handles = Vec::with_capacity(self.embedders.len());
        for embedder in &self.embedders {
            let embedder = Arc::clone(embedder);
            let text = text.clone();
            handles.push(tokio::spawn(async move {
                let name = embedder.name().to_string();
                match embedder.embed(&text).await {
                    Ok(mut vectors) if !vectors.is_empty() => Some((name, vectors.remove(0))),
                    Ok(_) => {
                        warn!(embedder = %name, "embedder returned no vectors");
                        None
                    }
                    Err(e) => {
                        warn!(embedder = %name, error = %e, "embedder failed");
                        None
                    }
                }
            }));
        }

        let mut out = Vec::new();
        for handle in handles {
            if let Ok(Some(pair)) = handle.await {
                out.push(pair);
            }
        }
        out
    }

    /// Stage 2: search each surviving embedder's vector in parallel against
    /// the vector store, preserving configured embedder order in the
    /// returned list. Each sublist is sorted ascending by distance.
    async fn search_fanout(&self, embedded: &[(String, Vec<f32>)]) -> Vec<(String, Vec<Chunk>)> {
        let mut handles = Vec::with_capacity(embedded.len());
        let limit = self.retrieval.top_k_per_model;
        for (name, vector) in embedded {
            let store = Arc::clone(&self.vector_store);
            let name = name.clone();
            let vector = vector.clone();
            handles.push(tokio::spawn(async move {
                let mut results = store.search(&[vector], limit).await;
                let hits = results.pop().unwrap_or_default();
                let mut chunks: Vec<Chunk> = hits
                    .into_iter()
                    .map(|h| {
                        let mut c = Chunk::new(h.id, h.text);
                        c.score = Some(h.distance);
                        c.embedder = Some(name.clone());
                        c
                    })
                    .collect();
                chunks.sort_by(|a, b| {
                    a.score
                        .unwrap_or(f64::MAX)
                        .partial_cmp(&b.score.unwrap_or(f64::MAX))
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                (name, chunks)
            }));
        }

        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(pair) => out.push(pair),
                Err(e) => warn!(error = %e, "vector search task panicked"),
            }
        }
        out
    }
}

/// Race `fut` against cancellation, mapping a cancel signal to
/// [`RetrievalError::Cancelled`]. Used at every stage boundary.
async fn select_or_cancel<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = T>,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(RetrievalError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Stage 3: concatenate in configured embedder order (each sublist already
/// ascending by distance), dedup by `chunk_id` keeping the lowest `score`
/// (first occurrence wins ties), then truncate by ascending `score`.
fn merge_and_dedup(per_embedder: &[(String, Vec<Chunk>)], limit: usize) -> Vec<Chunk> {
    let mut best: BTreeMap<i64, (usize, Chunk)> = BTreeMap::new();
    let mut order = 0usize;
    for (_, chunks) in per_embedder {
        for chunk in chunks {
            let candidate_score = chunk.score.unwrap_or(f64::MAX);
            match best.get(&chunk.chunk_id) {
                None => {
                    best.insert(chunk.chunk_id, (order, chunk.clone()));
                }
                Some((_, existing)) => {
                    let existing_score = existing.score.unwrap_or(f64::MAX);
                    if candidate_score < existing_score {
                        best.insert(chunk.chunk_id, (order, chunk.clone()));
                    }
                }
            }
            order += 1;
        }
    }

    let mut deduped: Vec<Chunk> = best.into_values().map(|(_, c)| c).collect();
    deduped.sort_by(|a, b| {
        a.score
            .unwrap_or(f64::MAX)
            .partial_cmp(&b.score.unwrap_or(f64::MAX))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk_id.cmp(&b.chunk_id))
    });
    deduped.truncate(limit);
    deduped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: i64, score: f64, embedder: &str) -> Chunk {
        let mut c = Chunk::new(id, format!("text-{id}"));
        c.score = Some(score);
        c.embedder = Some(embedder.to_string());
        c
    }

    #[test]
    fn merge_and_dedup_keeps_lowest_score() {
        let per_embedder = vec![
            ("E1".to_string(), vec![chunk(10, 0.9, "E1")]),
            ("E2".to_string(), vec![chunk(10, 0.2, "E2"), chunk(40, 0.3, "E2")]),
        ];
        let out = merge_and_dedup(&per_embedder, 10);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].chunk_id, 10);
        assert_eq!(out[0].score, Some(0.2));
        assert_eq!(out[1].chunk_id, 40);
    }

    #[test]
    fn merge_and_dedup_truncates_by_ascending_score() {
        let per_embedder = vec![(
            "E1".to_string(),
            vec![chunk(1, 0.5, "E1"), chunk(2, 0.1, "E1"), chunk(3, 0.3, "E1")],
        )];
        let out = merge_and_dedup(&per_embedder, 2);
        assert_eq!(out.iter().map(|c| c.chunk_id).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn merge_and_dedup_tie_break_is_first_occurrence() {
        let per_embedder = vec![
            ("E1".to_string(), vec![chunk(1, 0.5, "E1")]),
            ("E2".to_string(), vec![chunk(2, 0.5, "E2")]),
        ];
        let out = merge_and_dedup(&per_embedder, 10);
        assert_eq!(out.iter().map(|c| c.chunk_id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn select_or_cancel_returns_cancelled_when_token_fires_first() {
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<()> = select_or_cancel(&token, async {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        })
        .await;
        assert!(matches!(result, Err(RetrievalError::Cancelled)));
    }
}
