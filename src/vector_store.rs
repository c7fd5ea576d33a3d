//! Vector store adapter: batched top-K similarity search against a named
//! Milvus collection.
//!
//! Uses L2 metric, `nprobe: 10` search params, a `collection.load()` call
//! before searching, and defaults `output_fields` to `["chunk_id", "text"]`.
//! Reached over Milvus's documented REST proxy (`/v2/vectordb/...`) rather
//! than the native gRPC SDK — see DESIGN.md for the rationale.
//!
//! On pool unavailability, a missing collection, or any library/HTTP error,
//! `search` returns an empty hit list and logs — it never raises. The
//! orchestrator maps an empty sublist to "this embedder contributes zero
//! chunks".

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use crate::models::MilvusBinding;
use crate::pool::{ConnectionPool, MilvusHandle};

/// A single search hit. `id` becomes the returned [`crate::models::Chunk::chunk_id`].
#[derive(Debug, Clone)]
pub struct Hit {
    pub id: i64,
    pub text: String,
    pub distance: f64,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Search with one query vector per element of `query_vectors`, returning
    /// one hit list per query vector in the same order. A failed search for
    /// the whole call (pool unavailable, transport error) yields a list of
    /// empty sublists, never an error.
    async fn search(&self, query_vectors: &[Vec<f32>], limit: usize) -> Vec<Vec<Hit>>;
}

pub struct MilvusVectorStore {
    pool: Arc<ConnectionPool>,
    binding: MilvusBinding,
}

impl MilvusVectorStore {
    pub fn new(pool: Arc<ConnectionPool>, binding: MilvusBinding) -> Self {
        Self { pool, binding }
    }

    async fn load_collection(&self, handle: &MilvusHandle) -> bool {
        let url = format!("{}/v2/vectordb/collections/load", handle.base_url);
        let mut req = handle.client.post(&url).json(&json!({
            "dbName": handle.database,
            "collectionName": self.binding.collection,
        }));
        if !handle.user.is_empty() {
            req = req.basic_auth(&handle.user, Some(&handle.password));
        }
        match req.send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(status = %resp.status(), collection = %self.binding.collection, "failed to load collection");
                false
            }
            Err(e) => {
                warn!(error = %e, collection = %self.binding.collection, "failed to load collection");
                false
            }
        }
    }
}

#[async_trait]
impl VectorStore for MilvusVectorStore {
    async fn search(&self, query_vectors: &[Vec<f32>], limit: usize) -> Vec<Vec<Hit>> {
        let empty = || vec![Vec::new(); query_vectors.len()];

        if query_vectors.is_empty() {
            return Vec::new();
        }

        let Some(handle) = self.pool.acquire(&self.binding).await else {
            return empty();
        };

        if !self.load_collection(&handle).await {
            return empty();
        }

        let url = format!("{}/v2/vectordb/entities/search", handle.base_url);
        let mut req = handle.client.post(&url).json(&json!({
            "dbName": handle.database,
            "collectionName": self.binding.collection,
            "data": query_vectors,
            "annsField": "embedding",
            "limit": limit,
            "outputFields": ["id", "text"],
            "searchParams": { "metricType": "L2", "params": { "nprobe": 10 } },
        }));
        if !handle.user.is_empty() {
            req = req.basic_auth(&handle.user, Some(&handle.password));
        }

        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, collection = %self.binding.collection, "vector search transport error");
                return empty();
            }
        };

        if !resp.status().is_success() {
            warn!(status = %resp.status(), collection = %self.binding.collection, "vector search returned error status");
            return empty();
        }

        let value: serde_json::Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to parse vector search response");
                return empty();
            }
        };

        parse_search_response(&value, query_vectors.len())
    }
}

/// Milvus's REST search response groups hits per query vector under `data`,
/// each hit carrying at least `id`, `distance`, and the requested output
/// fields (here just `text`).
fn parse_search_response(value: &serde_json::Value, expected_groups: usize) -> Vec<Vec<Hit>> {
    let Some(data) = value.get("data").and_then(|d| d.as_array()) else {
        return vec![Vec::new(); expected_groups];
    };

    // Some proxies return a flat hit list (single query vector); others
    // group by query index. Detect grouping by checking whether entries
    // are themselves arrays.
    if expected_groups <= 1 {
        return vec![data.iter().filter_map(parse_hit).collect()];
    }

    if data.iter().all(|v| v.is_array()) {
        data.iter()
            .map(|group| {
                group
                    .as_array()
                    .map(|g| g.iter().filter_map(parse_hit).collect())
                    .unwrap_or_default()
            })
            .collect()
    } else {
        // Flat list across a multi-vector request: cannot disambiguate by
        // query, so treat the whole response as belonging to the first query
        // and leave the rest empty rather than guess incorrectly.
        let mut groups = vec![Vec::new(); expected_groups];
        groups[0] = data.iter().filter_map(parse_hit).collect();
        groups
    }
}

fn parse_hit(value: &serde_json::Value) -> Option<Hit> {
    let id = value.get("id")?.as_i64()?;
    let text = value
        .get("text")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let distance = value.get("distance").and_then(|v| v.as_f64()).unwrap_or(0.0);
    Some(Hit { id, text, distance })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_grouped_response() {
        let value = json!({
            "data": [
                [{"id": 1, "text": "a", "distance": 0.1}],
                [{"id": 2, "text": "b", "distance": 0.2}],
            ]
        });
        let hits = parse_search_response(&value, 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0][0].id, 1);
        assert_eq!(hits[1][0].id, 2);
    }

    #[test]
    fn parses_flat_response_for_single_query() {
        let value = json!({
            "data": [{"id": 10, "text": "a", "distance": 0.1}, {"id": 20, "text": "b", "distance": 0.2}]
        });
        let hits = parse_search_response(&value, 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].len(), 2);
    }

    #[test]
    fn missing_data_field_yields_empty_groups() {
        let value = json!({ "code": 500 });
        let hits = parse_search_response(&value, 3);
        assert_eq!(hits, vec![Vec::new(), Vec::new(), Vec::new()]);
    }
}
