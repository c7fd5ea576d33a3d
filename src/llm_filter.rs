//! LLM filter adapter: a single chat-completion call that picks the
//! `top_k` most relevant chunks by ID, with passthrough degradation.
//!
//! The prompt enumerates each chunk with a local index and its `chunk_id`,
//! and asks for a comma-separated list of the most relevant `chunk_id`s.
//! [`parse_chunk_ids`] is deliberately lenient, accepting stray whitespace,
//! trailing commas, and non-numeric junk by simply skipping it.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use crate::models::{Chunk, LlmFilterSpec};

#[async_trait]
pub trait LlmFilter: Send + Sync {
    /// Filter `chunks` down to the `top_k` most relevant to `query`. Never
    /// fails: any problem degrades to the input's first `top_k`.
    async fn filter(&self, query: &str, chunks: Vec<Chunk>, top_k: usize) -> Vec<Chunk>;
}

pub struct OpenAiCompatFilter {
    spec: LlmFilterSpec,
    client: reqwest::Client,
}

impl OpenAiCompatFilter {
    pub fn new(spec: LlmFilterSpec) -> Self {
        Self {
            spec,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client"),
        }
    }

    fn prompt(query: &str, chunks: &[Chunk], top_k: usize) -> String {
        let mut listing = String::new();
        for (i, c) in chunks.iter().enumerate() {
            listing.push_str(&format!(
                "[{i}] chunk_id={} text={}\n",
                c.chunk_id,
                c.text.chars().take(400).collect::<String>()
            ));
        }
        format!(
            "Query: {query}\n\nCandidate chunks:\n{listing}\n\
             Return the {top_k} most relevant chunk_id values as a comma-separated \
             list of integers and nothing else."
        )
    }
}

#[async_trait]
impl LlmFilter for OpenAiCompatFilter {
    async fn filter(&self, query: &str, chunks: Vec<Chunk>, top_k: usize) -> Vec<Chunk> {
        if !self.spec.is_enabled() {
            return passthrough(chunks, top_k);
        }

        let prompt = Self::prompt(query, &chunks, top_k);
        let url = format!("{}/chat/completions", self.spec.base_url.trim_end_matches('/'));

        let resp = match self
            .client
            .post(&url)
            .bearer_auth(&self.spec.api_key)
            .json(&json!({
                "model": self.spec.model,
                "messages": [{"role": "user", "content": prompt}],
                "temperature": 0.1,
                "max_tokens": 500,
            }))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "llm filter transport error, degrading to passthrough");
                return passthrough(chunks, top_k);
            }
        };

        if !resp.status().is_success() {
            warn!(status = %resp.status(), "llm filter returned error status, degrading to passthrough");
            return passthrough(chunks, top_k);
        }

        let value: serde_json::Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to parse llm filter response, degrading to passthrough");
                return passthrough(chunks, top_k);
            }
        };

        let Some(content) = value
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
        else {
            warn!("llm filter response missing message content, degrading to passthrough");
            return passthrough(chunks, top_k);
        };

        let ids = parse_chunk_ids(content);
        if ids.is_empty() {
            return passthrough(chunks, top_k);
        }

        select_and_fill(chunks, &ids, top_k)
    }
}

/// Lenient comma-separated integer parser: skips anything that doesn't parse
/// cleanly rather than failing the whole response.
fn parse_chunk_ids(content: &str) -> Vec<i64> {
    content
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter_map(|tok| tok.trim().parse::<i64>().ok())
        .collect()
}

/// Keep LLM-selected IDs present in the input (in LLM order), then fill any
/// remaining slots from the input's own order, then truncate.
fn select_and_fill(chunks: Vec<Chunk>, ids: &[i64], top_k: usize) -> Vec<Chunk> {
    let by_id: std::collections::HashMap<i64, Chunk> =
        chunks.iter().cloned().map(|c| (c.chunk_id, c)).collect();

    let mut selected = Vec::with_capacity(top_k);
    let mut seen = std::collections::HashSet::new();

    for id in ids {
        if let Some(c) = by_id.get(id) {
            if seen.insert(*id) {
                selected.push(c.clone());
                if selected.len() == top_k {
                    return selected;
                }
            }
        }
    }

    for c in &chunks {
        if seen.insert(c.chunk_id) {
            selected.push(c.clone());
            if selected.len() == top_k {
                break;
            }
        }
    }

    selected
}

fn passthrough(mut chunks: Vec<Chunk>, top_k: usize) -> Vec<Chunk> {
    chunks.truncate(top_k);
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: i64, text: &str) -> Chunk {
        Chunk::new(id, text)
    }

    #[test]
    fn parses_lenient_comma_list() {
        assert_eq!(parse_chunk_ids("10, 20,30 , foo, 40"), vec![10, 20, 30, 40]);
    }

    #[test]
    fn parses_empty_or_garbage_as_empty() {
        assert!(parse_chunk_ids("no numbers here").is_empty());
    }

    #[test]
    fn select_and_fill_prefers_llm_order_then_fills_from_input() {
        let chunks = vec![chunk(10, "a"), chunk(20, "b"), chunk(30, "c")];
        let out = select_and_fill(chunks, &[30], 2);
        assert_eq!(out.iter().map(|c| c.chunk_id).collect::<Vec<_>>(), vec![30, 10]);
    }

    #[test]
    fn select_and_fill_drops_unknown_ids() {
        let chunks = vec![chunk(10, "a"), chunk(20, "b")];
        let out = select_and_fill(chunks, &[999, 20], 2);
        assert_eq!(out.iter().map(|c| c.chunk_id).collect::<Vec<_>>(), vec![20, 10]);
    }

    #[tokio::test]
    async fn disabled_spec_is_passthrough() {
        let filter = OpenAiCompatFilter::new(LlmFilterSpec::default());
        let chunks = vec![chunk(1, "a"), chunk(2, "b"), chunk(3, "c")];
        let out = filter.filter("q", chunks, 2).await;
        assert_eq!(out.iter().map(|c| c.chunk_id).collect::<Vec<_>>(), vec![1, 2]);
    }
}
