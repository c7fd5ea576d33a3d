//! Embedder adapters: a uniform `embed(texts) → vectors` contract over
//! several providers with genuinely different wire behavior.
//!
//! Two families are implemented:
//! - [`OpenAiCompatEmbedder`] — the OpenAI and Qwen (DashScope compatible-mode)
//!   providers, both reached through an OpenAI-style `POST /embeddings` call
//!   that returns `{ data: [{ embedding: [...] }, ...] }` in input order.
//! - [`ApiEmbedder`] — the BGE provider: picks an English/Chinese/generic
//!   endpoint by a substring of the model name, POSTs `{ texts }`, and
//!   recognizes any of `{embeddings: [...]}`, `{data: [...]}`, or a bare list
//!   in the response.
//!
//! `dimension()` is lazy: each adapter declares a reasonable default from its
//! model name, but [`Embedder::embed`] updates the cached value from the
//! first successful response so later callers see the observed dimension.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

/// Fixed capability contract every provider variant implements as a single
/// trait object.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts. The empty input returns empty output without
    /// calling any external service.
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;

    /// Vector dimensionality: declared from the model name, or the best
    /// guess observed so far once at least one `embed` call has succeeded.
    fn dimension(&self) -> usize;

    /// Name used to label chunks surfaced by this embedder (`Chunk.embedder`).
    fn name(&self) -> &str;
}

/// Resolve `"<provider>[:<model>]"` into a concrete adapter. Unknown
/// providers fail — callers should map this to `INVALID_CONFIG`.
pub fn create_embedder(spec: &str) -> anyhow::Result<Box<dyn Embedder>> {
    let (provider, model) = match spec.split_once(':') {
        Some((p, m)) => (p, Some(m.to_string())),
        None => (spec, None),
    };

    match provider {
        "openai" => Ok(Box::new(OpenAiCompatEmbedder::new(
            provider.to_string(),
            model.unwrap_or_else(|| "text-embedding-3-small".to_string()),
            "https://api.openai.com/v1/embeddings".to_string(),
            "OPENAI_API_KEY",
            default_dim_for_model,
        ))),
        "qwen" => Ok(Box::new(OpenAiCompatEmbedder::new(
            provider.to_string(),
            model.unwrap_or_else(|| "text-embedding-v2".to_string()),
            "https://dashscope.aliyuncs.com/compatible-mode/v1/embeddings".to_string(),
            "DASHSCOPE_API_KEY",
            |_| 1536,
        ))),
        "bge" => {
            let model = model.unwrap_or_else(|| "BAAI/bge-large-en-v1.5".to_string());
            let api_url = std::env::var("BGE_API_URL")
                .unwrap_or_else(|_| "http://localhost:8001".to_string());
            Ok(Box::new(ApiEmbedder::new(provider.to_string(), model, api_url)))
        }
        other => anyhow::bail!("unknown embedder provider: {other}"),
    }
}

fn default_dim_for_model(model: &str) -> usize {
    if model.contains("3-large") {
        3072
    } else {
        1536
    }
}

// ============ OpenAI-compatible provider (openai, qwen) ============

/// An OpenAI-style embedding endpoint: `POST {base_url}` with
/// `{ model, input: [texts] }`, response `{ data: [{ embedding }] }` in order.
pub struct OpenAiCompatEmbedder {
    provider: String,
    model: String,
    base_url: String,
    api_key_env: &'static str,
    dims: OnceLock<usize>,
    default_dim: fn(&str) -> usize,
    client: reqwest::Client,
}

impl OpenAiCompatEmbedder {
    fn new(
        provider: String,
        model: String,
        base_url: String,
        api_key_env: &'static str,
        default_dim: fn(&str) -> usize,
    ) -> Self {
        Self {
            provider,
            model,
            base_url,
            api_key_env,
            dims: OnceLock::new(),
            default_dim,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client"),
        }
    }
}

#[async_trait]
impl Embedder for OpenAiCompatEmbedder {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let api_key = std::env::var(self.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} not set", self.api_key_env))?;

        let resp = self
            .client
            .post(&self.base_url)
            .bearer_auth(api_key)
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("embedder {} returned {}: {}", self.provider, status, body);
        }

        let value: serde_json::Value = resp.json().await?;
        let data = value
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| anyhow::anyhow!("missing data array in embedder response"))?;

        let mut out = Vec::with_capacity(data.len());
        for item in data {
            let vec: Vec<f32> = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| anyhow::anyhow!("missing embedding in response item"))?
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();
            out.push(vec);
        }

        if let Some(first) = out.first() {
            let _ = self.dims.set(first.len());
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        *self
            .dims
            .get()
            .unwrap_or(&(self.default_dim)(&self.model))
    }

    fn name(&self) -> &str {
        &self.provider
    }
}

// ============ Proxied "API" provider with per-language-variant endpoints (bge) ============

/// A proxied embedder reached over a plain JSON API. Picks among an
/// English / Chinese / generic endpoint based on a substring of the model
/// name, and accepts any of `{embeddings}`, `{data}`, or a bare list in
/// the response — matching the original BGE client's tolerance for
/// whichever shape the proxy happens to return.
pub struct ApiEmbedder {
    provider: String,
    model: String,
    api_url: String,
    dims: OnceLock<usize>,
    client: reqwest::Client,
}

impl ApiEmbedder {
    fn new(provider: String, model: String, api_url: String) -> Self {
        Self {
            provider,
            model,
            api_url,
            dims: OnceLock::new(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client"),
        }
    }

    fn endpoint(&self) -> String {
        let m = self.model.to_lowercase();
        if m.contains("bge-large-en") || m.contains("bge-base-en") || m.contains("bge-small-en") {
            format!("{}/embed/en", self.api_url)
        } else if m.contains("bge-large-zh") || m.contains("bge-base-zh") || m.contains("bge-small-zh")
        {
            format!("{}/embed/zh", self.api_url)
        } else {
            format!("{}/embed", self.api_url)
        }
    }

    fn default_dim(&self) -> usize {
        match self.model.as_str() {
            "BAAI/bge-large-en-v1.5" => 1024,
            "BAAI/bge-base-en-v1.5" => 768,
            "BAAI/bge-small-en-v1.5" => 384,
            _ => 1024,
        }
    }
}

#[async_trait]
impl Embedder for ApiEmbedder {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let resp = self
            .client
            .post(self.endpoint())
            .json(&json!({ "texts": texts }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("embedder {} returned {}: {}", self.provider, status, body);
        }

        let value: serde_json::Value = resp.json().await?;
        let raw = extract_vectors(&value)
            .ok_or_else(|| anyhow::anyhow!("unrecognized embedder response shape"))?;

        let out: Vec<Vec<f32>> = raw
            .iter()
            .map(|row| {
                row.as_array()
                    .map(|a| a.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
                    .unwrap_or_default()
            })
            .collect();

        if let Some(first) = out.first() {
            let _ = self.dims.set(first.len());
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        *self.dims.get().unwrap_or(&self.default_dim())
    }

    fn name(&self) -> &str {
        &self.provider
    }
}

/// Recognize any of `{embeddings: [...]}`, `{data: [...]}`, or a bare list.
fn extract_vectors(value: &serde_json::Value) -> Option<&Vec<serde_json::Value>> {
    if let Some(arr) = value.get("embeddings").and_then(|v| v.as_array()) {
        return Some(arr);
    }
    if let Some(arr) = value.get("data").and_then(|v| v.as_array()) {
        return Some(arr);
    }
    value.as_array()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_is_rejected() {
        assert!(create_embedder("nonsense:model").is_err());
    }

    #[test]
    fn provider_model_split() {
        let e = create_embedder("openai:text-embedding-3-large").unwrap();
        assert_eq!(e.name(), "openai");
        assert_eq!(e.dimension(), 3072);
    }

    #[test]
    fn bge_endpoint_selection_by_substring() {
        let en = ApiEmbedder::new(
            "bge".into(),
            "BAAI/bge-large-en-v1.5".into(),
            "http://x".into(),
        );
        assert_eq!(en.endpoint(), "http://x/embed/en");

        let zh = ApiEmbedder::new(
            "bge".into(),
            "BAAI/bge-large-zh-v1.5".into(),
            "http://x".into(),
        );
        assert_eq!(zh.endpoint(), "http://x/embed/zh");

        let generic = ApiEmbedder::new("bge".into(), "some-other-model".into(), "http://x".into());
        assert_eq!(generic.endpoint(), "http://x/embed");
    }

    #[test]
    fn extract_vectors_recognizes_all_shapes() {
        let a = json!({ "embeddings": [[1.0, 2.0]] });
        let b = json!({ "data": [[1.0, 2.0]] });
        let c = json!([[1.0, 2.0]]);
        assert!(extract_vectors(&a).is_some());
        assert!(extract_vectors(&b).is_some());
        assert!(extract_vectors(&c).is_some());
    }

    #[tokio::test]
    async fn empty_input_returns_empty_output_without_network() {
        let e = create_embedder("openai:text-embedding-3-small").unwrap();
        let out = e.embed(&[]).await.unwrap();
        assert!(out.is_empty());
    }
}
