//! # Retrieval Service
//!
//! **A multi-stage retrieval pipeline orchestrator for retrieval-augmented
//! generation.**
//!
//! Given a query, a configured pipeline fans out to one or more embedding
//! providers, searches a keyed, health-checked Milvus connection pool,
//! merges and deduplicates the results, reranks them with a cross-encoder,
//! and narrows the final set with an LLM filter — with every optional stage
//! degrading gracefully to a no-op rather than failing the request.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐      ┌──────────────┐      ┌───────────────┐
//! │ Config Store │────▶│ Service Cache │────▶│ Orchestrator   │
//! │  (YAML, hot  │     │ (per-pipeline │     │ embed → search │
//! │   reload)    │     │  instances)   │     │ → dedup → rerank│
//! └─────────────┘      └──────────────┘      │ → filter       │
//!                                              └───────┬───────┘
//!                                                       ▼
//!                                          ┌─────────────────────┐
//!                                          │ CLI / HTTP surface   │
//!                                          └─────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Hot-reloadable YAML pipeline configuration store |
//! | [`models`] | Core data types: `Chunk`, `Query`, `PipelineConfig` |
//! | [`pool`] | Keyed, health-checked, idle-expiring Milvus connection pool |
//! | [`embedder`] | Embedding provider adapters (OpenAI, Qwen, BGE) |
//! | [`vector_store`] | Milvus REST vector search adapter |
//! | [`reranker`] | Cross-encoder rerank adapter with identity degradation |
//! | [`llm_filter`] | LLM-driven final selection adapter with passthrough degradation |
//! | [`orchestrator`] | The six-stage retrieval pipeline |
//! | [`cache`] | Per-pipeline orchestrator cache, invalidated on config change |
//! | [`validator`] | Administrative pre-flight pipeline checks |
//! | [`api`] | Transport-agnostic public operations |
//! | [`server`] | HTTP surface (Axum) |
//! | [`error`] | Shared error kinds |
//!
//! ## Configuration
//!
//! The service is configured via a YAML file (default:
//! `config/pipelines.yaml`) holding a `default` pipeline name plus a
//! name → pipeline mapping. See [`config`] for the full schema, env
//! substitution grammar, and hot-reload semantics.

pub mod api;
pub mod cache;
pub mod config;
pub mod embedder;
pub mod error;
pub mod llm_filter;
pub mod models;
pub mod orchestrator;
pub mod pool;
pub mod reranker;
pub mod server;
pub mod validator;
pub mod vector_store;
