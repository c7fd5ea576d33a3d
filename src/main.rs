//! # Retrieval Service
//!
//! A multi-stage retrieval pipeline orchestrator: embed fan-out, vector
//! search, rerank, and LLM filtering over hot-reloadable pipeline
//! configuration.
//!
//! ## Architecture
//!
//! ```text
//! Config Store → Service Cache → Orchestrator (embed → search → dedup → rerank → filter)
//!                       ^                                   |
//!                       +---------- invalidate on write -----+
//! ```
//!
//! ## Modules
//!
//! - [`config`] — YAML pipeline configuration, hot reload, env substitution
//! - [`models`] — Core data types: `Chunk`, `Query`, `PipelineConfig`
//! - [`pool`] — Keyed, health-checked, idle-expiring Milvus connection pool
//! - [`embedder`] — Embedding provider adapters (OpenAI, Qwen, BGE)
//! - [`vector_store`] — Milvus REST search adapter
//! - [`reranker`] — Cross-encoder rerank adapter with mock degradation
//! - [`llm_filter`] — LLM-driven final selection adapter
//! - [`orchestrator`] — The six-stage retrieval pipeline
//! - [`cache`] — Per-pipeline orchestrator cache
//! - [`validator`] — Administrative pre-flight pipeline checks
//! - [`api`] — Transport-agnostic public operations
//! - [`server`] — HTTP surface (Axum)

mod api;
mod cache;
mod config;
mod embedder;
mod error;
mod llm_filter;
mod models;
mod orchestrator;
mod pool;
mod reranker;
mod server;
mod validator;
mod vector_store;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::api::Api;
use crate::cache::ServiceCache;
use crate::config::ConfigStore;
use crate::pool::ConnectionPool;

#[derive(Parser)]
#[command(
    name = "retrieval-service",
    about = "Multi-stage retrieval pipeline orchestrator",
    version
)]
struct Cli {
    /// Path to the pipelines configuration file
    #[arg(long, global = true, default_value = "./config/pipelines.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Address to bind, e.g. 0.0.0.0:8080
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: String,
    },

    /// Manage pipeline configuration
    Pipelines {
        #[command(subcommand)]
        action: PipelinesAction,
    },

    /// Run a search from the command line
    Search {
        /// Search query
        query: String,

        /// Pipeline name (defaults to the configured default)
        #[arg(long)]
        pipeline: Option<String>,

        /// Include per-stage debug output
        #[arg(long)]
        debug: bool,
    },
}

#[derive(Subcommand)]
enum PipelinesAction {
    /// List configured pipelines and the current default
    List,

    /// Print one pipeline's configuration as YAML
    Get {
        /// Pipeline name (defaults to the configured default)
        name: Option<String>,
    },

    /// Create or replace a pipeline from a YAML file
    Upsert {
        /// Pipeline name
        name: String,
        /// Path to a YAML file with the pipeline body
        file: PathBuf,
    },

    /// Delete a pipeline
    Delete {
        /// Pipeline name
        name: String,
    },

    /// Change the default pipeline
    SetDefault {
        /// Pipeline name
        name: String,
    },

    /// Run administrative pre-flight checks against a pipeline
    Validate {
        /// Pipeline name (defaults to the configured default)
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Arc::new(ConfigStore::open(&cli.config).await?);
    let pool = Arc::new(ConnectionPool::new());
    let cache = Arc::new(ServiceCache::new(Arc::clone(&config), Arc::clone(&pool)));
    let api = Arc::new(Api::new(config, cache, pool));

    match cli.command {
        Commands::Serve { addr } => {
            server::run_server(api, &addr).await?;
        }
        Commands::Pipelines { action } => run_pipelines_command(&api, action).await?,
        Commands::Search { query, pipeline, debug } => {
            if debug {
                let resp = api.search_debug(&query, pipeline.as_deref()).await?;
                println!("{}", serde_json::to_string_pretty(&resp)?);
            } else {
                let resp = api.search(&query, pipeline.as_deref()).await?;
                println!("{}", serde_json::to_string_pretty(&resp)?);
            }
        }
    }

    Ok(())
}

async fn run_pipelines_command(api: &Api, action: PipelinesAction) -> anyhow::Result<()> {
    match action {
        PipelinesAction::List => {
            let snapshot = api.list_pipelines().await?;
            println!("default: {}", snapshot.default);
            for name in snapshot.pipeline_names {
                println!("- {name}");
            }
        }
        PipelinesAction::Get { name } => {
            let config = api.get_pipeline(name.as_deref()).await?;
            print!("{}", serde_yaml::to_string(&config)?);
        }
        PipelinesAction::Upsert { name, file } => {
            let text = std::fs::read_to_string(&file)?;
            let config = api.upsert_pipeline(&name, &text).await?;
            print!("{}", serde_yaml::to_string(&config)?);
        }
        PipelinesAction::Delete { name } => {
            api.delete_pipeline(&name).await?;
            println!("deleted pipeline '{name}'");
        }
        PipelinesAction::SetDefault { name } => {
            api.set_default_pipeline(&name).await?;
            println!("default pipeline is now '{name}'");
        }
        PipelinesAction::Validate { name } => {
            let report = api.validate_pipeline(name.as_deref()).await?;
            if report.ok {
                println!("ok");
            } else {
                println!("invalid:");
                for (field, detail) in &report.errors_by_field {
                    println!("  {field}: {detail}");
                }
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
