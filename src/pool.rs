//! Connection Pool: keyed, health-checked, idle-expiring handles to the
//! vector database.
//!
//! Handles are keyed by the full binding tuple (host, port, user, password,
//! database), carry a last-used timestamp, and are discarded after 10
//! minutes of inactivity regardless of whether the underlying transport
//! still reports itself connected. `acquire` never raises — on any failure
//! it logs and returns `None`, leaving the caller (the vector store
//! adapter) to treat that as a search failure for the affected stage.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::warn;

use crate::models::MilvusBinding;

/// Soft idle expiry: a handle unused for longer than this is treated as
/// unhealthy regardless of protocol-level liveness.
pub const SOFT_IDLE_THRESHOLD: Duration = Duration::from_secs(10 * 60);

/// A live handle to one Milvus binding. Carries just enough to issue REST
/// calls and to judge its own health; the actual search call lives in
/// [`crate::vector_store`].
#[derive(Clone)]
pub struct MilvusHandle {
    pub base_url: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub client: reqwest::Client,
}

struct PooledEntry {
    handle: MilvusHandle,
    last_used: Instant,
}

/// Keyed pool of [`MilvusHandle`]s, one per distinct binding.
pub struct ConnectionPool {
    entries: Mutex<HashMap<MilvusBinding, PooledEntry>>,
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return an alive handle for `binding`, creating and health-checking one
    /// if none exists or the cached one has gone stale. Returns `None` on
    /// creation failure — callers must treat that as "this search fails".
    ///
    /// The map lock is only ever held for the plain map operations below —
    /// never across the liveness probe or handle creation, both of which
    /// are network calls.
    pub async fn acquire(self: &Arc<Self>, binding: &MilvusBinding) -> Option<MilvusHandle> {
        let cached = {
            let entries = self.entries.lock().await;
            entries
                .get(binding)
                .map(|entry| (entry.handle.clone(), entry.last_used))
        };

        if let Some((handle, last_used)) = cached {
            if last_used.elapsed() < SOFT_IDLE_THRESHOLD && probe_liveness(&handle).await {
                let mut entries = self.entries.lock().await;
                if let Some(entry) = entries.get_mut(binding) {
                    entry.last_used = Instant::now();
                }
                return Some(handle);
            }
            warn!(host = %binding.host, "milvus handle unhealthy or idle-expired, recreating");
            self.entries.lock().await.remove(binding);
        }

        match create_handle(binding).await {
            Ok(handle) => {
                let mut entries = self.entries.lock().await;
                entries.insert(
                    binding.clone(),
                    PooledEntry {
                        handle: handle.clone(),
                        last_used: Instant::now(),
                    },
                );
                Some(handle)
            }
            Err(e) => {
                warn!(host = %binding.host, error = %e, "failed to create milvus handle");
                None
            }
        }
    }

    /// Called at shutdown; drops every cached handle.
    pub async fn close_all(&self) {
        self.entries.lock().await.clear();
    }
}

async fn create_handle(binding: &MilvusBinding) -> anyhow::Result<MilvusHandle> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    let base_url = format!("http://{}:{}", binding.host, binding.port);
    let handle = MilvusHandle {
        base_url,
        user: binding.user.clone(),
        password: binding.password.clone(),
        database: binding.database.clone(),
        client,
    };
    if !probe_liveness(&handle).await {
        anyhow::bail!("liveness probe failed for {}", handle.base_url);
    }
    Ok(handle)
}

/// Cheap liveness probe, equivalent to the original's `utility.list_collections()`.
async fn probe_liveness(handle: &MilvusHandle) -> bool {
    let url = format!("{}/v2/vectordb/collections/list", handle.base_url);
    let mut req = handle.client.post(&url).json(&serde_json::json!({
        "dbName": handle.database,
    }));
    if !handle.user.is_empty() {
        req = req.basic_auth(&handle.user, Some(&handle.password));
    }
    matches!(req.send().await, Ok(resp) if resp.status().is_success())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(host: &str) -> MilvusBinding {
        MilvusBinding {
            host: host.to_string(),
            port: 19530,
            user: String::new(),
            password: String::new(),
            database: String::new(),
            collection: "docs".to_string(),
        }
    }

    #[tokio::test]
    async fn acquire_returns_none_on_unreachable_host() {
        let pool = Arc::new(ConnectionPool::new());
        let handle = pool.acquire(&binding("127.0.0.1.invalid")).await;
        assert!(handle.is_none());
    }

    #[tokio::test]
    async fn distinct_bindings_are_independent_keys() {
        let a = binding("host-a");
        let b = binding("host-b");
        assert_ne!(a, b);
    }
}
