//! The pipeline Config Store.
//!
//! Backs a single on-disk YAML file (default: `config/pipelines.yaml`) holding
//! a [`PipelinesFile`]: a `default` pipeline name plus a name → [`PipelineConfig`]
//! mapping. Every read re-checks the file's mtime and reloads on change, so
//! operators can hot-edit the file without restarting the service.
//!
//! # Locking
//!
//! Reads take a shared advisory lock on the file (via [`fs4`]); writes take
//! an exclusive one, guaranteeing a well-formed read even against a writer
//! in another process. In-process access is additionally serialized by a
//! `tokio::sync::Mutex` around the cached snapshot — two layers because the
//! advisory lock alone wouldn't stop two tasks in this same process from
//! racing each other.
//!
//! # Env substitution
//!
//! Two grammars apply to every string value in the parsed YAML tree,
//! recursively:
//! - a whole value of the form `env:VAR` resolves to `$VAR` (empty if unset);
//! - embedded `${VAR}` occurrences inside a larger string are replaced the
//!   same way; an unterminated `${` is left as a literal.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::sync::Mutex;

use crate::error::{RetrievalError, Result};
use crate::models::{ChunkSizes, PipelineConfig, PipelinesFile, RetrievalParams};

/// A point-in-time view of the pipelines file, returned by `list`/`reload`.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub default: String,
    pub pipeline_names: Vec<String>,
}

struct CachedState {
    file: PipelinesFile,
    mtime: Option<SystemTime>,
}

/// The single process-wide owner of the on-disk pipelines file.
///
/// Per the re-architecture notes, this is the one component allowed
/// process-wide identity — it is the sole holder of the file lock and the
/// sole writer of the file — everything else receives it via `Arc`.
pub struct ConfigStore {
    path: PathBuf,
    state: Mutex<CachedState>,
}

impl ConfigStore {
    /// Load the store from `path`, creating nothing — the file must already exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (file, mtime) = read_and_parse(&path).await?;
        Ok(Self {
            path,
            state: Mutex::new(CachedState { file, mtime }),
        })
    }

    /// Re-read from disk only if the file's mtime has advanced since the
    /// last observed value.
    async fn ensure_fresh(&self, state: &mut CachedState) -> Result<()> {
        let current_mtime = file_mtime(&self.path).await;
        if current_mtime != state.mtime {
            let (file, mtime) = read_and_parse(&self.path).await?;
            state.file = file;
            state.mtime = mtime;
        }
        Ok(())
    }

    pub async fn list(&self) -> Result<Snapshot> {
        let mut state = self.state.lock().await;
        self.ensure_fresh(&mut state).await?;
        Ok(Snapshot {
            default: state.file.default.clone(),
            pipeline_names: state.file.pipelines.keys().cloned().collect(),
        })
    }

    pub async fn get(&self, name: Option<&str>) -> Result<PipelineConfig> {
        let mut state = self.state.lock().await;
        self.ensure_fresh(&mut state).await?;
        let name = name.unwrap_or(&state.file.default).to_string();
        state
            .file
            .pipelines
            .get(&name)
            .cloned()
            .ok_or_else(|| RetrievalError::not_found(name))
    }

    /// Force a re-read from disk regardless of observed mtime.
    pub async fn reload(&self) -> Result<Snapshot> {
        let mut state = self.state.lock().await;
        let (file, mtime) = read_and_parse(&self.path).await?;
        state.file = file;
        state.mtime = mtime;
        Ok(Snapshot {
            default: state.file.default.clone(),
            pipeline_names: state.file.pipelines.keys().cloned().collect(),
        })
    }

    /// Parse, env-substitute, and validate `config_text` as one pipeline's
    /// YAML body, then write the whole file back atomically under an
    /// exclusive lock. Returns the validated config.
    pub async fn upsert(&self, name: &str, config_text: &str) -> Result<PipelineConfig> {
        let mut value: serde_yaml::Value = serde_yaml::from_str(config_text).map_err(|e| {
            RetrievalError::invalid_config(name, format!("YAML parse error: {e}"))
        })?;
        substitute_env(&mut value);
        let config: PipelineConfig = serde_yaml::from_value(value).map_err(|e| {
            RetrievalError::invalid_config(name, format!("schema error: {e}"))
        })?;
        validate_pipeline(name, &config)?;

        let mut state = self.state.lock().await;
        self.ensure_fresh(&mut state).await?;
        state.file.pipelines.insert(name.to_string(), config.clone());
        if state.file.default.is_empty() {
            state.file.default = name.to_string();
        }
        validate_whole_file(&state.file)?;
        let mtime = write_atomic(&self.path, &state.file).await?;
        state.mtime = Some(mtime);
        Ok(config)
    }

    /// Remove `name`. If it was `default`, the new default becomes the
    /// first remaining entry in deterministic (`BTreeMap`) key order.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_fresh(&mut state).await?;
        if state.file.pipelines.remove(name).is_none() {
            return Err(RetrievalError::not_found(name));
        }
        if state.file.default == name {
            state.file.default = state
                .file
                .pipelines
                .keys()
                .next()
                .cloned()
                .unwrap_or_default();
        }
        let mtime = write_atomic(&self.path, &state.file).await?;
        state.mtime = Some(mtime);
        Ok(())
    }

    pub async fn set_default(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_fresh(&mut state).await?;
        if !state.file.pipelines.contains_key(name) {
            return Err(RetrievalError::not_found(name));
        }
        state.file.default = name.to_string();
        let mtime = write_atomic(&self.path, &state.file).await?;
        state.mtime = Some(mtime);
        Ok(())
    }
}

async fn file_mtime(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .and_then(|m| m.modified().ok())
}

async fn read_and_parse(path: &Path) -> Result<(PipelinesFile, Option<SystemTime>)> {
    let path = path.to_path_buf();
    let (raw, mtime) = tokio::task::spawn_blocking(move || -> Result<(String, Option<SystemTime>)> {
        let file = std::fs::File::open(&path).map_err(|e| {
            RetrievalError::invalid_config("path", format!("cannot open {}: {e}", path.display()))
        })?;
        fs4::FileExt::lock_shared(&file).map_err(|e| {
            RetrievalError::Internal(format!("failed to lock {} for read: {e}", path.display()))
        })?;
        let content = std::fs::read_to_string(&path).map_err(|e| {
            RetrievalError::invalid_config("path", format!("cannot read {}: {e}", path.display()))
        })?;
        let mtime = file.metadata().ok().and_then(|m| m.modified().ok());
        fs4::FileExt::unlock(&file).ok();
        Ok((content, mtime))
    })
    .await
    .map_err(|e| RetrievalError::Internal(format!("read task panicked: {e}")))??;

    let mut value: serde_yaml::Value = serde_yaml::from_str(&raw)
        .map_err(|e| RetrievalError::invalid_config("<file>", format!("YAML parse error: {e}")))?;
    substitute_env(&mut value);
    let file: PipelinesFile = serde_yaml::from_value(value)
        .map_err(|e| RetrievalError::invalid_config("<file>", format!("schema error: {e}")))?;
    validate_whole_file(&file)?;
    Ok((file, mtime))
}

async fn write_atomic(path: &Path, file: &PipelinesFile) -> Result<SystemTime> {
    let path = path.to_path_buf();
    let text = serde_yaml::to_string(file)
        .map_err(|e| RetrievalError::Internal(format!("failed to serialize pipelines file: {e}")))?;

    tokio::task::spawn_blocking(move || -> Result<SystemTime> {
        let lock_file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| RetrievalError::Internal(format!("cannot open {}: {e}", path.display())))?;
        fs4::FileExt::lock_exclusive(&lock_file).map_err(|e| {
            RetrievalError::Internal(format!("failed to lock {} for write: {e}", path.display()))
        })?;

        let tmp_path = path.with_extension("yaml.tmp");
        std::fs::write(&tmp_path, text.as_bytes())
            .map_err(|e| RetrievalError::Internal(format!("write failed: {e}")))?;
        std::fs::rename(&tmp_path, &path)
            .map_err(|e| RetrievalError::Internal(format!("atomic rename failed: {e}")))?;

        let mtime = std::fs::metadata(&path)
            .ok()
            .and_then(|m| m.modified().ok())
            .unwrap_or_else(SystemTime::now);
        fs4::FileExt::unlock(&lock_file).ok();
        Ok(mtime)
    })
    .await
    .map_err(|e| RetrievalError::Internal(format!("write task panicked: {e}")))?
}

/// Recursively resolve `env:VAR` (whole-value form) and embedded `${VAR}`
/// occurrences across a parsed YAML tree. A lone unterminated `${` is left
/// as a literal rather than treated as an error.
fn substitute_env(value: &mut serde_yaml::Value) {
    match value {
        serde_yaml::Value::String(s) => {
            *s = resolve_string(s);
        }
        serde_yaml::Value::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                substitute_env(v);
            }
        }
        serde_yaml::Value::Sequence(seq) => {
            for v in seq.iter_mut() {
                substitute_env(v);
            }
        }
        _ => {}
    }
}

fn resolve_string(s: &str) -> String {
    if let Some(var) = s.strip_prefix("env:") {
        return std::env::var(var).unwrap_or_default();
    }
    resolve_embedded(s)
}

fn resolve_embedded(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            if let Some(end) = s[i + 2..].find('}') {
                let var = &s[i + 2..i + 2 + end];
                out.push_str(&std::env::var(var).unwrap_or_default());
                i += 2 + end + 1;
                continue;
            }
            // unterminated ${ — emit literally
            out.push_str(&s[i..]);
            break;
        }
        let ch_len = s[i..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
        out.push_str(&s[i..i + ch_len]);
        i += ch_len;
    }
    out
}

/// Validation enforced at write time: `default` must resolve, every
/// pipeline needs at least one embedder, and every sizing parameter must be
/// strictly positive. Deep external-service checks belong to the validator,
/// not here — they'd make the config unwritable whenever a downstream
/// service happens to be down.
fn validate_whole_file(file: &PipelinesFile) -> Result<()> {
    if !file.pipelines.contains_key(&file.default) {
        return Err(RetrievalError::invalid_config(
            "default",
            format!("default pipeline '{}' does not exist", file.default),
        ));
    }
    for (name, cfg) in &file.pipelines {
        validate_pipeline(name, cfg)?;
    }
    Ok(())
}

fn validate_pipeline(name: &str, config: &PipelineConfig) -> Result<()> {
    if config.embedding_models.is_empty() {
        return Err(RetrievalError::invalid_config(
            format!("pipelines.{name}.embedding_models"),
            "at least one embedding model spec is required",
        ));
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
            return Err(RetrievalError::invalid_config(
                format!("pipelines.{name}.{field}"),
                "must be strictly positive",
            ));
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
            return Err(RetrievalError::invalid_config(
                format!("pipelines.{name}.{field}"),
                "must be strictly positive",
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
default: p1
pipelines:
  p1:
    milvus:
      host: "env:MILVUS_HOST"
      port: 19530
      collection: docs
    embedding_models: ["qwen:text-embedding-v2"]
    retrieval:
      top_k_per_model: 5
      rerank_top_k: 5
      final_top_k: 3
    chunk_sizes:
      initial_search: 10
      rerank_input: 5
      llm_filter_input: 5
"#
    }

    #[tokio::test]
    async fn env_substitution_whole_value() {
        std::env::set_var("MILVUS_HOST", "vectordb.internal");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipelines.yaml");
        std::fs::write(&path, sample_yaml()).unwrap();

        let store = ConfigStore::open(&path).await.unwrap();
        let cfg = store.get(Some("p1")).await.unwrap();
        assert_eq!(cfg.milvus.host, "vectordb.internal");
    }

    #[tokio::test]
    async fn embedded_env_substitution_and_literal_unterminated() {
        std::env::set_var("SUFFIX", "prod");
        let resolved = resolve_embedded("docs-${SUFFIX}-v1 and a lone ${ marker");
        assert_eq!(resolved, "docs-prod-v1 and a lone ${ marker");
    }

    #[tokio::test]
    async fn get_missing_pipeline_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipelines.yaml");
        std::fs::write(&path, sample_yaml()).unwrap();
        let store = ConfigStore::open(&path).await.unwrap();
        let err = store.get(Some("nope")).await.unwrap_err();
        assert!(matches!(err, RetrievalError::NotFound { .. }));
    }

    #[tokio::test]
    async fn upsert_rejects_zero_top_k() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipelines.yaml");
        std::fs::write(&path, sample_yaml()).unwrap();
        let store = ConfigStore::open(&path).await.unwrap();

        let bad = r#"
milvus: { host: h, port: 1, collection: c }
embedding_models: ["qwen:m"]
retrieval: { top_k_per_model: 0, rerank_top_k: 1, final_top_k: 1 }
"#;
        let err = store.upsert("p2", bad).await.unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn upsert_idempotence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipelines.yaml");
        std::fs::write(&path, sample_yaml()).unwrap();
        let store = ConfigStore::open(&path).await.unwrap();

        let text = r#"
milvus: { host: h, port: 1, collection: c }
embedding_models: ["qwen:m"]
retrieval: { top_k_per_model: 2, rerank_top_k: 2, final_top_k: 2 }
"#;
        let first = store.upsert("p2", text).await.unwrap();
        let second = store.upsert("p2", text).await.unwrap();
        assert_eq!(first.milvus.host, second.milvus.host);
        assert_eq!(first.retrieval.final_top_k, second.retrieval.final_top_k);
    }

    #[tokio::test]
    async fn delete_default_picks_deterministic_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipelines.yaml");
        std::fs::write(&path, sample_yaml()).unwrap();
        let store = ConfigStore::open(&path).await.unwrap();

        let text = r#"
milvus: { host: h, port: 1, collection: c }
embedding_models: ["qwen:m"]
"#;
        store.upsert("a2", text).await.unwrap();
        store.delete("p1").await.unwrap();
        let snap = store.list().await.unwrap();
        assert_eq!(snap.default, "a2");
    }
}
