//! Model lifecycle tracking and request mediation.
//!
//! `ModelManager` owns the only mutable shared state in the core: the
//! lifecycle sets, the error map, and the instance pool. It is not
//! internally synchronized. Callers must serialize every state-mutating
//! operation (`load`, `unload`, `set_catalog`, `sync_loaded`, and any
//! `reply` that may lazily start an instance) behind a single external
//! lock shared across all models; taking `&mut self` makes the compiler
//! enforce that shape. The bundled HTTP server wraps one manager in a
//! `tokio::sync::Mutex`. A single-process deployment will normally keep
//! one long-lived manager, but nothing here assumes it is the only one.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use tracing::{error, info};

use crate::catalog::{ModelCatalog, ModelSpec, RuntimeKind};
use crate::error::EngineError;

use super::binary_locator::BinaryLocator;
use super::client::CompletionClient;
use super::instance::InstancePool;
use super::prompt::format_prompt;

/// Per-model lifecycle state. Exactly one holds at a time; `Error` keeps
/// the last failure's text until the next successful load clears it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelStatus {
    Available,
    Loading,
    Loaded,
    Error(String),
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::Available => "available",
            ModelStatus::Loading => "loading",
            ModelStatus::Loaded => "loaded",
            ModelStatus::Error(_) => "error",
        }
    }
}

pub struct ModelManager {
    catalog: ModelCatalog,
    loaded: HashSet<String>,
    loading: HashSet<String>,
    errors: HashMap<String, String>,
    instances: InstancePool,
    locator: BinaryLocator,
    client: CompletionClient,
}

impl ModelManager {
    pub fn new(project_root: PathBuf, allow_remote: bool) -> Self {
        Self {
            catalog: ModelCatalog::default(),
            loaded: HashSet::new(),
            loading: HashSet::new(),
            errors: HashMap::new(),
            instances: InstancePool::new(project_root.clone()),
            locator: BinaryLocator::from_env(project_root),
            client: CompletionClient::new(allow_remote),
        }
    }

    /// Replace the catalog wholesale. Lifecycle state is left untouched;
    /// this happens once at startup.
    pub fn set_catalog(&mut self, specs: Vec<ModelSpec>) {
        info!("model catalog set ({} models)", specs.len());
        self.catalog = ModelCatalog::from_specs(specs);
    }

    /// Overwrite the loaded set, e.g. when restoring persisted state.
    pub fn sync_loaded(&mut self, ids: impl IntoIterator<Item = String>) {
        self.loaded = ids.into_iter().collect();
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Pure lookup; never fails. Unknown identifiers read as available.
    pub fn status(&self, id: &str) -> ModelStatus {
        if self.loading.contains(id) {
            ModelStatus::Loading
        } else if self.loaded.contains(id) {
            ModelStatus::Loaded
        } else if let Some(message) = self.errors.get(id) {
            ModelStatus::Error(message.clone())
        } else {
            ModelStatus::Available
        }
    }

    /// Retained failure text from the last unsuccessful load, if any.
    pub fn last_error(&self, id: &str) -> Option<&str> {
        self.errors.get(id).map(String::as_str)
    }

    /// Currently loaded identifiers, sorted for stable persistence.
    pub fn loaded_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.loaded.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Load a model: for managed specs this makes sure a server process
    /// is running; daemon specs load lazily on the daemon side. Failures
    /// move the model to the error state and are re-signalled; the
    /// loading marker is cleared on every exit path.
    pub async fn load(&mut self, id: &str) -> Result<(), EngineError> {
        self.loading.insert(id.to_string());
        self.errors.remove(id);

        let outcome = self.ensure_runtime(id).await;
        self.loading.remove(id);

        match outcome {
            Ok(()) => {
                self.loaded.insert(id.to_string());
                info!("model {} loaded", id);
                Ok(())
            }
            Err(e) => {
                error!("loading model {} failed: {}", id, e);
                self.errors.insert(id.to_string(), e.to_string());
                Err(e)
            }
        }
    }

    async fn ensure_runtime(&mut self, id: &str) -> Result<(), EngineError> {
        let spec = self.resolve(id)?.clone();
        info!("loading model {} ({:?} runtime)", id, spec.runtime);
        match spec.runtime {
            RuntimeKind::LlamaCpp => {
                self.ensure_instance(id, &spec).await?;
            }
            // The daemon owns its models; nothing to start here.
            RuntimeKind::Ollama => {}
        }
        Ok(())
    }

    /// Remove a model from the loaded set and stop its process if one is
    /// running. Idempotent: unloading a not-loaded id is a no-op.
    pub async fn unload(&mut self, id: &str) {
        self.loaded.remove(id);
        self.instances.terminate(id).await;
    }

    /// Answer a chat message with the given model.
    ///
    /// An empty loaded set passes any catalogued id through (the caller
    /// resolves its own default-model behavior); once anything is loaded,
    /// replies from other models are rejected.
    pub async fn reply(&mut self, id: &str, message: &str) -> Result<String, EngineError> {
        let spec = self.resolve(id)?.clone();

        if !self.loaded.is_empty() && !self.loaded.contains(id) {
            return Err(EngineError::NotLoaded(id.to_string()));
        }

        match spec.runtime {
            RuntimeKind::LlamaCpp => {
                let base_url = self.ensure_instance(id, &spec).await?;
                let prompt = format_prompt(&spec, message);
                self.client
                    .managed_completion(&base_url, &spec, &prompt)
                    .await
            }
            RuntimeKind::Ollama => self.client.daemon_generate(&spec, message).await,
        }
    }

    /// Stop every managed instance (process shutdown path).
    pub async fn shutdown(&mut self) {
        self.instances.shutdown_all().await;
    }

    /// Binary resolution runs once per instance start; a live instance
    /// short-circuits before the locator is consulted again.
    async fn ensure_instance(
        &mut self,
        id: &str,
        spec: &ModelSpec,
    ) -> Result<String, EngineError> {
        if let Some(base_url) = self.instances.base_url(id) {
            return Ok(base_url.to_string());
        }
        let server_path = self.locator.locate(spec);
        self.instances.ensure(id, spec, &server_path).await
    }

    fn resolve(&self, id: &str) -> Result<&ModelSpec, EngineError> {
        if self.catalog.is_empty() {
            return Err(EngineError::CatalogNotSet);
        }
        self.catalog
            .get(id)
            .ok_or_else(|| EngineError::UnknownModel(id.to_string()))
    }
}
