//! Model catalog types.
//!
//! Catalog entries are supplied externally (a JSON file or the built-in
//! defaults), installed once per process start, and never mutated after
//! that. Everything the supervisor needs to launch or reach a model lives
//! on its `ModelSpec`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Which backend flavor serves a model.
///
/// Closed set on purpose: adding a third runtime kind must touch every
/// `match` over this enum. Unknown tags in a catalog file fail at
/// deserialization, which is where unsupported runtimes are rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeKind {
    /// A `llama-server` process spawned, owned, and terminated by us.
    #[serde(rename = "llamacpp")]
    LlamaCpp,
    /// An already-running daemon (ollama) reached via its base URL.
    #[default]
    #[serde(rename = "ollama")]
    Ollama,
}

/// Immutable catalog entry for one model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub runtime: RuntimeKind,
    /// Model artifact: a gguf path for managed models, a model tag for the
    /// daemon. Relative paths resolve against the project root.
    #[serde(default)]
    pub artifact: Option<String>,
    /// Daemon base URL; ignored for managed models.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Explicit server binary for managed models, overriding discovery.
    #[serde(default)]
    pub server_path: Option<String>,
    /// Fixed port for the managed server; 0 asks the OS for a free one.
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub ctx_size: Option<u32>,
    #[serde(default)]
    pub gpu_layers: Option<u32>,
    /// Extra arguments appended verbatim to the launch command.
    #[serde(default)]
    pub server_args: Vec<String>,
    /// Prompt template family id; unrecognized ids fall back to a generic
    /// instruct template.
    #[serde(default)]
    pub prompt_template: Option<String>,
    /// Reasoning-tuned models get a stricter answer-only system message
    /// and their `<think>` spans stripped from output.
    #[serde(default)]
    pub reasoning: bool,
    #[serde(default)]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Per-request completion timeout override, in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Identifier → spec mapping, set exactly once per process lifetime.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: HashMap<String, ModelSpec>,
}

impl ModelCatalog {
    pub fn from_specs(specs: Vec<ModelSpec>) -> Self {
        let models = specs
            .into_iter()
            .map(|spec| (spec.id.clone(), spec))
            .collect();
        Self { models }
    }

    pub fn get(&self, id: &str) -> Option<&ModelSpec> {
        self.models.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn specs(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }
}

/// Read a catalog file: a JSON array of model specs.
pub fn load_specs(path: &Path) -> anyhow::Result<Vec<ModelSpec>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading model catalog {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("parsing model catalog {}", path.display()))
}

/// Built-in catalog used when no catalog file is present, so a fresh
/// checkout with a local ollama daemon works out of the box.
pub fn default_specs() -> Vec<ModelSpec> {
    vec![
        ModelSpec {
            id: "scout-mini".to_string(),
            name: "Scout Mini".to_string(),
            artifact: Some("llama3.2:1b".to_string()),
            ..Default::default()
        },
        ModelSpec {
            id: "field-general".to_string(),
            name: "Field General".to_string(),
            artifact: Some("llama3.1:8b".to_string()),
            ..Default::default()
        },
        ModelSpec {
            id: "atlas".to_string(),
            name: "Atlas".to_string(),
            artifact: Some("qwen2.5:14b".to_string()),
            ..Default::default()
        },
    ]
}
