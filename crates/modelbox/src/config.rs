// modelbox/crates/modelbox/src/config.rs

use std::env;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::info;

/// Project root for artifact/binary resolution and child working dirs.
pub const ENV_ROOT: &str = "MODELBOX_ROOT";
/// Path to the model catalog JSON file.
pub const ENV_CATALOG: &str = "MODELBOX_CATALOG";
/// Path to the persisted loaded-model state file.
pub const ENV_STATE: &str = "MODELBOX_STATE";
pub const ENV_API_HOST: &str = "MODELBOX_API_HOST";
pub const ENV_API_PORT: &str = "MODELBOX_API_PORT";
/// Opt-in for non-loopback daemon URLs; off unless set to a truthy value.
pub const ENV_ALLOW_REMOTE: &str = "MODELBOX_ALLOW_REMOTE";

#[derive(Debug, Clone)]
pub struct Config {
    pub project_root: PathBuf,
    pub catalog_path: PathBuf,
    pub state_path: PathBuf,
    pub api_host: String,
    pub api_port: u16,
    pub allow_remote: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let project_root = match env::var(ENV_ROOT) {
            Ok(root) => PathBuf::from(root),
            Err(_) => env::current_dir()?,
        };

        let catalog_path = Self::path_from_env(ENV_CATALOG, &project_root, "config/models.json");
        let state_path = Self::path_from_env(ENV_STATE, &project_root, "data/state.json");

        let api_host = env::var(ENV_API_HOST).unwrap_or_else(|_| "127.0.0.1".into());
        let api_port = env::var(ENV_API_PORT)
            .unwrap_or_else(|_| "8090".into())
            .parse()?;

        let allow_remote = env::var(ENV_ALLOW_REMOTE)
            .map(|v| is_truthy(&v))
            .unwrap_or(false);

        Ok(Self {
            project_root,
            catalog_path,
            state_path,
            api_host,
            api_port,
            allow_remote,
        })
    }

    fn path_from_env(var: &str, root: &Path, default: &str) -> PathBuf {
        let path = env::var(var)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(default));
        if path.is_relative() {
            root.join(path)
        } else {
            path
        }
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- Project Root: {}", self.project_root.display());
        info!("- Model Catalog: {}", self.catalog_path.display());
        info!("- State File: {}", self.state_path.display());
        info!("- API: {}:{}", self.api_host, self.api_port);
        info!("- Allow Remote Runtimes: {}", self.allow_remote);
    }
}

/// Flag parsing shared with the catalog/state files: "1", "true", "yes"
/// and "on" count, anything else is off.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
