// modelbox/crates/modelbox/src/main.rs

#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use tracing::{info, warn};

#[cfg(feature = "cli")]
use modelbox::{catalog, config::Config, server, state::PersistedState, telemetry, ModelManager};

/// Local control plane for offline LLM runtimes.
#[cfg(feature = "cli")]
#[derive(Debug, Parser)]
#[command(name = "modelbox", version, about)]
struct Cli {
    /// Override the API bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the API bind port.
    #[arg(long)]
    port: Option<u16>,

    /// Path to the model catalog JSON file.
    #[arg(long)]
    catalog: Option<PathBuf>,
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(host) = cli.host {
        config.api_host = host;
    }
    if let Some(port) = cli.port {
        config.api_port = port;
    }
    if let Some(catalog_path) = cli.catalog {
        config.catalog_path = catalog_path;
    }
    config.print_config();

    let specs = if config.catalog_path.exists() {
        catalog::load_specs(&config.catalog_path)?
    } else {
        warn!(
            "no catalog file at {}, using built-in defaults",
            config.catalog_path.display()
        );
        catalog::default_specs()
    };

    let mut manager = ModelManager::new(config.project_root.clone(), config.allow_remote);
    manager.set_catalog(specs);

    let persisted = PersistedState::load(&config.state_path);
    if !persisted.loaded_models.is_empty() {
        info!(
            "restoring {} previously loaded model(s)",
            persisted.loaded_models.len()
        );
        manager.sync_loaded(persisted.loaded_models);
    }

    server::run_server(config, manager).await
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
