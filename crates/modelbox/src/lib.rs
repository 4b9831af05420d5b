// modelbox/crates/modelbox/src/lib.rs

pub mod catalog;
pub mod config;
pub mod error;
pub mod model_runtime;
pub mod state;
pub mod telemetry;

#[cfg(feature = "cli")]
pub mod server;

// Public API exports
pub use catalog::{ModelCatalog, ModelSpec, RuntimeKind};
pub use config::Config;
pub use error::EngineError;
pub use model_runtime::{ModelManager, ModelStatus};
pub use state::PersistedState;
