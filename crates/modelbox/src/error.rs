//! Error taxonomy for the control plane.
//!
//! Callers match on the variant rather than on message text: configuration
//! problems are surfaced immediately and never retried, communication
//! failures may be retried by the caller, and the loaded-set guard is kept
//! distinct from both so the HTTP layer can answer 409 instead of 502.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// No catalog has been installed yet; every operation needs one.
    #[error("model catalog is not initialized")]
    CatalogNotSet,

    /// The identifier does not resolve to a catalog entry.
    #[error("unknown model id: {0}")]
    UnknownModel(String),

    /// A managed model without an artifact path cannot be launched.
    #[error("model {0} has no artifact configured")]
    ArtifactNotConfigured(String),

    /// Reply requested against a model outside the non-empty loaded set.
    #[error("requested model {0} is not loaded")]
    NotLoaded(String),

    /// The runtime process could not be started; carries the attempted
    /// binary path so the operator sees exactly what was executed.
    #[error("failed to start runtime process {}: {}", .path.display(), .source)]
    Spawn { path: PathBuf, source: io::Error },

    /// Binding an ephemeral loopback socket failed.
    #[error("failed to allocate a loopback port: {0}")]
    PortAllocation(io::Error),

    /// Transport failure, timeout, or non-success status from a backend.
    #[error("runtime request failed: {0}")]
    Runtime(String),

    /// Non-loopback daemon URL while remote runtimes are disabled.
    #[error("remote runtimes are disabled by default (refused {0})")]
    RemoteDisabled(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_human_readable() {
        let err = EngineError::UnknownModel("phi-3".to_string());
        assert!(err.to_string().contains("phi-3"));

        let err = EngineError::CatalogNotSet;
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn test_spawn_error_carries_attempted_path() {
        let err = EngineError::Spawn {
            path: PathBuf::from("/opt/runtimes/llama-server"),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        };
        let text = err.to_string();
        assert!(text.contains("/opt/runtimes/llama-server"));
        assert!(text.contains("no such file"));
    }

    #[test]
    fn test_policy_error_names_the_url() {
        let err = EngineError::RemoteDisabled("http://93.184.216.34/api/generate".to_string());
        assert!(err.to_string().contains("93.184.216.34"));
    }
}
