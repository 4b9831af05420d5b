//! Managed runtime process supervision.
//!
//! One `llama-server` process per managed model. Each instance owns its
//! child handle exclusively; registration happens only after a successful
//! spawn, so a failed `ensure` never leaves a half-started record behind.

use std::collections::HashMap;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::catalog::ModelSpec;
use crate::error::EngineError;

/// Best-effort warm-up after spawn, not a readiness guarantee: callers
/// must tolerate a refused first completion request.
const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Bound on each termination wait (graceful, then forced).
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);
const TERMINATE_POLL: Duration = Duration::from_millis(100);

/// One running managed-runtime process and the loopback URL it serves.
pub struct RuntimeInstance {
    child: Child,
    base_url: String,
    port: u16,
}

impl RuntimeInstance {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for RuntimeInstance {
    // Backstop for instances dropped outside terminate(); killing an
    // already-reaped child is a harmless error.
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub struct InstancePool {
    project_root: PathBuf,
    instances: HashMap<String, RuntimeInstance>,
}

impl InstancePool {
    pub fn new(project_root: PathBuf) -> Self {
        Self {
            project_root,
            instances: HashMap::new(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.instances.contains_key(id)
    }

    pub fn base_url(&self, id: &str) -> Option<&str> {
        self.instances.get(id).map(|instance| instance.base_url())
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Spawn the server process for `id` unless one is already running.
    /// Idempotent; returns the instance's base URL either way.
    pub async fn ensure(
        &mut self,
        id: &str,
        spec: &ModelSpec,
        server_path: &Path,
    ) -> Result<String, EngineError> {
        if let Some(instance) = self.instances.get(id) {
            return Ok(instance.base_url.clone());
        }

        let model_path = self.resolve_artifact(spec)?;
        let port = if spec.port != 0 {
            spec.port
        } else {
            pick_free_port()?
        };

        debug!(
            "server binary: {} (exists: {})",
            server_path.display(),
            server_path.exists()
        );
        debug!(
            "model artifact: {} (exists: {})",
            model_path.display(),
            model_path.exists()
        );

        let mut command = Command::new(server_path);
        command
            .arg("--model")
            .arg(&model_path)
            .arg("--host")
            .arg("127.0.0.1")
            .arg("--port")
            .arg(port.to_string());
        if let Some(ctx_size) = spec.ctx_size {
            command.arg("--ctx-size").arg(ctx_size.to_string());
        }
        if let Some(gpu_layers) = spec.gpu_layers {
            command.arg("--n-gpu-layers").arg(gpu_layers.to_string());
        }
        for extra in &spec.server_args {
            command.arg(extra);
        }

        // llama-server is chatty on stdout/stderr; keep the console clean.
        let child = command
            .current_dir(&self.project_root)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                path: server_path.to_path_buf(),
                source,
            })?;

        let base_url = format!("http://127.0.0.1:{}", port);
        info!(
            "spawned llama-server for {} at {} (pid {})",
            id,
            base_url,
            child.id()
        );
        self.instances.insert(
            id.to_string(),
            RuntimeInstance {
                child,
                base_url: base_url.clone(),
                port,
            },
        );

        // Give the server a moment to begin listening.
        sleep(SETTLE_DELAY).await;

        Ok(base_url)
    }

    fn resolve_artifact(&self, spec: &ModelSpec) -> Result<PathBuf, EngineError> {
        let artifact = spec
            .artifact
            .as_deref()
            .filter(|artifact| !artifact.is_empty())
            .ok_or_else(|| EngineError::ArtifactNotConfigured(spec.id.clone()))?;
        let mut resolved = PathBuf::from(artifact);
        if resolved.is_relative() {
            resolved = self.project_root.join(resolved);
        }
        Ok(resolved)
    }

    /// Graceful stop with bounded escalation: termination request, wait,
    /// force-kill, wait again. The record is discarded in every path.
    pub async fn terminate(&mut self, id: &str) {
        let Some(mut instance) = self.instances.remove(id) else {
            return;
        };
        info!("stopping llama-server for {}", id);

        request_exit(&mut instance.child);
        if wait_with_timeout(&mut instance.child, TERMINATE_TIMEOUT).await {
            return;
        }

        warn!("llama-server for {} ignored the stop request, killing", id);
        let _ = instance.child.kill();
        if !wait_with_timeout(&mut instance.child, TERMINATE_TIMEOUT).await {
            warn!("llama-server for {} did not exit after kill", id);
        }
    }

    /// Terminate every live instance (process shutdown path).
    pub async fn shutdown_all(&mut self) {
        let ids: Vec<String> = self.instances.keys().cloned().collect();
        for id in ids {
            self.terminate(&id).await;
        }
    }
}

/// Ask the process to exit cleanly. On unix that is SIGTERM so the server
/// can release the model; elsewhere there is no graceful signal and the
/// escalation path does the work.
#[cfg(unix)]
fn request_exit(child: &mut Child) {
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn request_exit(child: &mut Child) {
    let _ = child.kill();
}

async fn wait_with_timeout(child: &mut Child, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("runtime process exited: {}", status);
                return true;
            }
            Ok(None) => {}
            Err(e) => {
                // Can't poll it any more; treat it as gone.
                warn!("failed to poll runtime process: {}", e);
                return true;
            }
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(TERMINATE_POLL).await;
    }
}

/// Bind an ephemeral loopback socket to learn a free port, then release
/// it for the child process to claim.
fn pick_free_port() -> Result<u16, EngineError> {
    let listener =
        TcpListener::bind(("127.0.0.1", 0)).map_err(EngineError::PortAllocation)?;
    let port = listener
        .local_addr()
        .map_err(EngineError::PortAllocation)?
        .port();
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RuntimeKind;

    fn managed_spec(id: &str, artifact: Option<&str>) -> ModelSpec {
        ModelSpec {
            id: id.to_string(),
            name: id.to_string(),
            runtime: RuntimeKind::LlamaCpp,
            artifact: artifact.map(str::to_string),
            ..Default::default()
        }
    }

    // ===== Port Allocation Tests =====

    #[test]
    fn test_pick_free_port_returns_usable_port() {
        let port = pick_free_port().unwrap();
        assert!(port > 0);
        // Released port is bindable again.
        assert!(TcpListener::bind(("127.0.0.1", port)).is_ok());
    }

    // ===== Ensure Failure Tests =====

    #[tokio::test]
    async fn test_ensure_without_artifact_registers_nothing() {
        let root = tempfile::tempdir().unwrap();
        let mut pool = InstancePool::new(root.path().to_path_buf());

        let err = pool
            .ensure("m1", &managed_spec("m1", None), Path::new("/bin/true"))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::ArtifactNotConfigured(_)));
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_ensure_spawn_failure_registers_nothing() {
        let root = tempfile::tempdir().unwrap();
        let mut pool = InstancePool::new(root.path().to_path_buf());
        let missing = root.path().join("runtimes/llama.cpp/llama-server");

        let err = pool
            .ensure("m1", &managed_spec("m1", Some("models/m1.gguf")), &missing)
            .await
            .unwrap_err();

        match err {
            EngineError::Spawn { path, .. } => assert_eq!(path, missing),
            other => panic!("expected spawn error, got {:?}", other),
        }
        assert!(pool.is_empty());
        assert!(!pool.contains("m1"));
    }

    // ===== Ensure / Terminate Lifecycle Tests (unix: needs /bin/sh) =====

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let mut pool = InstancePool::new(root.path().to_path_buf());
        let spec = managed_spec("m1", Some("models/m1.gguf"));

        let first = pool.ensure("m1", &spec, Path::new("/bin/sh")).await.unwrap();
        assert!(first.starts_with("http://127.0.0.1:"));
        assert!(pool.contains("m1"));
        assert_eq!(pool.len(), 1);

        let second = pool.ensure("m1", &spec, Path::new("/bin/sh")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(pool.len(), 1);

        pool.terminate("m1").await;
        assert!(pool.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_configured_port_is_used_verbatim() {
        let root = tempfile::tempdir().unwrap();
        let mut pool = InstancePool::new(root.path().to_path_buf());
        let mut spec = managed_spec("m1", Some("models/m1.gguf"));
        spec.port = 18311;

        let base_url = pool.ensure("m1", &spec, Path::new("/bin/sh")).await.unwrap();
        assert_eq!(base_url, "http://127.0.0.1:18311");

        pool.terminate("m1").await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_stops_a_live_process() {
        let root = tempfile::tempdir().unwrap();
        let mut pool = InstancePool::new(root.path().to_path_buf());

        // A process that ignores no signals and would otherwise outlive
        // the test by a wide margin.
        let child = Command::new("sleep")
            .arg("60")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        pool.instances.insert(
            "m1".to_string(),
            RuntimeInstance {
                child,
                base_url: "http://127.0.0.1:18000".to_string(),
                port: 18000,
            },
        );

        let started = Instant::now();
        pool.terminate("m1").await;
        assert!(pool.is_empty());
        // SIGTERM path, not the force-kill timeout.
        assert!(started.elapsed() < TERMINATE_TIMEOUT);
    }

    #[tokio::test]
    async fn test_terminate_unknown_id_is_a_noop() {
        let root = tempfile::tempdir().unwrap();
        let mut pool = InstancePool::new(root.path().to_path_buf());
        pool.terminate("never-seen").await;
        assert!(pool.is_empty());
    }

    // ===== Artifact Resolution Tests =====

    #[test]
    fn test_relative_artifact_resolves_against_project_root() {
        let pool = InstancePool::new(PathBuf::from("/srv/modelbox"));
        let resolved = pool
            .resolve_artifact(&managed_spec("m1", Some("models/m1.gguf")))
            .unwrap();
        assert_eq!(resolved, PathBuf::from("/srv/modelbox/models/m1.gguf"));
    }

    #[test]
    fn test_absolute_artifact_is_kept() {
        let pool = InstancePool::new(PathBuf::from("/srv/modelbox"));
        let resolved = pool
            .resolve_artifact(&managed_spec("m1", Some("/data/m1.gguf")))
            .unwrap();
        assert_eq!(resolved, PathBuf::from("/data/m1.gguf"));
    }

    #[test]
    fn test_empty_artifact_is_not_configured() {
        let pool = InstancePool::new(PathBuf::from("/srv/modelbox"));
        let err = pool
            .resolve_artifact(&managed_spec("m1", Some("")))
            .unwrap_err();
        assert!(matches!(err, EngineError::ArtifactNotConfigured(_)));
    }
}
