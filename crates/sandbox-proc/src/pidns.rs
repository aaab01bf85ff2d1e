use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sandbox::{Executor, Inputs, JobDir, SandboxConfig, SandboxError, SandboxResult, build_env};
use sandbox_cache::cache_key;
use tracing::{info, warn};

use crate::probe::PidNamespaceProbe;
use crate::process::{finish, run_wrapper};
use crate::venv::VenvCache;

/// Degraded isolation tier: wraps the interpreter in a fresh PID namespace
/// when the host allows it, and otherwise runs a bare subprocess with a
/// logged warning, never a silent downgrade.
///
/// Provides no filesystem or network isolation; it exists for hosts where
/// full isolation is categorically unavailable, with the static validator
/// as the primary control.
pub struct PidNamespaceExecutor {
    venvs: VenvCache,
    host_python: PathBuf,
    probe: Arc<PidNamespaceProbe>,
}

impl PidNamespaceExecutor {
    pub fn new(
        venv_root: PathBuf,
        host_python: PathBuf,
        install_timeout: Duration,
        probe: Arc<PidNamespaceProbe>,
    ) -> Self {
        Self {
            venvs: VenvCache::new(venv_root, host_python.clone(), install_timeout),
            host_python,
            probe,
        }
    }

    /// Pick the interpreter: the host's for dependency-free scripts (fast
    /// path, no cache entry), otherwise the cached per-key virtualenv's.
    async fn interpreter(&self, config: &SandboxConfig) -> sandbox::Result<PathBuf> {
        if config.dependencies.is_empty() {
            return Ok(self.host_python.clone());
        }
        let key = cache_key(&config.dependencies, config.tenant_id.as_deref());
        let venv = self
            .venvs
            .ensure(&key, &config.dependencies)
            .await
            .map_err(|e| SandboxError::PackageInstall(e.to_string()))?;
        Ok(VenvCache::interpreter(&venv))
    }
}

#[async_trait]
impl Executor for PidNamespaceExecutor {
    fn name(&self) -> &'static str {
        "pid-namespace"
    }

    async fn execute(
        &self,
        script: &str,
        inputs: &Inputs,
        config: &SandboxConfig,
    ) -> sandbox::Result<SandboxResult> {
        let interpreter = self.interpreter(config).await?;
        let job = JobDir::create(script, inputs, &config.dependencies).await?;

        let namespaced = self.probe.available().await;
        if !namespaced {
            warn!(job_id = %job.id(), "PID namespace unavailable; running as bare subprocess");
        }

        let env = build_env(&config.env_vars);
        let timeout = Duration::from_secs(config.resources.timeout_seconds);
        let outcome = run_wrapper(&interpreter, &job, &env, timeout, namespaced).await?;

        info!(
            job_id = %job.id(),
            exit_code = ?outcome.exit_code,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "wrapper exited"
        );
        finish(&job, outcome).await
    }
}
