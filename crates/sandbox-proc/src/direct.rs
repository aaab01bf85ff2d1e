use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use sandbox::{Executor, Inputs, JobDir, SandboxConfig, SandboxError, SandboxResult, build_env};
use sandbox_cache::cache_key;
use sandbox_validate::{allowed_dependency_names, allowed_import_names};
use tracing::info;

use crate::process::{finish, run_wrapper};
use crate::venv::VenvCache;

/// No-isolation fallback tier.
///
/// Safe to run only because the static validator has already accepted the
/// script; as defense-in-depth the job directory carries an
/// `allowed_modules.json`, which makes the fixed wrapper install a runtime
/// import hook blocking non-allowlisted imports issued by the user's own
/// code (installed packages keep their internal imports).
pub struct DirectExecutor {
    venvs: VenvCache,
    host_python: PathBuf,
}

impl DirectExecutor {
    pub fn new(venv_root: PathBuf, host_python: PathBuf, install_timeout: Duration) -> Self {
        Self {
            venvs: VenvCache::new(venv_root, host_python.clone(), install_timeout),
            host_python,
        }
    }

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
impl Executor for DirectExecutor {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn execute(
        &self,
        script: &str,
        inputs: &Inputs,
        config: &SandboxConfig,
    ) -> sandbox::Result<SandboxResult> {
        let interpreter = self.interpreter(config).await?;
        let job = JobDir::create(script, inputs, &config.dependencies).await?;

        let allowed = allowed_import_names(
            &allowed_dependency_names(&config.dependencies),
            config.network_enabled,
        );
        job.write_allowed_modules(&allowed).await?;

        let env = build_env(&config.env_vars);
        let timeout = Duration::from_secs(config.resources.timeout_seconds);
        let outcome = run_wrapper(&interpreter, &job, &env, timeout, false).await?;

        info!(
            job_id = %job.id(),
            exit_code = ?outcome.exit_code,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "wrapper exited"
        );
        finish(&job, outcome).await
    }
}
