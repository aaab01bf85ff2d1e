use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use sandbox::{
    DEPENDENCIES_FILE, Executor, Inputs, JobDir, SandboxConfig, SandboxError, SandboxResult,
    build_env,
};
use sandbox_cache::{CacheError, PackageCache, cache_key};
use tracing::{debug, info};

use crate::cfgtext::{execute_config, install_config, validate_cache_key};
use crate::invoke::{Invocation, JailOutcome, infra_hint, invoke, truncate};
use crate::prerequisites;
use crate::settings::NsjailSettings;
use crate::slirp::SLIRP_DNS;

/// Fixed installer script, copied verbatim into the install job directory.
const INSTALL_SCRIPT: &str = include_str!("../scripts/install.py");
const INSTALL_SCRIPT_FILE: &str = "install.py";

/// Full-isolation tier: every job runs under the external jail binary with
/// a freshly generated declarative config, a read-only rootfs, an isolated
/// network namespace, and rlimits mapped from the request.
pub struct NsjailExecutor {
    settings: NsjailSettings,
    cache: PackageCache,
}

impl NsjailExecutor {
    pub fn new(settings: NsjailSettings) -> Self {
        let cache = PackageCache::new(settings.cache_root.clone(), settings.install_timeout);
        Self { settings, cache }
    }

    pub fn is_available(&self) -> bool {
        prerequisites::is_available(&self.settings)
    }

    pub fn settings(&self) -> &NsjailSettings {
        &self.settings
    }

    /// Resolve the dependency cache entry for this request, installing
    /// under the per-key lock on a miss. Returns `None` for
    /// dependency-free requests (no cache entry exists for the empty set).
    async fn ensure_dependencies(&self, config: &SandboxConfig) -> sandbox::Result<Option<PathBuf>> {
        if config.dependencies.is_empty() {
            return Ok(None);
        }
        let key = cache_key(&config.dependencies, config.tenant_id.as_deref());
        validate_cache_key(&key)?;

        let path = self
            .cache
            .ensure_with(&key, |tmp| self.install_into(tmp, &config.dependencies))
            .await
            .map_err(|e| match e {
                CacheError::InstallTimeout { timeout_secs } => SandboxError::PackageInstall(
                    format!("installation timed out after {timeout_secs}s"),
                ),
                other => SandboxError::PackageInstall(other.to_string()),
            })?;
        Ok(Some(path))
    }

    /// Install phase: always network-enabled, writable target and shared
    /// pip cache, fixed non-interpolated install script reading
    /// `dependencies.json`.
    async fn install_into(
        &self,
        target: PathBuf,
        dependencies: &[String],
    ) -> sandbox_cache::Result<()> {
        let job = tempfile::Builder::new()
            .prefix("sbx-install-")
            .tempdir()
            .map_err(CacheError::Io)?;
        tokio::fs::set_permissions(job.path(), std::fs::Permissions::from_mode(0o700))
            .await
            .map_err(CacheError::Io)?;

        let deps_json = serde_json::to_vec(dependencies)
            .map_err(|e| CacheError::InstallFailed(format!("encode dependencies: {e}")))?;
        tokio::fs::write(job.path().join(DEPENDENCIES_FILE), deps_json)
            .await
            .map_err(CacheError::Io)?;
        tokio::fs::write(job.path().join(INSTALL_SCRIPT_FILE), INSTALL_SCRIPT)
            .await
            .map_err(CacheError::Io)?;
        let resolv = job.path().join("resolv.conf");
        tokio::fs::write(&resolv, format!("nameserver {SLIRP_DNS}\n"))
            .await
            .map_err(CacheError::Io)?;

        let config_text =
            install_config(&self.settings, job.path(), &target, &resolv, INSTALL_SCRIPT_FILE)
                .map_err(|e| CacheError::InstallFailed(e.to_string()))?;
        let config_path = job.path().join(sandbox::CONFIG_FILE);
        tokio::fs::write(&config_path, config_text)
            .await
            .map_err(CacheError::Io)?;
        tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(CacheError::Io)?;

        let env = build_env(&std::collections::HashMap::new());
        let outcome = invoke(Invocation {
            binary: &self.settings.binary,
            config_path: &config_path,
            workdir: job.path(),
            env: &env,
            timeout: self.settings.install_timeout,
            network: true,
        })
        .await
        .map_err(|e| CacheError::InstallFailed(e.to_string()))?;

        if outcome.exit_code == Some(0) {
            info!(count = dependencies.len(), "dependencies installed");
            Ok(())
        } else {
            Err(CacheError::InstallFailed(format!(
                "installer exited with {:?}: {}",
                outcome.exit_code,
                truncate(outcome.stderr.trim(), 2000),
            )))
        }
    }

    /// Turn a jail outcome into a typed result. The absence of a result
    /// file means the harness itself failed: the message is generic and
    /// the raw tool stderr goes to the debug log only, truncated.
    pub(crate) async fn classify(
        job: &JobDir,
        outcome: JailOutcome,
    ) -> sandbox::Result<SandboxResult> {
        match sandbox::read_result(job).await? {
            Some(raw) => Ok(SandboxResult::from_raw(raw, outcome.exit_code, outcome.elapsed)),
            None => {
                debug!(
                    job_id = %job.id(),
                    exit_code = ?outcome.exit_code,
                    stderr = %truncate(&outcome.stderr, 2000),
                    "jail produced no result file"
                );
                Err(SandboxError::Infrastructure {
                    message: "sandbox exited without producing a result".to_string(),
                    hint: infra_hint(&outcome.stderr),
                })
            }
        }
    }
}

#[async_trait]
impl Executor for NsjailExecutor {
    fn name(&self) -> &'static str {
        "nsjail"
    }

    async fn execute(
        &self,
        script: &str,
        inputs: &Inputs,
        config: &SandboxConfig,
    ) -> sandbox::Result<SandboxResult> {
        let deps_dir = self.ensure_dependencies(config).await?;

        let job = JobDir::create(script, inputs, &config.dependencies).await?;
        let resolv = if config.network_enabled {
            job.write_resolv_conf(SLIRP_DNS).await?;
            Some(job.resolv_path())
        } else {
            None
        };

        let config_text = execute_config(
            &self.settings,
            job.path(),
            deps_dir.as_deref(),
            resolv.as_deref(),
            &config.resources,
        )?;
        job.write_config(&config_text).await?;

        let env = build_env(&config.env_vars);
        let outcome = invoke(Invocation {
            binary: &self.settings.binary,
            config_path: &job.config_path(),
            workdir: job.path(),
            env: &env,
            timeout: Duration::from_secs(config.resources.timeout_seconds),
            network: config.network_enabled,
        })
        .await?;

        info!(
            job_id = %job.id(),
            exit_code = ?outcome.exit_code,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "jail exited"
        );
        Self::classify(&job, outcome).await
    }
}
