use std::sync::Arc;

use sandbox::{
    Executor, ExecutionRequest, ResourceLimits, SandboxConfig, SandboxError, SandboxResult,
};
use sandbox_nsjail::NsjailExecutor;
use sandbox_proc::{DirectExecutor, PidNamespaceExecutor, PidNamespaceProbe};
use sandbox_validate::{allowed_dependency_names, entrypoint_errors, validate};
use tracing::info;

use crate::capability::{CapabilityDetector, Tier};
use crate::config::ServiceConfig;

/// Orchestrates one execution: validate → resolve dependencies → pick the
/// isolation tier → execute → parse the result. Owns every executor and
/// cache; constructed once at process start and shared by reference.
pub struct SandboxService {
    detector: CapabilityDetector,
    nsjail: NsjailExecutor,
    pid_namespace: PidNamespaceExecutor,
    direct: DirectExecutor,
}

impl SandboxService {
    pub fn new(config: &ServiceConfig) -> Self {
        let probe = Arc::new(PidNamespaceProbe::new());
        let nsjail = NsjailExecutor::new(config.nsjail_settings());
        let detector = CapabilityDetector::new(
            nsjail.is_available(),
            config.disable_full_isolation,
            config.disable_pid_namespace,
            Arc::clone(&probe),
        );
        let pid_namespace = PidNamespaceExecutor::new(
            config.venv_cache_root(),
            config.python.clone(),
            config.install_timeout,
            probe,
        );
        let direct = DirectExecutor::new(
            config.venv_cache_root(),
            config.python.clone(),
            config.install_timeout,
        );

        Self {
            detector,
            nsjail,
            pid_namespace,
            direct,
        }
    }

    pub fn detector(&self) -> &CapabilityDetector {
        &self.detector
    }

    /// Execute one request end to end. Validation errors are raised before
    /// any subprocess is spawned; timeouts and infrastructure failures are
    /// surfaced as typed errors and never retried here.
    pub async fn execute(&self, request: ExecutionRequest) -> sandbox::Result<SandboxResult> {
        let allowed = allowed_dependency_names(&request.dependencies);
        let mut errors = validate(&request.script, &allowed, request.allow_network);
        errors.extend(entrypoint_errors(&request.script));
        if !errors.is_empty() {
            return Err(SandboxError::Validation(errors));
        }

        let tier = self.detector.select().await;

        // Trusted-mode requests mount ambient credentials; a degraded tier
        // cannot honor that contract and must refuse rather than execute
        // with weaker guarantees.
        if request.trust_mode.as_deref() == Some("trusted") && tier != Tier::FullIsolation {
            return Err(SandboxError::Validation(vec![
                "trusted execution requires the full-isolation tier".to_string(),
            ]));
        }

        let mut resources = ResourceLimits::default();
        if let Some(timeout) = request.timeout_seconds {
            resources.timeout_seconds = timeout;
        }
        let config = SandboxConfig {
            network_enabled: request.allow_network,
            resources,
            env_vars: request.env_vars,
            dependencies: request.dependencies,
            tenant_id: request.workspace_id,
        };

        let executor: &dyn Executor = match tier {
            Tier::FullIsolation => &self.nsjail,
            Tier::PidNamespace => &self.pid_namespace,
            Tier::Direct => &self.direct,
        };
        info!(
            tier = executor.name(),
            dependencies = config.dependencies.len(),
            network = config.network_enabled,
            "executing script"
        );
        executor.execute(&request.script, &request.inputs, &config).await
    }
}
