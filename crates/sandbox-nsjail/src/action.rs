use std::time::Duration;

use sandbox::{
    ActionSandboxConfig, Inputs, JobDir, SandboxError, SandboxResult, TrustMode, build_env,
};
use tracing::{info, warn};

use crate::cfgtext::action_config;
use crate::executor::NsjailExecutor;
use crate::invoke::{Invocation, invoke};
use crate::slirp::SLIRP_DNS;

/// Fixed action runner, copied verbatim into the job directory.
const ACTION_RUNNER: &str = include_str!("../scripts/action_runner.py");
const ACTION_RUNNER_FILE: &str = "runner.py";

/// A registry-action invocation: the dotted path of the function to call
/// and its keyword arguments. In untrusted mode the arguments carry every
/// pre-resolved secret/variable; nothing ambient reaches the jail.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub action: String,
    pub arguments: Inputs,
}

/// Dotted module path ending in a function name: at least two identifier
/// segments. Anything else never reaches config generation.
fn is_valid_action_path(action: &str) -> bool {
    let segments: Vec<&str> = action.split('.').collect();
    segments.len() >= 2
        && segments.iter().all(|segment| {
            let mut chars = segment.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

impl NsjailExecutor {
    /// Execute a registry action under full isolation.
    ///
    /// Trusted mode mounts the app/site-packages directories and passes
    /// DB-style credentials through the environment; untrusted mode mounts
    /// only the ordered package directories and drops all caller env vars.
    pub async fn execute_action(
        &self,
        request: &ActionRequest,
        config: &ActionSandboxConfig,
    ) -> sandbox::Result<SandboxResult> {
        if !is_valid_action_path(&request.action) {
            return Err(SandboxError::Validation(vec![format!(
                "invalid action reference '{}'",
                request.action
            )]));
        }
        if config.trust_mode == TrustMode::Untrusted && !config.site_packages.is_empty() {
            return Err(SandboxError::Validation(vec![
                "untrusted actions must not mount site-packages".to_string(),
            ]));
        }

        let mut payload = Inputs::new();
        payload.insert("action".to_string(), request.action.clone().into());
        payload.insert(
            "arguments".to_string(),
            serde_json::Value::Object(request.arguments.clone()),
        );

        let job = JobDir::create_bare(&payload).await?;
        tokio::fs::write(job.path().join(ACTION_RUNNER_FILE), ACTION_RUNNER).await?;

        let resolv = if config.network_enabled {
            job.write_resolv_conf(SLIRP_DNS).await?;
            Some(job.resolv_path())
        } else {
            None
        };

        let config_text = action_config(
            self.settings(),
            job.path(),
            config,
            resolv.as_deref(),
            ACTION_RUNNER_FILE,
        )?;
        job.write_config(&config_text).await?;

        let env = match config.trust_mode {
            TrustMode::Trusted => build_env(&config.env_vars),
            TrustMode::Untrusted => {
                if !config.env_vars.is_empty() {
                    warn!(
                        count = config.env_vars.len(),
                        "dropping caller env vars for untrusted action"
                    );
                }
                build_env(&std::collections::HashMap::new())
            }
        };

        let outcome = invoke(Invocation {
            binary: &self.settings().binary,
            config_path: &job.config_path(),
            workdir: job.path(),
            env: &env,
            timeout: Duration::from_secs(config.resources.timeout_seconds),
            network: config.network_enabled,
        })
        .await?;

        info!(
            job_id = %job.id(),
            action = %request.action,
            trust_mode = config.trust_mode.as_str(),
            exit_code = ?outcome.exit_code,
            "action jail exited"
        );
        Self::classify(&job, outcome).await
    }
}
