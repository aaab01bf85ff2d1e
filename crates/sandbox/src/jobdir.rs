use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use uuid::Uuid;

use crate::error::Result;
use crate::types::Inputs;

/// User code, verbatim.
pub const SCRIPT_FILE: &str = "script.py";
/// Named inputs map.
pub const INPUTS_FILE: &str = "inputs.json";
/// Fixed wrapper entrypoint, identical for every job.
pub const WRAPPER_FILE: &str = "wrapper.py";
/// Flat dependency spec list, read by the install script.
pub const DEPENDENCIES_FILE: &str = "dependencies.json";
/// Generated isolation config (full-isolation tier only).
pub const CONFIG_FILE: &str = "sandbox.cfg";
/// Written by the wrapper on completion.
pub const RESULT_FILE: &str = "result.json";
/// Optional import-hook allowlist (direct tier only).
pub const ALLOWED_MODULES_FILE: &str = "allowed_modules.json";
/// DNS configuration mounted at /etc/resolv.conf for networked jobs.
pub const RESOLV_FILE: &str = "resolv.conf";

/// The fixed wrapper bridging file-based I/O to the user's script.
/// Never interpolated; user data reaches it only through the JSON files.
pub const WRAPPER: &str = include_str!("../scripts/wrapper.py");

/// Ephemeral working directory for exactly one execution.
///
/// Owned exclusively by that execution and removed on every exit path
/// (success, failure, timeout, cancellation): the backing [`TempDir`]
/// deletes the tree when the `JobDir` is dropped.
pub struct JobDir {
    id: Uuid,
    dir: TempDir,
}

impl JobDir {
    /// Materialize a job directory: `script.py`, `inputs.json`, the fixed
    /// `wrapper.py`, and `dependencies.json`.
    ///
    /// The directory is created mode 0700 so other local users cannot read
    /// scripts or inputs.
    pub async fn create(script: &str, inputs: &Inputs, dependencies: &[String]) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("sbx-job-").tempdir()?;
        tokio::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o700)).await?;

        let job = Self {
            id: Uuid::new_v4(),
            dir,
        };

        tokio::fs::write(job.script_path(), script).await?;
        tokio::fs::write(job.inputs_path(), encode_json(inputs)?).await?;
        tokio::fs::write(job.path().join(WRAPPER_FILE), WRAPPER).await?;
        tokio::fs::write(job.dependencies_path(), encode_json(&dependencies)?).await?;

        tracing::debug!(job_id = %job.id, path = %job.path().display(), "job directory created");
        Ok(job)
    }

    /// Materialize a bare job directory holding only `inputs.json`. Used
    /// by execution modes that ship their own fixed runner script instead
    /// of user code (registry actions).
    pub async fn create_bare(inputs: &Inputs) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("sbx-job-").tempdir()?;
        tokio::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o700)).await?;

        let job = Self {
            id: Uuid::new_v4(),
            dir,
        };
        tokio::fs::write(job.inputs_path(), encode_json(inputs)?).await?;

        tracing::debug!(job_id = %job.id, path = %job.path().display(), "bare job directory created");
        Ok(job)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn script_path(&self) -> PathBuf {
        self.path().join(SCRIPT_FILE)
    }

    pub fn inputs_path(&self) -> PathBuf {
        self.path().join(INPUTS_FILE)
    }

    pub fn dependencies_path(&self) -> PathBuf {
        self.path().join(DEPENDENCIES_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.path().join(CONFIG_FILE)
    }

    pub fn result_path(&self) -> PathBuf {
        self.path().join(RESULT_FILE)
    }

    pub fn resolv_path(&self) -> PathBuf {
        self.path().join(RESOLV_FILE)
    }

    /// Write the generated isolation config with restrictive permissions.
    pub async fn write_config(&self, content: &str) -> Result<()> {
        let path = self.config_path();
        tokio::fs::write(&path, content).await?;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
        Ok(())
    }

    /// Write the runtime import-hook allowlist. Its presence is what
    /// activates the hook inside the wrapper.
    pub async fn write_allowed_modules(&self, modules: &[String]) -> Result<()> {
        tokio::fs::write(self.path().join(ALLOWED_MODULES_FILE), encode_json(&modules)?).await?;
        Ok(())
    }

    /// Write the DNS configuration mounted into networked jobs.
    pub async fn write_resolv_conf(&self, nameserver: &str) -> Result<()> {
        let content = format!("nameserver {nameserver}\n");
        tokio::fs::write(self.resolv_path(), content).await?;
        Ok(())
    }
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| std::io::Error::other(e).into())
}
