use std::path::{Path, PathBuf};
use std::time::Duration;

use sandbox_cache::{CacheError, PackageCache};
use tracing::info;

use crate::process::truncate;

/// Per-dependency-set virtualenv cache for the degraded tiers.
///
/// Built through the shared two-phase protocol: the environment is created
/// and populated in the cache's private temp directory, then atomically
/// renamed into the keyed slot. A losing concurrent installer reuses the
/// winner's slot. The venv is relocatable enough for our use: only the
/// interpreter is run after publish, never pip.
pub struct VenvCache {
    cache: PackageCache,
    host_python: PathBuf,
}

impl VenvCache {
    pub fn new(root: PathBuf, host_python: PathBuf, install_timeout: Duration) -> Self {
        Self {
            cache: PackageCache::new(root, install_timeout),
            host_python,
        }
    }

    /// Interpreter path inside a published environment.
    pub fn interpreter(venv: &Path) -> PathBuf {
        venv.join("bin").join("python3")
    }

    /// Ensure the environment for `key` exists and return its directory.
    pub async fn ensure(&self, key: &str, dependencies: &[String]) -> sandbox_cache::Result<PathBuf> {
        let python = self.host_python.clone();
        let specs = dependencies.to_vec();
        let path = self
            .cache
            .ensure_with(key, move |tmp| build_venv(python, tmp, specs))
            .await?;
        Ok(path)
    }
}

async fn build_venv(python: PathBuf, tmp: PathBuf, specs: Vec<String>) -> sandbox_cache::Result<()> {
    run_step(
        tokio::process::Command::new(&python)
            .args(["-m", "venv", "--clear"])
            .arg(&tmp),
        "create virtualenv",
    )
    .await?;

    let pip_python = VenvCache::interpreter(&tmp);
    run_step(
        tokio::process::Command::new(&pip_python)
            .args(["-m", "pip", "install", "--no-input", "--disable-pip-version-check"])
            .args(&specs),
        "install dependencies",
    )
    .await?;

    info!(count = specs.len(), "virtualenv populated");
    Ok(())
}

async fn run_step(
    command: &mut tokio::process::Command,
    step: &str,
) -> sandbox_cache::Result<()> {
    let output = command
        .stdin(std::process::Stdio::null())
        .output()
        .await
        .map_err(|e| CacheError::InstallFailed(format!("{step}: {e}")))?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(CacheError::InstallFailed(format!(
            "{step}: {}",
            truncate(stderr.trim(), 2000)
        )))
    }
}
