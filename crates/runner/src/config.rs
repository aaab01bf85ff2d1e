use std::path::PathBuf;
use std::time::Duration;

use sandbox::SandboxError;
use sandbox_nsjail::NsjailSettings;

/// Service-level configuration, resolved once at startup and owned by the
/// service. No hidden module globals.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base directory for package/venv/pip caches.
    pub cache_dir: PathBuf,
    pub nsjail_binary: PathBuf,
    pub rootfs: PathBuf,
    /// Host interpreter used by the degraded tiers.
    pub python: PathBuf,
    pub install_timeout: Duration,
    /// Explicitly disable the full-isolation tier.
    pub disable_full_isolation: bool,
    /// Explicitly disable the PID-namespace tier.
    pub disable_pid_namespace: bool,
}

impl ServiceConfig {
    /// Resolve defaults: caches under `$HOME/.cache/sbx` (temp dir when
    /// HOME is unset) and the host `python3` from PATH.
    pub fn resolve(
        cache_dir: Option<PathBuf>,
        nsjail_binary: Option<PathBuf>,
        rootfs: Option<PathBuf>,
        python: Option<PathBuf>,
        install_timeout_secs: u64,
        disable_full_isolation: bool,
        disable_pid_namespace: bool,
    ) -> Result<Self, SandboxError> {
        let defaults = NsjailSettings::default();
        let cache_dir = cache_dir.unwrap_or_else(default_cache_dir);

        let python = match python {
            Some(path) => path,
            None => which::which("python3").map_err(|e| SandboxError::Infrastructure {
                message: format!("python3 not found on PATH: {e}"),
                hint: None,
            })?,
        };

        Ok(Self {
            cache_dir,
            nsjail_binary: nsjail_binary.unwrap_or(defaults.binary),
            rootfs: rootfs.unwrap_or(defaults.rootfs),
            python,
            install_timeout: Duration::from_secs(install_timeout_secs),
            disable_full_isolation,
            disable_pid_namespace,
        })
    }

    pub fn package_cache_root(&self) -> PathBuf {
        self.cache_dir.join("packages")
    }

    pub fn venv_cache_root(&self) -> PathBuf {
        self.cache_dir.join("venvs")
    }

    pub fn pip_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("pip")
    }

    /// Settings slice handed to the full-isolation executor.
    pub fn nsjail_settings(&self) -> NsjailSettings {
        NsjailSettings {
            binary: self.nsjail_binary.clone(),
            rootfs: self.rootfs.clone(),
            cache_root: self.package_cache_root(),
            pip_cache: self.pip_cache_dir(),
            install_timeout: self.install_timeout,
            ..NsjailSettings::default()
        }
    }
}

fn default_cache_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home).join(".cache").join("sbx"),
        _ => std::env::temp_dir().join("sbx-cache"),
    }
}
