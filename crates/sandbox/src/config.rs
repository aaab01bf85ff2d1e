use std::collections::HashMap;
use std::path::PathBuf;

/// OS-level resource limits for one execution.
///
/// Always explicit at the executor boundary: executors receive a full set
/// of limits, never "whatever the host allows". The full-isolation tier
/// maps these 1:1 onto rlimits; degraded tiers enforce the wall clock only.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    pub memory_mb: u32,
    pub cpu_seconds: u32,
    pub max_file_size_mb: u32,
    pub max_open_files: u32,
    pub max_processes: u32,
    pub timeout_seconds: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: 512,
            cpu_seconds: 30,
            max_file_size_mb: 50,
            max_open_files: 64,
            max_processes: 32,
            timeout_seconds: 30,
        }
    }
}

/// Per-request execution configuration. Immutable once built; consumed by
/// exactly one executor.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfig {
    pub network_enabled: bool,
    pub resources: ResourceLimits,
    pub env_vars: HashMap<String, String>,
    /// Dependency spec strings as submitted (e.g. `requests==2.31.0`).
    pub dependencies: Vec<String>,
    /// Tenant identifier salting the package cache key, so tenants never
    /// share installed dependency trees.
    pub tenant_id: Option<String>,
}

/// Trust mode for registry-action execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustMode {
    /// Application and interpreter site-packages are mounted; DB-style
    /// credentials are passed as environment variables.
    Trusted,
    /// No app/site-packages mount and no ambient credentials: secrets and
    /// variables are pre-resolved by the caller and arrive via the input
    /// file only.
    Untrusted,
}

impl TrustMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trusted => "trusted",
            Self::Untrusted => "untrusted",
        }
    }
}

/// Configuration for registry-action execution. Differs from
/// [`SandboxConfig`] by supporting multiple ordered package roots and the
/// two trust modes.
#[derive(Debug, Clone)]
pub struct ActionSandboxConfig {
    /// Ordered registry package directories, mounted as `/packages/0..N`.
    pub package_dirs: Vec<PathBuf>,
    /// App + interpreter site-packages directories. Only mounted in
    /// trusted mode; must be empty for untrusted requests.
    pub site_packages: Vec<PathBuf>,
    pub network_enabled: bool,
    pub env_vars: HashMap<String, String>,
    pub resources: ResourceLimits,
    pub trust_mode: TrustMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_are_conservative() {
        let limits = ResourceLimits::default();
        assert!(limits.memory_mb <= 1024);
        assert!(limits.timeout_seconds <= 60);
        assert!(limits.max_processes <= 64);
    }
}
