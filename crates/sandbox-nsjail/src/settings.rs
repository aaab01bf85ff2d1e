use std::path::PathBuf;
use std::time::Duration;

/// Host-side configuration for the full-isolation tier. Owned by the
/// service, built once at startup.
#[derive(Debug, Clone)]
pub struct NsjailSettings {
    /// Path to the nsjail binary.
    pub binary: PathBuf,
    /// Minimal read-only rootfs whose usr/lib/bin/etc (and conditionally
    /// lib64/sbin) are bind-mounted into the jail.
    pub rootfs: PathBuf,
    /// Shared package cache root (one subdirectory per cache key).
    pub cache_root: PathBuf,
    /// Shared package-manager download cache, mounted writable during the
    /// install phase only.
    pub pip_cache: PathBuf,
    /// Interpreter path inside the jail.
    pub jail_python: String,
    /// Dependency installation timeout. Independent of and larger than
    /// script-execution timeouts.
    pub install_timeout: Duration,
}

impl Default for NsjailSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/usr/bin/nsjail"),
            rootfs: PathBuf::from("/var/lib/sbx/rootfs"),
            cache_root: PathBuf::from("/var/cache/sbx/packages"),
            pip_cache: PathBuf::from("/var/cache/sbx/pip"),
            jail_python: "/usr/bin/python3".to_string(),
            install_timeout: Duration::from_secs(180),
        }
    }
}
