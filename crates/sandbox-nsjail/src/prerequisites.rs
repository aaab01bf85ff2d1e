use sandbox::SandboxError;
use tracing::warn;

use crate::settings::NsjailSettings;

/// Cheap availability check used by tier selection: the jail binary and
/// the rootfs directory must both exist on disk.
pub fn is_available(settings: &NsjailSettings) -> bool {
    settings.binary.is_file() && settings.rootfs.is_dir()
}

/// Verify host prerequisites for the full-isolation tier.
///
/// Collects all failures and returns them in a single error rather than
/// stopping at the first, so operators see the complete picture.
pub async fn check_prerequisites(settings: &NsjailSettings) -> Result<(), SandboxError> {
    let mut errors = Vec::new();

    if !settings.binary.is_file() {
        errors.push(format!("nsjail binary not found: {}", settings.binary.display()));
    }
    if !settings.rootfs.is_dir() {
        errors.push(format!("rootfs not found: {}", settings.rootfs.display()));
    }
    for dir in ["usr", "lib", "bin", "etc"] {
        let path = settings.rootfs.join(dir);
        if settings.rootfs.is_dir() && !path.is_dir() {
            errors.push(format!("rootfs is missing /{dir}"));
        }
    }

    // Userspace networking is required by the install phase; its absence
    // degrades installs but is not fatal for dependency-free execution.
    if which::which("slirp4netns").is_err() {
        warn!("slirp4netns not found; networked phases will have no egress");
    }

    for path in [&settings.cache_root, &settings.pip_cache] {
        if let Err(e) = tokio::fs::create_dir_all(path).await {
            errors.push(format!("cannot create {}: {e}", path.display()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(SandboxError::Infrastructure {
            message: errors.join("; "),
            hint: None,
        })
    }
}
