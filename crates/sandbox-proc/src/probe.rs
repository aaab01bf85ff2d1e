use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// How long the probe invocation may take before the host is considered
/// incapable.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Detects whether PID-namespace isolation is usable on this host.
///
/// The check requires both the `unshare` tool on PATH and a successful
/// short-lived probe invocation, since some container hosts ship the tool but
/// refuse the clone. The result is cached for the lifetime of the owning
/// service, so repeated tier selection stays cheap.
#[derive(Default)]
pub struct PidNamespaceProbe {
    cached: OnceCell<bool>,
}

impl PidNamespaceProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn available(&self) -> bool {
        *self.cached.get_or_init(probe).await
    }
}

async fn probe() -> bool {
    if which::which("unshare").is_err() {
        debug!("unshare not found on PATH");
        return false;
    }

    let probe = tokio::process::Command::new("unshare")
        .args(["--pid", "--fork", "true"])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status();

    match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
        Ok(Ok(status)) if status.success() => {
            debug!("PID namespace probe succeeded");
            true
        }
        Ok(Ok(status)) => {
            warn!(status = %status, "PID namespace probe failed");
            false
        }
        Ok(Err(e)) => {
            warn!(error = %e, "PID namespace probe could not run");
            false
        }
        Err(_) => {
            warn!("PID namespace probe timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_result_is_cached() {
        let probe = PidNamespaceProbe::new();
        let first = probe.available().await;
        let second = probe.available().await;
        assert_eq!(first, second);
    }
}
