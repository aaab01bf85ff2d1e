use std::sync::Arc;

use sandbox_proc::PidNamespaceProbe;
use tracing::{info, warn};

/// The three escalating isolation strategies. Exactly one is used per
/// execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    FullIsolation,
    PidNamespace,
    Direct,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FullIsolation => f.write_str("full-isolation"),
            Self::PidNamespace => f.write_str("pid-namespace"),
            Self::Direct => f.write_str("direct"),
        }
    }
}

/// Probes host capabilities and picks the best available tier:
/// full isolation > PID namespace > direct subprocess, unless a tier is
/// explicitly disabled by configuration. Downgrades are logged, never
/// silent.
pub struct CapabilityDetector {
    full_isolation_available: bool,
    disable_full_isolation: bool,
    disable_pid_namespace: bool,
    probe: Arc<PidNamespaceProbe>,
}

impl CapabilityDetector {
    pub fn new(
        full_isolation_available: bool,
        disable_full_isolation: bool,
        disable_pid_namespace: bool,
        probe: Arc<PidNamespaceProbe>,
    ) -> Self {
        Self {
            full_isolation_available,
            disable_full_isolation,
            disable_pid_namespace,
            probe,
        }
    }

    pub async fn select(&self) -> Tier {
        if self.full_isolation_available && !self.disable_full_isolation {
            return Tier::FullIsolation;
        }
        if self.full_isolation_available {
            info!("full isolation available but disabled by configuration");
        }

        if !self.disable_pid_namespace && self.probe.available().await {
            warn!("full isolation unavailable; degrading to PID-namespace tier");
            return Tier::PidNamespace;
        }

        warn!("no isolation primitive available; degrading to direct subprocess tier");
        Tier::Direct
    }
}
