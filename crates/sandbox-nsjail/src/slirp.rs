use std::time::Duration;

use tracing::{debug, warn};

/// DNS resolver address provided by the userspace NAT tool; written into
/// the resolv.conf mounted over the jail's /etc/resolv.conf.
pub(crate) const SLIRP_DNS: &str = "10.0.2.3";

/// Userspace NAT egress for a jailed process tree.
///
/// The jail always clones an isolated network namespace; when a phase
/// needs egress, slirp4netns is attached to the jailed process and NATs
/// traffic through the host without granting raw network access. The
/// handle kills the NAT process when dropped.
pub(crate) struct SlirpHandle {
    _child: tokio::process::Child,
}

/// Attach slirp4netns to the jailed process. Returns `None` (with a
/// warning) when the tool is unavailable or the jailed pid cannot be
/// found; the phase then runs without egress and fails on its own terms.
pub(crate) async fn start_egress(jail_pid: Option<u32>) -> Option<SlirpHandle> {
    let binary = match which::which("slirp4netns") {
        Ok(path) => path,
        Err(_) => {
            warn!("slirp4netns not found; jail has no network egress");
            return None;
        }
    };
    let jail_pid = jail_pid?;

    // The jail binary forks the jailed init as its direct child; give it a
    // moment to appear before attaching.
    let target = match find_child_pid(jail_pid).await {
        Some(pid) => pid,
        None => {
            warn!(jail_pid, "jailed process not found; no network egress");
            return None;
        }
    };

    let child = tokio::process::Command::new(binary)
        .args(["--configure", "--mtu=65520", "--disable-host-loopback"])
        .arg(target.to_string())
        .arg("tap0")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn();

    match child {
        Ok(child) => {
            debug!(target, "userspace NAT attached");
            Some(SlirpHandle { _child: child })
        }
        Err(e) => {
            warn!(error = %e, "failed to start slirp4netns");
            None
        }
    }
}

/// First child pid of `pid`, polled briefly via pgrep.
async fn find_child_pid(pid: u32) -> Option<u32> {
    let pid_arg = pid.to_string();
    for _ in 0..20 {
        let output = tokio::process::Command::new("pgrep")
            .args(["-P", &pid_arg])
            .output()
            .await
            .ok()?;
        if let Some(child) = String::from_utf8_lossy(&output.stdout)
            .lines()
            .find_map(|line| line.trim().parse::<u32>().ok())
        {
            return Some(child);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    None
}
