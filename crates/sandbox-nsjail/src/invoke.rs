use std::path::Path;
use std::time::{Duration, Instant};

use sandbox::SandboxError;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::slirp::start_egress;

/// Extra wall-clock allowance over the jail's own time limit, so the jail
/// gets first chance to enforce the deadline and the host-side kill is the
/// backstop.
pub(crate) const TIMEOUT_BUFFER: Duration = Duration::from_secs(10);

pub(crate) struct Invocation<'a> {
    pub binary: &'a Path,
    pub config_path: &'a Path,
    pub workdir: &'a Path,
    /// Environment applied to the jail process; pass-through names are
    /// whitelisted into the jail via one `--env KEY` flag each.
    pub env: &'a [(String, String)],
    /// The configured script timeout (without buffer).
    pub timeout: Duration,
    /// Attach userspace NAT egress to the jailed process.
    pub network: bool,
}

pub(crate) struct JailOutcome {
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
    pub stderr: String,
}

/// Invoke the jail binary and wait with `timeout + buffer`. On expiry the
/// process group is SIGKILLed and reaped before returning, so no orphan
/// survives a timeout.
pub(crate) async fn invoke(invocation: Invocation<'_>) -> sandbox::Result<JailOutcome> {
    let mut command = tokio::process::Command::new(invocation.binary);
    command
        .arg("--config")
        .arg(invocation.config_path)
        .current_dir(invocation.workdir)
        .env_clear()
        .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);
    for (key, _) in invocation.env {
        command.arg("--env").arg(key);
    }

    let started = Instant::now();
    let mut child = command.spawn()?;
    let pid = child.id();

    let _egress = if invocation.network {
        start_egress(pid).await
    } else {
        None
    };

    let mut stderr_pipe = child.stderr.take();
    let drain = tokio::spawn(async move {
        let mut stderr = Vec::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut stderr).await;
        }
        stderr
    });

    let deadline = invocation.timeout + TIMEOUT_BUFFER;
    let status = match tokio::time::timeout(deadline, child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
            kill_process_group(pid);
            let _ = child.kill().await;
            drain.abort();
            return Err(SandboxError::Timeout {
                timeout_secs: invocation.timeout.as_secs(),
            });
        }
    };

    let stderr_bytes = drain.await.unwrap_or_default();
    Ok(JailOutcome {
        exit_code: status.code(),
        elapsed: started.elapsed(),
        stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
    })
}

fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    let group = nix::unistd::Pid::from_raw(pid as i32);
    if let Err(e) = nix::sys::signal::killpg(group, nix::sys::signal::Signal::SIGKILL) {
        debug!(pid, error = %e, "process group kill failed");
    }
}

/// Map known failure signatures in the jail tool's stderr onto static,
/// non-sensitive operational hints. Raw stderr itself is never surfaced to
/// callers beyond a truncated debug capture.
pub(crate) fn infra_hint(stderr: &str) -> Option<&'static str> {
    let lowered = stderr.to_ascii_lowercase();
    if lowered.contains("clone_newuser") || lowered.contains("user namespace") {
        return Some("unprivileged user namespaces may be disabled on this host");
    }
    if lowered.contains("/dev/net/tun") {
        return Some("TUN device unavailable; userspace networking cannot start");
    }
    if lowered.contains("capability") || lowered.contains("cap_sys_admin") {
        return Some("a required capability is missing");
    }
    None
}

pub(crate) fn truncate(text: &str, max: usize) -> &str {
    let mut end = max.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text.get(..end).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_matches_known_signatures() {
        assert!(infra_hint("clone(flags=CLONE_NEWUSER) failed").is_some());
        assert!(infra_hint("could not setup user namespace").is_some());
        assert!(infra_hint("open('/dev/net/tun'): No such file").is_some());
        assert!(infra_hint("missing capability CAP_SYS_ADMIN").is_some());
        assert!(infra_hint("some unrelated failure").is_none());
    }

    #[test]
    fn hints_are_static_not_tool_output() {
        let hint = infra_hint("CLONE_NEWUSER failed: secret-path-leak").unwrap_or_default();
        assert!(!hint.contains("secret-path-leak"));
    }
}
