use std::path::Path;
use std::time::{Duration, Instant};

use sandbox::{JobDir, SandboxError, SandboxResult, WRAPPER_FILE};
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Process-level facts from one wrapper invocation. The wrapper's own
/// structured result lives in `result.json`; stdout/stderr here are raw
/// pipe captures kept for debugging only.
pub(crate) struct RunOutcome {
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
    pub stderr: String,
}

/// Run the wrapper in a child interpreter with an explicit environment.
///
/// The child never inherits this process's environment. It runs in its own
/// process group; on timeout the whole group is SIGKILLed and the child is
/// awaited before returning, so no zombie survives the error path.
pub(crate) async fn run_wrapper(
    interpreter: &Path,
    job: &JobDir,
    env: &[(String, String)],
    timeout: Duration,
    pid_namespace: bool,
) -> sandbox::Result<RunOutcome> {
    let mut command = if pid_namespace {
        let mut c = tokio::process::Command::new("unshare");
        c.args(["--pid", "--fork", "--kill-child"]).arg(interpreter);
        c
    } else {
        tokio::process::Command::new(interpreter)
    };

    command
        .arg(WRAPPER_FILE)
        .current_dir(job.path())
        .env_clear()
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let started = Instant::now();
    let mut child = command.spawn()?;
    let pid = child.id();

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let drain = tokio::spawn(async move {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut stdout).await;
        }
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut stderr).await;
        }
        (stdout, stderr)
    });

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
            kill_process_group(pid);
            let _ = child.kill().await;
            drain.abort();
            return Err(SandboxError::Timeout {
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    let (_stdout, stderr) = drain.await.unwrap_or_default();
    Ok(RunOutcome {
        exit_code: status.code(),
        elapsed: started.elapsed(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

/// SIGKILL the child's process group. With `--kill-child` the namespaced
/// tree dies with its parent; the group kill covers the bare-subprocess
/// fallback as well.
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    let group = nix::unistd::Pid::from_raw(pid as i32);
    if let Err(e) = nix::sys::signal::killpg(group, nix::sys::signal::Signal::SIGKILL) {
        debug!(pid, error = %e, "process group kill failed");
    }
}

/// Interpret the job's result file, classifying an absent result as an
/// infrastructure failure: the wrapper writes `result.json` even for
/// script-level exceptions, so its absence means the harness itself died.
pub(crate) async fn finish(job: &JobDir, outcome: RunOutcome) -> sandbox::Result<SandboxResult> {
    match sandbox::read_result(job).await? {
        Some(raw) => Ok(SandboxResult::from_raw(raw, outcome.exit_code, outcome.elapsed)),
        None => {
            debug!(
                job_id = %job.id(),
                exit_code = ?outcome.exit_code,
                stderr = %truncate(&outcome.stderr, 2000),
                "wrapper produced no result file"
            );
            Err(SandboxError::Infrastructure {
                message: "sandbox exited without producing a result".to_string(),
                hint: None,
            })
        }
    }
}

pub(crate) fn truncate(text: &str, max: usize) -> &str {
    let mut end = max.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text.get(..end).unwrap_or("")
}
