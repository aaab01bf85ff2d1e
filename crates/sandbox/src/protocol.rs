use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::error::Result;
use crate::jobdir::JobDir;
use crate::types::SandboxResult;

/// Result file shape as written by the wrapper. Accepts both `output` and
/// the legacy `result` field name.
#[derive(Debug, Deserialize)]
pub struct RawResult {
    pub success: bool,
    #[serde(default, alias = "result")]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

/// Read and parse `result.json` from a job directory.
///
/// `Ok(None)` means the wrapper never wrote a result; the caller decides
/// whether that is an infrastructure failure (it is, whenever the process
/// was expected to complete).
pub async fn read_result(job: &JobDir) -> Result<Option<RawResult>> {
    let path = job.result_path();
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let raw: RawResult = serde_json::from_slice(&bytes).map_err(|e| {
        warn!(job_id = %job.id(), error = %e, "malformed result file");
        std::io::Error::other(format!("malformed result file: {e}"))
    })?;
    Ok(Some(raw))
}

impl SandboxResult {
    /// Combine the wrapper's structured result with process-level facts.
    pub fn from_raw(raw: RawResult, exit_code: Option<i32>, elapsed: Duration) -> Self {
        Self {
            success: raw.success,
            output: raw.output,
            stdout: raw.stdout,
            stderr: raw.stderr,
            error: raw.error,
            exit_code,
            execution_time_ms: elapsed.as_millis() as u64,
        }
    }
}

/// Environment variable names must look like shell identifiers. This is
/// both the injection guard for generated config text and the filter for
/// `--env` pass-through flags.
pub fn is_valid_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Fixed minimal environment for the sandboxed interpreter.
///
/// The host process's own environment (secrets, database URIs, cloud
/// credentials) is never inherited: executors clear the child environment
/// and apply exactly this base plus the caller-declared variables.
pub fn base_env() -> Vec<(&'static str, &'static str)> {
    vec![
        ("PATH", "/usr/local/bin:/usr/bin:/bin"),
        ("HOME", "/tmp"),
        ("LANG", "C.UTF-8"),
        ("LC_ALL", "C.UTF-8"),
        ("PYTHONUNBUFFERED", "1"),
        ("PYTHONDONTWRITEBYTECODE", "1"),
        ("PYTHONIOENCODING", "utf-8"),
    ]
}

/// Merge the base environment with caller-declared variables, dropping
/// (and logging) any variable whose name fails the identifier check.
pub fn build_env(env_vars: &HashMap<String, String>) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = base_env()
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();
    for (key, value) in env_vars {
        if is_valid_env_key(key) {
            match env.iter_mut().find(|(k, _)| k == key) {
                Some(slot) => slot.1 = value.clone(),
                None => env.push((key.clone(), value.clone())),
            }
        } else {
            warn!(key = %key, "dropping environment variable with invalid name");
        }
    }
    env
}
