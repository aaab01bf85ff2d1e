use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Named script inputs, bound to the entry function's parameters by name.
pub type Inputs = serde_json::Map<String, serde_json::Value>;

/// Execution request as consumed from the orchestrator.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionRequest {
    pub script: String,
    #[serde(default)]
    pub inputs: Inputs,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub allow_network: bool,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
    /// Tenant identifier; salts the package cache key when present.
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub trust_mode: Option<String>,
}

/// Outcome of one sandboxed execution. Produced exactly once per
/// invocation; immutable.
#[derive(Debug, Clone, Serialize)]
pub struct SandboxResult {
    pub success: bool,
    /// The entry function's return value, when JSON-serializable.
    pub output: Option<serde_json::Value>,
    pub stdout: String,
    pub stderr: String,
    /// Structured script-level failure (type name, message, traceback).
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub execution_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_deserializes_with_defaults() {
        let req: ExecutionRequest =
            serde_json::from_str(r#"{"script": "def main(): return 1"}"#).unwrap();
        assert!(req.inputs.is_empty());
        assert!(req.dependencies.is_empty());
        assert!(!req.allow_network);
        assert!(req.workspace_id.is_none());
        assert!(req.timeout_seconds.is_none());
    }

    #[test]
    fn request_accepts_full_shape() {
        let req: ExecutionRequest = serde_json::from_str(
            r#"{
                "script": "def main(a): return a",
                "inputs": {"a": 5},
                "dependencies": ["requests==2.31.0"],
                "timeout_seconds": 10,
                "allow_network": true,
                "env_vars": {"API_BASE": "https://example.com"},
                "workspace_id": "ws-1",
                "trust_mode": "untrusted"
            }"#,
        )
        .unwrap();
        assert_eq!(req.inputs.get("a").unwrap(), &serde_json::json!(5));
        assert_eq!(req.timeout_seconds, Some(10));
        assert_eq!(req.trust_mode.as_deref(), Some("untrusted"));
    }
}
