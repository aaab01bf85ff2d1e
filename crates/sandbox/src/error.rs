/// Closed error taxonomy for sandboxed execution.
///
/// Script-level exceptions are NOT errors: they are captured inside the
/// sandbox and returned as structured failure data in `SandboxResult`.
/// `Infrastructure` means the isolation harness itself failed to produce a
/// result file; its message is pre-redacted and safe to show to callers.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Static policy violation. Execution never starts.
    #[error("script validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Dependency installation failed.
    #[error("package installation failed: {0}")]
    PackageInstall(String),

    /// Wall-clock limit exceeded. The subprocess was forcibly terminated
    /// and awaited before this error was returned.
    #[error("execution timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The sandbox ran but could not execute the script as requested.
    #[error("script execution failed: {0}")]
    Execution(String),

    /// The isolation harness itself failed before producing a result.
    /// `hint` is a static operational pointer, never raw tool output.
    #[error("sandbox infrastructure failure: {message}{}", .hint.map(|h| format!(" (hint: {h})")).unwrap_or_default())]
    Infrastructure {
        message: String,
        hint: Option<&'static str>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
