use async_trait::async_trait;

use crate::config::SandboxConfig;
use crate::error::Result;
use crate::types::{Inputs, SandboxResult};

/// One isolation tier. Exactly one executor runs a given request.
///
/// Implementations own the whole lifecycle of a job: materialize the job
/// directory, invoke the interpreter under their isolation primitive,
/// enforce the wall-clock timeout, parse the result file, and release the
/// job directory on every exit path.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Human-readable tier name (e.g. "nsjail", "pid-namespace", "direct").
    fn name(&self) -> &'static str;

    /// Execute one script invocation to completion.
    ///
    /// Script-level failures are reported inside the returned
    /// [`SandboxResult`]; `Err` is reserved for the typed taxonomy
    /// (timeout, infrastructure, package install).
    async fn execute(
        &self,
        script: &str,
        inputs: &Inputs,
        config: &SandboxConfig,
    ) -> Result<SandboxResult>;
}
