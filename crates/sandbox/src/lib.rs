mod config;
mod error;
mod executor;
mod jobdir;
mod protocol;
mod types;

pub use config::{ActionSandboxConfig, ResourceLimits, SandboxConfig, TrustMode};
pub use error::{Result, SandboxError};
pub use executor::Executor;
pub use jobdir::{
    ALLOWED_MODULES_FILE, CONFIG_FILE, DEPENDENCIES_FILE, INPUTS_FILE, JobDir, RESOLV_FILE,
    RESULT_FILE, SCRIPT_FILE, WRAPPER, WRAPPER_FILE,
};
pub use protocol::{RawResult, base_env, build_env, is_valid_env_key, read_result};
pub use types::{ExecutionRequest, Inputs, SandboxResult};
