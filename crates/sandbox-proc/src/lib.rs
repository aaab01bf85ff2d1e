//! Degraded isolation tiers: PID-namespace-wrapped and direct subprocess
//! execution, sharing one subprocess runner and a per-dependency-set
//! virtualenv cache. Used when the full-isolation tier is unavailable on
//! the host; the static validator is the primary security control here.

mod direct;
mod pidns;
mod probe;
mod process;
mod venv;

pub use direct::DirectExecutor;
pub use pidns::PidNamespaceExecutor;
pub use probe::PidNamespaceProbe;
pub use venv::VenvCache;
