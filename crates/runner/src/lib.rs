mod capability;
mod config;
mod service;

pub use capability::{CapabilityDetector, Tier};
pub use config::ServiceConfig;
pub use service::SandboxService;
