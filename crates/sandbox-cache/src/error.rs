#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("install failed: {0}")]
    InstallFailed(String),

    #[error("install timed out after {timeout_secs}s")]
    InstallTimeout { timeout_secs: u64 },

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("archive rejected: {0}")]
    ArchiveRejected(String),

    #[error("invalid source URI: {0}")]
    InvalidUri(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;
