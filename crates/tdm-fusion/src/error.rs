use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading fragments or fusing them.
#[derive(Debug, Error)]
pub enum FusionError {
    #[error(transparent)]
    Core(#[from] tdm_core::Error),
    #[error("fragment schema error: {0}")]
    Schema(String),
    #[error("invalid fragment: {}", .issues.join("; "))]
    InvalidFragment { issues: Vec<String> },
    #[error("unknown domain pack '{0}'")]
    UnknownDomainPack(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, FusionError>;
