use thiserror::Error;

/// Errors emitted by the masking registry and the batch pass.
#[derive(Debug, Error)]
pub enum MaskingError {
    #[error("unknown masking rule: {0}")]
    UnknownRule(String),
    #[error("masking rule already registered: {0}")]
    DuplicateRule(String),
    #[error("masking rule '{rule}' failed: {message}")]
    Transform { rule: String, message: String },
    #[error(transparent)]
    Core(#[from] tdm_core::Error),
}

pub type Result<T> = std::result::Result<T, MaskingError>;
