use thiserror::Error;

/// Errors emitted by the synthetic generator.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Core(#[from] tdm_core::Error),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, GenerationError>;
