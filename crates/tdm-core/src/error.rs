use thiserror::Error;

/// Core error type shared across TDM crates.
#[derive(Debug, Error)]
pub enum Error {
    /// The schema metadata is malformed or inconsistent.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    /// A batch does not match the table it claims to hold.
    #[error("invalid batch: {0}")]
    InvalidBatch(String),
}

/// Convenience alias for results returned by TDM crates.
pub type Result<T> = std::result::Result<T, Error>;
