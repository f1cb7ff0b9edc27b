use thiserror::Error;

use crate::extractor::PartialSubset;
use crate::source::SourceError;

/// Errors emitted by subset extraction.
#[derive(Debug, Error)]
pub enum SubsetError {
    #[error(transparent)]
    InvalidSchema(#[from] tdm_core::Error),
    #[error("row source unavailable while extracting '{table}': {source}")]
    SourceUnavailable {
        table: String,
        #[source]
        source: SourceError,
        partial: Box<PartialSubset>,
    },
    #[error("extraction cancelled after {} completed tables", .partial.completed_tables.len())]
    Cancelled { partial: Box<PartialSubset> },
}

impl SubsetError {
    /// Batches of the tables completed before a partial failure.
    pub fn partial(&self) -> Option<&PartialSubset> {
        match self {
            SubsetError::InvalidSchema(_) => None,
            SubsetError::SourceUnavailable { partial, .. } | SubsetError::Cancelled { partial } => {
                Some(partial)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, SubsetError>;
