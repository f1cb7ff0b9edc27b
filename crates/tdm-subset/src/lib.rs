//! Referentially-consistent subset extraction.
//!
//! Starting from a root table, rows are pulled table by table in dependency
//! order through a [`RowSource`]: children by the keys of their extracted
//! parents (capped), parents by the keys their extracted children reference
//! (uncapped), until every emitted FK value resolves.

pub mod cancel;
pub mod csv_source;
pub mod error;
pub mod extractor;
pub mod source;

pub use cancel::CancelToken;
pub use csv_source::CsvRowSource;
pub use error::{Result, SubsetError};
pub use extractor::{
    DEFAULT_MAX_ROWS, Filters, PartialSubset, RowCaps, SubsetExtractor, SubsetOptions,
    SubsetResult, WILDCARD, extract,
};
pub use source::{InMemoryRowSource, RowRequest, RowSource, SourceError};
