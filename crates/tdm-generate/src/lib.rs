//! Seeded, FK-consistent synthetic data generation.
//!
//! Entities of a unified schema are generated parents first. Foreign keys are
//! sampled from already generated parent keys, cyclic edges are closed once
//! every entity exists, and scalar fields come from a [`ValueProvider`].

pub mod engine;
pub mod errors;
pub mod output;
pub mod provider;

pub use engine::{
    DEFAULT_ROWS, EntityReport, GenerateOptions, GenerationReport, RowCounts,
    SyntheticRelationalGenerator, WILDCARD,
};
pub use errors::{GenerationError, Result};
pub use output::{WrittenBatch, write_batch_csv, write_batches_csv, written_bytes};
pub use provider::{FakeValueProvider, SequenceValueProvider, ValueProvider, ValueProviders};
