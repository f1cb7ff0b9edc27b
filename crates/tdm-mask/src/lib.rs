//! Column-level masking for extracted or generated batches.
//!
//! Built-in rules are resolved before caller-registered ones; the batch pass
//! checks every rule name up front and warns when a rule that can break joins
//! targets a relationship column.

pub mod builtin;
pub mod config;
pub mod error;
pub mod pass;
pub mod registry;
pub mod rules;

pub use builtin::BuiltinRule;
pub use config::MaskingConfig;
pub use error::{MaskingError, Result};
pub use pass::{ColumnMaskStats, MaskingIntegrityWarning, MaskingReport, SkippedRule, mask_batches};
pub use registry::{MaskTransform, MaskingTransformRegistry, ResolvedRule, RowContext};
pub use rules::{MaskingRule, MaskingRuleSet};
