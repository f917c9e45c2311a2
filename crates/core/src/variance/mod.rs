//! Diagnostic variance decomposition over a nesting hierarchy.

mod decompose;

pub use decompose::{decompose, grouping_variance_ratio, LevelVariance, VarianceDecomposition};
