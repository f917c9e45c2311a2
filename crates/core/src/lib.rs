//! Linear mixed models for nested and crossed designs.
//!
//! The usual path through the crate:
//!
//! 1. load a [`data::DataFrame`] and optionally [`variance::decompose`] the
//!    response over its nesting hierarchy,
//! 2. describe the model with [`model::ModelSpec::builder`],
//! 3. fit candidates with [`lmm::Fitter`] and rank them with
//!    [`selection::compare`],
//! 4. refit the winner by full likelihood and run
//!    [`diagnostics::test_fixed_effects`].
//!
//! [`workflow::analyze`] runs all of it in one call.

pub mod data;
pub mod diagnostics;
pub mod error;
pub mod lmm;
pub mod matrix;
pub mod model;
pub mod selection;
pub mod simulate;
pub mod types;
pub mod variance;
pub mod workflow;

pub use error::{LmmError, Result};
pub use types::Criterion;
