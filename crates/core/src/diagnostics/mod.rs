//! Hypothesis tests for fixed effects.

mod ddf;
mod lrt;
mod wald;

pub use ddf::{DdfCalculator, DdfMethod};
pub use lrt::{likelihood_ratio_test, LrtResult};
pub use wald::{format_tests, test_fixed_effects, test_fixed_effects_with, TermTest, TestOptions};
