//! Ranking of candidate random-effects structures by information criteria.

mod comparator;

pub use comparator::{compare, compare_with, ComparisonRow, ComparisonTable, InformationCriterion};
