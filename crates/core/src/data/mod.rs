//! The observation table: a columnar DataFrame of float and factor columns.

mod dataframe;
mod factor;
mod io;
mod nesting;

pub use dataframe::{Column, DataFrame};
pub use factor::FactorColumn;
pub use nesting::validate_nesting;
