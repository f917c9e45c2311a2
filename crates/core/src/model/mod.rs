//! Model specification: fixed-effect terms, the validated [`ModelSpec`] and
//! design-matrix construction.

mod design;
mod spec;
mod term;

pub use design::{
    build_model_frame, build_random_design, combined_random_design, GroupingDesign, ModelFrame,
    TermColumns,
};
pub use spec::{ModelSpec, ModelSpecBuilder};
pub use term::{parse_fixed_formula, FixedFormula, FixedTerm};
