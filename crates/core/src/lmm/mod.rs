mod cell_means;
mod deviance;
mod fitter;
mod mme;
mod optimizer;
mod result;

pub use cell_means::{cell_means, CellEstimate, CellMeans};
pub use deviance::{profiled_deviance, residual_variance, unprofiled_deviance, SatterthwaiteInputs};
pub use fitter::{fit, FitOptions, Fitter};
pub use mme::{MixedModelEquations, MmeSolution};
pub use optimizer::{Maximizer, NelderMead, Optimum};
pub use result::{
    Coefficient, ConvergenceStatus, FittedModel, RandomEffectBlock, VarianceComponent,
};
