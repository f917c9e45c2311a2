use crate::data::DataFrame;
use crate::error::{LmmError, Result};
use crate::matrix::dense::rank_psd;
use crate::matrix::sparse::spmv;
use crate::model::{build_model_frame, combined_random_design, ModelFrame, ModelSpec};
use crate::variance::grouping_variance_ratio;

use super::deviance::{profiled_deviance, residual_variance, satterthwaite_inputs};
use super::mme::MixedModelEquations;
use super::optimizer::{Maximizer, NelderMead};
use super::result::{
    Coefficient, ConvergenceStatus, FittedModel, RandomEffectBlock, VarianceComponent,
};

/// Settings for a single fit.
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// Budget of deviance evaluations for the optimizer.
    pub max_evaluations: usize,
    /// Relative tolerance on the deviance.
    pub tolerance: f64,
    /// Relative factors `σ_k/σ` below this are reported as a singular fit.
    pub singular_tolerance: f64,
    /// Starting relative factors, one per random grouping. When unset they
    /// are derived from among/within group variance ratios.
    pub starting_values: Option<Vec<f64>>,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_evaluations: 2000,
            tolerance: 1e-8,
            singular_tolerance: 1e-4,
            starting_values: None,
        }
    }
}

impl FitOptions {
    pub fn max_evaluations(mut self, n: usize) -> Self {
        self.max_evaluations = n;
        self
    }

    pub fn tolerance(mut self, tol: f64) -> Self {
        self.tolerance = tol;
        self
    }

    pub fn singular_tolerance(mut self, tol: f64) -> Self {
        self.singular_tolerance = tol;
        self
    }

    pub fn starting_values(mut self, theta: Vec<f64>) -> Self {
        self.starting_values = Some(theta);
        self
    }
}

/// Fits mixed models by maximizing the profiled (restricted) likelihood
/// over the relative variance parameters.
pub struct Fitter {
    options: FitOptions,
    maximizer: Box<dyn Maximizer>,
}

impl Default for Fitter {
    fn default() -> Self {
        Self::new(FitOptions::default())
    }
}

impl Fitter {
    /// Fitter using the built-in Nelder-Mead search.
    pub fn new(options: FitOptions) -> Self {
        let maximizer = NelderMead::new(options.max_evaluations, options.tolerance);
        Self {
            options,
            maximizer: Box::new(maximizer),
        }
    }

    /// Fitter using a caller-supplied optimizer.
    pub fn with_maximizer(options: FitOptions, maximizer: Box<dyn Maximizer>) -> Self {
        Self { options, maximizer }
    }

    pub fn options(&self) -> &FitOptions {
        &self.options
    }

    /// Fit `spec` to `data`.
    ///
    /// Fails with `Validation` for unusable input, `Convergence` when the
    /// optimizer exhausts its budget and `SingularFit` when a variance
    /// component collapses to zero or the design cannot identify the model.
    pub fn fit(&self, spec: &ModelSpec, data: &DataFrame) -> Result<FittedModel> {
        let start = self.starting_values(spec, data);
        self.fit_from(spec, data, &start)
    }

    /// Fit `spec` from explicit relative factors, one per grouping, with
    /// this fitter's optimizer.
    pub fn fit_from(&self, spec: &ModelSpec, data: &DataFrame, start: &[f64]) -> Result<FittedModel> {
        let frame = build_model_frame(data, spec)?;
        self.fit_frame(spec, &frame, start)
    }

    /// Configured starting values, or one moment-based guess per grouping.
    pub(crate) fn starting_values(&self, spec: &ModelSpec, data: &DataFrame) -> Vec<f64> {
        match &self.options.starting_values {
            Some(theta) => theta.clone(),
            None => spec
                .random_groupings()
                .iter()
                .map(|g| starting_theta(data, spec.response(), g))
                .collect(),
        }
    }

    pub(crate) fn fit_frame(
        &self,
        spec: &ModelSpec,
        frame: &ModelFrame,
        start: &[f64],
    ) -> Result<FittedModel> {
        let mme = MixedModelEquations::assemble(frame);
        check_identifiable(spec, frame, &mme)?;
        let k = frame.groupings.len();
        if start.len() != k {
            return Err(LmmError::DimensionMismatch {
                expected: k,
                got: start.len(),
                context: "starting values".into(),
            });
        }

        let criterion = spec.criterion();

        let (theta, iterations, converged) = if k == 0 {
            (Vec::new(), 0, true)
        } else {
            let objective = |theta: &[f64]| {
                profiled_deviance(&mme, theta, criterion)
                    .ok()
                    .map(|(d, _)| -d)
            };
            let optimum = self.maximizer.maximize(&objective, start, &vec![0.0; k]);
            if !optimum.converged {
                log::warn!(
                    "'{}' did not converge after {} evaluations",
                    spec.formula(),
                    optimum.iterations
                );
                return Err(LmmError::Convergence {
                    iterations: optimum.iterations,
                    change: optimum.spread,
                });
            }
            (optimum.params, optimum.iterations, true)
        };

        for (g, &t) in frame.groupings.iter().zip(&theta) {
            if t < self.options.singular_tolerance {
                return Err(LmmError::singular(format!(
                    "variance of '{}' estimated at the boundary (relative factor {:.2e})",
                    g.name, t
                )));
            }
        }

        let (deviance, sol) = profiled_deviance(&mme, &theta, criterion)?;
        let sigma2 = residual_variance(&mme, &sol, criterion);
        let vcov = &sol.m_inv_beta * sigma2;

        let mut term_of: Vec<Option<String>> = vec![None; frame.n_fixed()];
        for tc in &frame.term_columns {
            for j in tc.columns.clone() {
                term_of[j] = Some(tc.term.label());
            }
        }
        let coefficients = frame
            .coef_names
            .iter()
            .enumerate()
            .map(|(j, name)| Coefficient {
                name: name.clone(),
                term: term_of[j].clone(),
                estimate: sol.beta[j],
                std_error: vcov[(j, j)].max(0.0).sqrt(),
            })
            .collect();

        let variance_components = frame
            .groupings
            .iter()
            .zip(&theta)
            .map(|(g, t)| VarianceComponent {
                grouping: g.name.clone(),
                variance: t * t * sigma2,
                n_groups: g.levels.len(),
            })
            .collect::<Vec<_>>();

        let mut random_effects = Vec::with_capacity(k);
        let mut offset = 0;
        for g in &frame.groupings {
            let effects = g
                .levels
                .iter()
                .enumerate()
                .map(|(i, level)| (level.clone(), sol.b[offset + i]))
                .collect();
            random_effects.push(RandomEffectBlock {
                grouping: g.name.clone(),
                effects,
            });
            offset += g.levels.len();
        }

        let fitted_fixed = spmv(&frame.x, sol.beta.as_slice());
        let z = combined_random_design(&frame.groupings, frame.n_obs());
        let fitted_random = spmv(&z, sol.b.as_slice());
        let residuals = (0..frame.n_obs())
            .map(|i| frame.y[i] - fitted_fixed[i] - fitted_random[i])
            .collect();

        let mut psi: Vec<f64> = variance_components.iter().map(|v| v.variance).collect();
        psi.push(sigma2);
        let mut names: Vec<String> = frame.groupings.iter().map(|g| g.name.clone()).collect();
        names.push("residual".to_string());
        let satterthwaite = satterthwaite_inputs(&mme, &psi, &names, criterion);
        if satterthwaite.is_none() {
            log::debug!(
                "'{}': deviance Hessian not positive definite at the optimum",
                spec.formula()
            );
        }

        log::debug!(
            "fitted '{}' by {}: logLik = {:.4}, sigma2 = {:.6}, theta = {:?}, {} evaluations",
            spec.formula(),
            criterion,
            -deviance / 2.0,
            sigma2,
            theta,
            iterations
        );

        Ok(FittedModel {
            spec: spec.clone(),
            coefficients,
            vcov,
            variance_components,
            residual_variance: sigma2,
            log_likelihood: -deviance / 2.0,
            n_obs: frame.n_obs(),
            convergence: ConvergenceStatus {
                converged,
                iterations,
                theta,
            },
            term_columns: frame.term_columns.clone(),
            random_effects,
            residuals,
            satterthwaite,
        })
    }
}

/// Fit with default options.
pub fn fit(spec: &ModelSpec, data: &DataFrame) -> Result<FittedModel> {
    Fitter::default().fit(spec, data)
}

/// Starting relative factor from the among/within variance ratio.
fn starting_theta(data: &DataFrame, response: &str, grouping: &str) -> f64 {
    match grouping_variance_ratio(data, response, grouping) {
        Ok(Some(ratio)) if ratio.is_finite() => ratio.sqrt().clamp(0.1, 10.0),
        _ => 1.0,
    }
}

fn check_identifiable(spec: &ModelSpec, frame: &ModelFrame, mme: &MixedModelEquations) -> Result<()> {
    let n = frame.n_obs();
    let p = frame.n_fixed();
    if n <= p {
        return Err(LmmError::singular(format!(
            "{} observations for {} fixed-effect columns",
            n, p
        )));
    }
    let rank = rank_psd(mme.xtx(), 1e-10);
    if rank < p {
        return Err(LmmError::singular(format!(
            "fixed-effects design of '{}' is rank deficient ({} of {} columns); \
             check for empty factor combinations",
            spec.formula(),
            rank,
            p
        )));
    }
    for g in &frame.groupings {
        let levels = g.levels.len();
        if levels < 2 {
            return Err(LmmError::singular(format!(
                "grouping '{}' has {} level(s); at least two are needed",
                g.name, levels
            )));
        }
        if levels >= n {
            return Err(LmmError::singular(format!(
                "grouping '{}' has {} levels for {} observations; its variance is confounded with the residual",
                g.name, levels, n
            )));
        }
    }
    Ok(())
}
