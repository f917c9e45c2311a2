use nalgebra::DMatrix;
use serde::Serialize;

use crate::model::{ModelSpec, TermColumns};
use crate::types::Criterion;

use super::deviance::SatterthwaiteInputs;

/// A single fixed-effect coefficient.
#[derive(Debug, Clone, Serialize)]
pub struct Coefficient {
    /// Design column name, e.g. `origin[h]:treatment[t]`.
    pub name: String,
    /// Label of the term the column belongs to; `None` for the intercept.
    pub term: Option<String>,
    pub estimate: f64,
    pub std_error: f64,
}

/// Estimated variance of one random grouping.
#[derive(Debug, Clone, Serialize)]
pub struct VarianceComponent {
    pub grouping: String,
    pub variance: f64,
    /// Number of levels of the grouping present in the fitted rows.
    pub n_groups: usize,
}

impl VarianceComponent {
    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }
}

/// Predicted random effects of one grouping.
#[derive(Debug, Clone, Serialize)]
pub struct RandomEffectBlock {
    pub grouping: String,
    /// `(level, prediction)` in column order.
    pub effects: Vec<(String, f64)>,
}

/// How the variance parameters were obtained.
#[derive(Debug, Clone, Serialize)]
pub struct ConvergenceStatus {
    pub converged: bool,
    /// Objective evaluations; zero for the closed-form fit without groupings.
    pub iterations: usize,
    /// Relative factors `σ_k / σ` at the optimum.
    pub theta: Vec<f64>,
}

/// Result of one fit. Immutable once produced.
#[derive(Debug, Clone, Serialize)]
pub struct FittedModel {
    pub spec: ModelSpec,
    pub coefficients: Vec<Coefficient>,
    /// Coefficient covariance matrix `Φ`, in coefficient order.
    #[serde(skip)]
    pub vcov: DMatrix<f64>,
    pub variance_components: Vec<VarianceComponent>,
    pub residual_variance: f64,
    pub log_likelihood: f64,
    pub n_obs: usize,
    pub convergence: ConvergenceStatus,
    #[serde(skip)]
    pub term_columns: Vec<TermColumns>,
    #[serde(skip)]
    pub random_effects: Vec<RandomEffectBlock>,
    #[serde(skip)]
    pub residuals: Vec<f64>,
    /// `None` when the deviance Hessian was not positive definite.
    #[serde(skip)]
    pub satterthwaite: Option<SatterthwaiteInputs>,
}

impl FittedModel {
    pub fn criterion(&self) -> Criterion {
        self.spec.criterion()
    }

    pub fn n_fixed(&self) -> usize {
        self.coefficients.len()
    }

    pub fn n_groupings(&self) -> usize {
        self.variance_components.len()
    }

    /// `p + K + 1`: fixed coefficients, grouping variances and the residual
    /// variance.
    pub fn effective_parameter_count(&self) -> usize {
        self.n_fixed() + self.n_groupings() + 1
    }

    /// Residual degrees of freedom `n - p`.
    pub fn residual_df(&self) -> f64 {
        (self.n_obs - self.n_fixed()) as f64
    }

    pub fn deviance(&self) -> f64 {
        -2.0 * self.log_likelihood
    }

    /// AIC = -2 logL + 2k.
    pub fn aic(&self) -> f64 {
        self.deviance() + 2.0 * self.effective_parameter_count() as f64
    }

    /// BIC = -2 logL + k ln(n).
    pub fn bic(&self) -> f64 {
        self.deviance() + self.effective_parameter_count() as f64 * (self.n_obs as f64).ln()
    }

    pub fn coefficient(&self, name: &str) -> Option<&Coefficient> {
        self.coefficients.iter().find(|c| c.name == name)
    }

    pub fn variance_component(&self, grouping: &str) -> Option<f64> {
        self.variance_components
            .iter()
            .find(|v| v.grouping == grouping)
            .map(|v| v.variance)
    }

    pub fn estimates(&self) -> Vec<f64> {
        self.coefficients.iter().map(|c| c.estimate).collect()
    }

    /// Formatted summary of the fit.
    pub fn summary(&self) -> String {
        let mut s = String::new();

        s.push_str(&format!(
            "=== Linear mixed model fit by {} ===\n",
            self.criterion().name()
        ));
        s.push_str(&format!("Formula: {}\n\n", self.spec.formula()));
        s.push_str(&format!(
            "Observations: {}   Fixed params: {}   Groupings: {}\n",
            self.n_obs,
            self.n_fixed(),
            self.n_groupings()
        ));
        s.push_str(&format!(
            "Converged: {}   Evaluations: {}\n",
            self.convergence.converged, self.convergence.iterations
        ));
        s.push_str(&format!(
            "logLik: {:.4}   AIC: {:.4}   BIC: {:.4}\n\n",
            self.log_likelihood,
            self.aic(),
            self.bic()
        ));

        s.push_str("--- Variance Components ---\n");
        s.push_str(&format!(
            "  {:<20} {:>8} {:>14} {:>12}\n",
            "Grouping", "Groups", "Variance", "Std.Dev."
        ));
        for vc in &self.variance_components {
            s.push_str(&format!(
                "  {:<20} {:>8} {:>14.6} {:>12.6}\n",
                vc.grouping,
                vc.n_groups,
                vc.variance,
                vc.std_dev()
            ));
        }
        s.push_str(&format!(
            "  {:<20} {:>8} {:>14.6} {:>12.6}\n",
            "Residual",
            "",
            self.residual_variance,
            self.residual_variance.sqrt()
        ));

        s.push_str("\n--- Fixed Effects ---\n");
        s.push_str(&format!(
            "  {:<30} {:>12} {:>12}\n",
            "Coefficient", "Estimate", "Std.Error"
        ));
        for c in &self.coefficients {
            s.push_str(&format!(
                "  {:<30} {:>12.6} {:>12.6}\n",
                c.name, c.estimate, c.std_error
            ));
        }

        for block in &self.random_effects {
            s.push_str(&format!("\n--- Random Effects: {} ---\n", block.grouping));
            let mut sorted = block.effects.clone();
            sorted.sort_by(|a, b| b.1.total_cmp(&a.1));
            for (level, value) in sorted.iter().take(10) {
                s.push_str(&format!("  {}: {:.6}\n", level, value));
            }
            if sorted.len() > 10 {
                s.push_str(&format!("  ... and {} more\n", sorted.len() - 10));
            }
        }

        s
    }
}
