use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use crate::lmm::FittedModel;

/// Method for computing denominator degrees of freedom in Wald F-tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DdfMethod {
    /// Residual degrees of freedom: `n - p`. Exact only for simple balanced
    /// designs without random effects.
    Residual,
    /// Satterthwaite approximation from the coefficient covariance and the
    /// asymptotic covariance of the variance parameters.
    Satterthwaite,
}

impl Default for DdfMethod {
    fn default() -> Self {
        DdfMethod::Satterthwaite
    }
}

/// Denominator degrees of freedom for contrasts of one fitted model.
///
/// For a single contrast `l'β` the Satterthwaite df is:
///
/// ```text
/// ν = 2 (l'Φl)² / Σ_ij g_i A_ij g_j,   g_k = l' (∂Φ/∂ψ_k) l
/// ```
///
/// where `Φ` is the coefficient covariance, `ψ` the variance parameters and
/// `A` their asymptotic covariance (twice the inverse deviance Hessian).
pub struct DdfCalculator<'a> {
    model: &'a FittedModel,
    method: DdfMethod,
}

impl<'a> DdfCalculator<'a> {
    /// Falls back to the residual method, with a warning, when the model has
    /// no usable variance-parameter covariance.
    pub fn new(model: &'a FittedModel, method: DdfMethod) -> Self {
        let method = match method {
            DdfMethod::Satterthwaite if model.satterthwaite.is_none() => {
                log::warn!(
                    "'{}': Satterthwaite inputs unavailable, using residual df",
                    model.spec.formula()
                );
                DdfMethod::Residual
            }
            m => m,
        };
        Self { model, method }
    }

    pub fn method(&self) -> DdfMethod {
        self.method
    }

    pub fn residual_ddf(&self) -> f64 {
        self.model.residual_df()
    }

    /// Degrees of freedom for a single contrast, clamped to `[1, n - p]`.
    pub fn ddf(&self, contrast: &DVector<f64>) -> f64 {
        let inputs = match (self.method, &self.model.satterthwaite) {
            (DdfMethod::Satterthwaite, Some(inputs)) => inputs,
            _ => return self.residual_ddf(),
        };

        let l_phi_l = quad_form(contrast, &self.model.vcov);
        if l_phi_l <= 0.0 {
            return 1.0;
        }

        let g = DVector::from_iterator(
            inputs.jacobian.len(),
            inputs.jacobian.iter().map(|d| quad_form(contrast, d)),
        );
        let denom = quad_form(&g, &inputs.parameter_covariance);
        if denom <= 0.0 {
            return self.residual_ddf();
        }

        let nu = 2.0 * l_phi_l * l_phi_l / denom;
        nu.clamp(1.0, self.residual_ddf().max(1.0))
    }

    /// Combined degrees of freedom for a multi-row hypothesis `L` (rows are
    /// contrasts), following Fai and Cornelius (1996): the eigenvectors of
    /// `LΦL'` give independent contrasts with df `ν_i`, combined as
    ///
    /// ```text
    /// ν = 2E / (E - q),   E = Σ ν_i / (ν_i - 2)
    /// ```
    pub fn ddf_multi(&self, l: &DMatrix<f64>) -> f64 {
        let q = l.nrows();
        if q == 0 {
            return 1.0;
        }
        if q == 1 {
            return self.ddf(&l.row(0).transpose());
        }
        if self.method == DdfMethod::Residual {
            return self.residual_ddf();
        }

        let l_phi_lt = l * &self.model.vcov * l.transpose();
        let eigen = l_phi_lt.symmetric_eigen();
        let max = eigen.eigenvalues.iter().fold(0.0_f64, |m, &v| m.max(v));

        let nu_values: Vec<f64> = (0..q)
            .filter(|&i| eigen.eigenvalues[i] > 1e-12 * max.max(f64::MIN_POSITIVE))
            .map(|i| {
                let transformed = l.transpose() * eigen.eigenvectors.column(i);
                self.ddf(&transformed)
            })
            .collect();
        if nu_values.is_empty() {
            return 1.0;
        }

        let q_eff = nu_values.len() as f64;
        let e_sum: f64 = nu_values
            .iter()
            .map(|&nu| if nu > 2.0 { nu / (nu - 2.0) } else { 100.0 })
            .sum();
        let combined = if e_sum > q_eff {
            2.0 * e_sum / (e_sum - q_eff)
        } else {
            2.0
        };
        combined.clamp(1.0, self.residual_ddf().max(1.0))
    }
}

/// `x' A x`.
pub(crate) fn quad_form(x: &DVector<f64>, a: &DMatrix<f64>) -> f64 {
    (x.transpose() * a * x)[(0, 0)]
}
