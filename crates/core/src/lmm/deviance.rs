use std::f64::consts::PI;

use nalgebra::DMatrix;
use serde::Serialize;

use crate::error::Result;
use crate::matrix::dense::inverse_spd;
use crate::types::Criterion;

use super::mme::{MixedModelEquations, MmeSolution};

/// Profiled deviance `-2 logL` at relative factors `theta`, with the residual
/// variance and fixed effects concentrated out.
///
/// - Full: `ln|A| + n (1 + ln(2π r² / n))`
/// - Restricted: `ln|M| + (n - p)(1 + ln(2π r² / (n - p)))`
pub fn profiled_deviance(
    mme: &MixedModelEquations,
    theta: &[f64],
    criterion: Criterion,
) -> Result<(f64, MmeSolution)> {
    let sol = mme.solve(theta)?;
    let (dof, log_det) = match criterion {
        Criterion::Full => (mme.n_obs as f64, sol.log_det_a),
        Criterion::Restricted => ((mme.n_obs - mme.n_fixed) as f64, sol.log_det_m),
    };
    let deviance = log_det + dof * (1.0 + (2.0 * PI * sol.pwrss / dof).ln());
    Ok((deviance, sol))
}

/// Residual variance implied by a solution: `r²/n` or `r²/(n - p)`.
pub fn residual_variance(mme: &MixedModelEquations, sol: &MmeSolution, criterion: Criterion) -> f64 {
    match criterion {
        Criterion::Full => sol.pwrss / mme.n_obs as f64,
        Criterion::Restricted => sol.pwrss / (mme.n_obs - mme.n_fixed) as f64,
    }
}

/// Map `psi = (σ_1², ..., σ_K², σ²)` to relative factors `θ_k = σ_k / σ`.
fn theta_of(psi: &[f64]) -> Option<Vec<f64>> {
    let (components, last) = psi.split_at(psi.len().checked_sub(1)?);
    let sigma2 = last[0];
    if sigma2 <= 0.0 || components.iter().any(|&v| v < 0.0) {
        return None;
    }
    Some(components.iter().map(|v| (v / sigma2).sqrt()).collect())
}

/// Deviance as a function of the variance parameters themselves.
///
/// - Full: `n ln(2πσ²) + ln|A| + r²/σ²`
/// - Restricted: `(n - p) ln(2πσ²) + ln|M| + r²/σ²`
pub fn unprofiled_deviance(mme: &MixedModelEquations, psi: &[f64], criterion: Criterion) -> Option<f64> {
    let theta = theta_of(psi)?;
    let sigma2 = *psi.last()?;
    let sol = mme.solve(&theta).ok()?;
    let (dof, log_det) = match criterion {
        Criterion::Full => (mme.n_obs as f64, sol.log_det_a),
        Criterion::Restricted => ((mme.n_obs - mme.n_fixed) as f64, sol.log_det_m),
    };
    Some(dof * (2.0 * PI * sigma2).ln() + log_det + sol.pwrss / sigma2)
}

/// Coefficient covariance `Φ(ψ) = σ² [M(θ)⁻¹]_ββ`.
fn coefficient_covariance(mme: &MixedModelEquations, psi: &[f64]) -> Option<DMatrix<f64>> {
    let theta = theta_of(psi)?;
    let sol = mme.solve(&theta).ok()?;
    Some(sol.m_inv_beta * *psi.last()?)
}

/// Quantities the Satterthwaite approximation needs, evaluated at the
/// optimum. Only variance parameters away from the boundary are included.
#[derive(Debug, Clone, Serialize)]
pub struct SatterthwaiteInputs {
    /// Names of the included variance parameters (`"residual"` last).
    pub parameters: Vec<String>,
    /// Asymptotic covariance of the included parameters, `2 H⁻¹` with `H`
    /// the Hessian of the deviance.
    #[serde(skip)]
    pub parameter_covariance: DMatrix<f64>,
    /// `∂Φ/∂ψ_k` for each included parameter.
    #[serde(skip)]
    pub jacobian: Vec<DMatrix<f64>>,
}

/// Finite-difference Hessian of the deviance and derivative of `Φ` at `psi`.
///
/// Returns `None` when the Hessian is not positive definite or the deviance
/// cannot be evaluated near the optimum.
pub fn satterthwaite_inputs(
    mme: &MixedModelEquations,
    psi: &[f64],
    names: &[String],
    criterion: Criterion,
) -> Option<SatterthwaiteInputs> {
    let sigma2 = *psi.last()?;
    let free: Vec<usize> = (0..psi.len())
        .filter(|&k| psi[k] > 1e-8 * sigma2)
        .collect();
    let m = free.len();
    let steps: Vec<f64> = free.iter().map(|&k| 1e-3 * psi[k]).collect();

    let at = |moves: &[(usize, f64)]| -> Option<Vec<f64>> {
        let mut point = psi.to_vec();
        for &(i, delta) in moves {
            point[free[i]] += delta;
        }
        Some(point)
    };
    let dev = |moves: &[(usize, f64)]| unprofiled_deviance(mme, &at(moves)?, criterion);

    let f0 = dev(&[])?;
    let mut hessian = DMatrix::zeros(m, m);
    for i in 0..m {
        let hi = steps[i];
        let fp = dev(&[(i, hi)])?;
        let fm = dev(&[(i, -hi)])?;
        hessian[(i, i)] = (fp - 2.0 * f0 + fm) / (hi * hi);
        for j in 0..i {
            let hj = steps[j];
            let fpp = dev(&[(i, hi), (j, hj)])?;
            let fpm = dev(&[(i, hi), (j, -hj)])?;
            let fmp = dev(&[(i, -hi), (j, hj)])?;
            let fmm = dev(&[(i, -hi), (j, -hj)])?;
            let v = (fpp - fpm - fmp + fmm) / (4.0 * hi * hj);
            hessian[(i, j)] = v;
            hessian[(j, i)] = v;
        }
    }
    let parameter_covariance = inverse_spd(&hessian)? * 2.0;

    let mut jacobian = Vec::with_capacity(m);
    for (i, &h) in steps.iter().enumerate() {
        let plus = coefficient_covariance(mme, &at(&[(i, h)])?)?;
        let minus = coefficient_covariance(mme, &at(&[(i, -h)])?)?;
        jacobian.push((plus - minus) / (2.0 * h));
    }

    Some(SatterthwaiteInputs {
        parameters: free.iter().map(|&k| names[k].clone()).collect(),
        parameter_covariance,
        jacobian,
    })
}
