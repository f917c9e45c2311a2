use nalgebra::{DMatrix, DVector};

use crate::error::{LmmError, Result};
use crate::matrix::sparse::{at_b_dense, xt_y, xtx_dense};
use crate::model::{combined_random_design, ModelFrame};

/// Mixed model equations in relative-factor form.
///
/// With `Λ = diag(θ)` expanded over the random-effect columns:
///
/// ```text
/// [X'X       X'ZΛ       ] [β]   [X'y ]
/// [ΛZ'X      ΛZ'ZΛ + I  ] [u] = [ΛZ'y]
/// ```
///
/// The coefficient matrix `M(θ)` is positive definite for every `θ ≥ 0`
/// whenever `X` has full column rank. Cross products are computed once; only
/// the scaling by `θ` changes between evaluations.
#[derive(Debug, Clone)]
pub struct MixedModelEquations {
    xtx: DMatrix<f64>,
    ztx: DMatrix<f64>,
    ztz: DMatrix<f64>,
    xty: DVector<f64>,
    zty: DVector<f64>,
    yty: f64,
    /// Grouping index of each random-effect column.
    column_grouping: Vec<usize>,
    /// Number of columns per grouping.
    pub n_random: Vec<usize>,
    pub n_fixed: usize,
    pub n_obs: usize,
}

impl MixedModelEquations {
    /// Precompute `X'X`, `Z'X`, `Z'Z`, `X'y`, `Z'y` and `y'y`.
    pub fn assemble(frame: &ModelFrame) -> Self {
        let n = frame.n_obs();
        let z = combined_random_design(&frame.groupings, n);
        let y = frame.y.as_slice();

        let column_grouping = frame
            .groupings
            .iter()
            .enumerate()
            .flat_map(|(k, g)| std::iter::repeat(k).take(g.z.cols()))
            .collect();

        Self {
            xtx: xtx_dense(&frame.x),
            ztx: at_b_dense(&z, &frame.x),
            ztz: xtx_dense(&z),
            xty: DVector::from_vec(xt_y(&frame.x, y)),
            zty: DVector::from_vec(xt_y(&z, y)),
            yty: frame.y.dot(&frame.y),
            column_grouping,
            n_random: frame.groupings.iter().map(|g| g.z.cols()).collect(),
            n_fixed: frame.x.cols(),
            n_obs: n,
        }
    }

    pub fn n_groupings(&self) -> usize {
        self.n_random.len()
    }

    /// `X'X`, used for the identifiability rank check.
    pub fn xtx(&self) -> &DMatrix<f64> {
        &self.xtx
    }

    /// Solve the system at relative factors `theta` (one per grouping).
    pub fn solve(&self, theta: &[f64]) -> Result<MmeSolution> {
        if theta.len() != self.n_groupings() {
            return Err(LmmError::DimensionMismatch {
                expected: self.n_groupings(),
                got: theta.len(),
                context: "relative variance parameters".into(),
            });
        }
        let p = self.n_fixed;
        let q = self.column_grouping.len();
        let dim = p + q;
        let lambda: Vec<f64> = self.column_grouping.iter().map(|&k| theta[k]).collect();

        let mut a = DMatrix::identity(q, q);
        for i in 0..q {
            for j in 0..q {
                a[(i, j)] += lambda[i] * self.ztz[(i, j)] * lambda[j];
            }
        }

        let mut c = DMatrix::zeros(dim, dim);
        c.view_mut((0, 0), (p, p)).copy_from(&self.xtx);
        c.view_mut((p, p), (q, q)).copy_from(&a);
        for i in 0..q {
            for j in 0..p {
                let v = lambda[i] * self.ztx[(i, j)];
                c[(p + i, j)] = v;
                c[(j, p + i)] = v;
            }
        }

        let mut rhs = DVector::zeros(dim);
        rhs.rows_mut(0, p).copy_from(&self.xty);
        for i in 0..q {
            rhs[p + i] = lambda[i] * self.zty[i];
        }

        let chol = c.cholesky().ok_or(LmmError::NotPositiveDefinite)?;
        let sol = chol.solve(&rhs);

        let l = chol.l();
        let log_det_m = 2.0 * (0..dim).map(|i| l[(i, i)].ln()).sum::<f64>();
        let log_det_a = if q == 0 {
            0.0
        } else {
            let la = a.cholesky().ok_or(LmmError::NotPositiveDefinite)?.l();
            2.0 * (0..q).map(|i| la[(i, i)].ln()).sum::<f64>()
        };

        // y'y - sol'rhs is the penalized residual sum of squares at the solution.
        let pwrss = self.yty - sol.dot(&rhs);
        if pwrss.is_nan() || pwrss <= 0.0 {
            return Err(LmmError::singular(
                "penalized residual sum of squares is not positive (perfect fit)",
            ));
        }

        let unit = DMatrix::from_fn(dim, p, |i, j| if i == j { 1.0 } else { 0.0 });
        let m_inv_beta = chol.solve(&unit).rows(0, p).into_owned();

        let u = sol.rows(p, q).into_owned();
        let b = DVector::from_iterator(q, u.iter().zip(&lambda).map(|(ui, li)| ui * li));

        Ok(MmeSolution {
            beta: sol.rows(0, p).into_owned(),
            u,
            b,
            pwrss,
            log_det_a,
            log_det_m,
            m_inv_beta,
        })
    }
}

/// Solution of the mixed model equations at one value of `θ`.
#[derive(Debug, Clone)]
pub struct MmeSolution {
    /// Fixed effects.
    pub beta: DVector<f64>,
    /// Spherical random effects.
    pub u: DVector<f64>,
    /// Random effects on the response scale, `b = Λu`.
    pub b: DVector<f64>,
    /// Penalized residual sum of squares `‖y - Xβ - ZΛu‖² + ‖u‖²`.
    pub pwrss: f64,
    /// `ln|ΛZ'ZΛ + I|`.
    pub log_det_a: f64,
    /// `ln|M(θ)|`.
    pub log_det_m: f64,
    /// Fixed-effects block of `M(θ)⁻¹`; multiplied by `σ²` it is the
    /// coefficient covariance.
    pub m_inv_beta: DMatrix<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataFrame;
    use crate::model::{build_model_frame, ModelSpec};
    use approx::assert_relative_eq;

    fn grouped() -> ModelFrame {
        let mut df = DataFrame::new();
        df.add_float_column("y", vec![10.0, 12.0, 6.0, 8.0]).unwrap();
        df.add_factor_column("g", &["a", "a", "b", "b"]).unwrap();
        let spec = ModelSpec::builder("y").random("g").build(&df).unwrap();
        build_model_frame(&df, &spec).unwrap()
    }

    #[test]
    fn test_intercept_only_is_mean() {
        let mut df = DataFrame::new();
        df.add_float_column("y", vec![5.0, 3.0, 7.0]).unwrap();
        let spec = ModelSpec::builder("y").build(&df).unwrap();
        let frame = build_model_frame(&df, &spec).unwrap();
        let mme = MixedModelEquations::assemble(&frame);
        let sol = mme.solve(&[]).unwrap();
        assert_relative_eq!(sol.beta[0], 5.0, epsilon = 1e-10);
        assert_relative_eq!(sol.pwrss, 8.0, epsilon = 1e-10);
        assert_relative_eq!(sol.log_det_a, 0.0, epsilon = 1e-12);
        assert_relative_eq!(sol.log_det_m, 3.0_f64.ln(), epsilon = 1e-10);
        assert_relative_eq!(sol.m_inv_beta[(0, 0)], 1.0 / 3.0, epsilon = 1e-10);
    }

    #[test]
    fn test_random_effects_shrink_toward_zero() {
        let mme = MixedModelEquations::assemble(&grouped());
        let sol = mme.solve(&[1.0]).unwrap();
        // Balanced: intercept equals grand mean regardless of theta.
        assert_relative_eq!(sol.beta[0], 9.0, epsilon = 1e-10);
        // Group means deviate by +-2, shrunk by 2 / (2 + 1).
        assert_relative_eq!(sol.b[0], 4.0 / 3.0, epsilon = 1e-10);
        assert_relative_eq!(sol.b[1], -4.0 / 3.0, epsilon = 1e-10);
    }

    #[test]
    fn test_zero_theta_reduces_to_least_squares() {
        let mme = MixedModelEquations::assemble(&grouped());
        let sol = mme.solve(&[0.0]).unwrap();
        assert_relative_eq!(sol.beta[0], 9.0, epsilon = 1e-10);
        assert_relative_eq!(sol.b.norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(sol.pwrss, 20.0, epsilon = 1e-10);
        assert_relative_eq!(sol.log_det_a, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_pwrss_matches_direct_computation() {
        let mme = MixedModelEquations::assemble(&grouped());
        let sol = mme.solve(&[0.7]).unwrap();
        let y = [10.0, 12.0, 6.0, 8.0];
        let groups = [0usize, 0, 1, 1];
        let rss: f64 = y
            .iter()
            .zip(groups)
            .map(|(yi, g)| (yi - sol.beta[0] - sol.b[g]).powi(2))
            .sum();
        assert_relative_eq!(sol.pwrss, rss + sol.u.norm_squared(), epsilon = 1e-9);
    }

    #[test]
    fn test_wrong_theta_length() {
        let mme = MixedModelEquations::assemble(&grouped());
        assert!(matches!(
            mme.solve(&[1.0, 2.0]),
            Err(LmmError::DimensionMismatch { .. })
        ));
    }
}
