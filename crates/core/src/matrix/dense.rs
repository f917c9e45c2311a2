use nalgebra::DMatrix;

/// Inverse of an SPD matrix via Cholesky.
pub fn inverse_spd(a: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    Some(a.clone().cholesky()?.inverse())
}

/// Inverse of a small symmetric matrix that may only be positive
/// semi-definite numerically, falling back to the eigen-decomposition.
///
/// Eigenvalues below `tol * max_eigenvalue` are treated as zero, giving the
/// Moore-Penrose pseudo-inverse.
pub fn pinv_symmetric(a: &DMatrix<f64>, tol: f64) -> DMatrix<f64> {
    if let Some(inv) = inverse_spd(a) {
        return inv;
    }
    let eig = a.clone().symmetric_eigen();
    let max = eig.eigenvalues.iter().fold(0.0_f64, |m, &v| m.max(v.abs()));
    let n = a.nrows();
    let mut out = DMatrix::zeros(n, n);
    for (k, &lambda) in eig.eigenvalues.iter().enumerate() {
        if lambda.abs() > tol * max && lambda.abs() > 0.0 {
            let v = eig.eigenvectors.column(k);
            out += (v * v.transpose()) / lambda;
        }
    }
    out
}

/// Numerical rank of a symmetric positive semi-definite matrix.
pub fn rank_psd(a: &DMatrix<f64>, tol: f64) -> usize {
    if a.nrows() == 0 {
        return 0;
    }
    let eig = a.clone().symmetric_eigen();
    let max = eig.eigenvalues.iter().fold(0.0_f64, |m, &v| m.max(v.abs()));
    if max == 0.0 {
        return 0;
    }
    eig.eigenvalues.iter().filter(|&&v| v > tol * max).count()
}

/// Orthonormal basis of the null space of `a` (columns), via the
/// eigenvectors of `a'a` with eigenvalue below `tol * max_eigenvalue`.
pub fn null_space(a: &DMatrix<f64>, tol: f64) -> DMatrix<f64> {
    let n = a.ncols();
    if a.nrows() == 0 {
        return DMatrix::identity(n, n);
    }
    let ata = a.transpose() * a;
    let eig = ata.symmetric_eigen();
    let max = eig.eigenvalues.iter().fold(0.0_f64, |m, &v| m.max(v.abs()));
    let cols: Vec<usize> = (0..n)
        .filter(|&k| max == 0.0 || eig.eigenvalues[k] <= tol * max)
        .collect();
    DMatrix::from_fn(n, cols.len(), |i, j| eig.eigenvectors[(i, cols[j])])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_inverse_spd() {
        let a = DMatrix::from_row_slice(2, 2, &[4.0, 2.0, 2.0, 3.0]);
        let product = &a * inverse_spd(&a).unwrap();
        assert_relative_eq!(product, DMatrix::identity(2, 2), epsilon = 1e-10);
    }

    #[test]
    fn test_pinv_of_singular_matrix() {
        // rank one: [[1, 1], [1, 1]] has pseudo-inverse [[.25, .25], [.25, .25]]
        let a = DMatrix::from_element(2, 2, 1.0);
        let p = pinv_symmetric(&a, 1e-10);
        assert_relative_eq!(p[(0, 0)], 0.25, epsilon = 1e-10);
        assert_relative_eq!(p[(0, 1)], 0.25, epsilon = 1e-10);
    }

    #[test]
    fn test_rank_psd() {
        let a = DMatrix::from_row_slice(3, 3, &[1.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 2.0]);
        assert_eq!(rank_psd(&a, 1e-10), 2);
        assert_eq!(rank_psd(&DMatrix::identity(4, 4), 1e-10), 4);
    }

    #[test]
    fn test_null_space() {
        // Row [1, -1, 0]: null space spanned by (1, 1, 0)/sqrt2 and (0, 0, 1)
        let a = DMatrix::from_row_slice(1, 3, &[1.0, -1.0, 0.0]);
        let n = null_space(&a, 1e-10);
        assert_eq!(n.ncols(), 2);
        let check = &a * &n;
        assert_relative_eq!(check.norm(), 0.0, epsilon = 1e-10);
        assert_relative_eq!((n.transpose() * &n), DMatrix::identity(2, 2), epsilon = 1e-10);
    }
}
