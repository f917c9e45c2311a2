use nalgebra::DMatrix;
use sprs::{CsMat, TriMat};

/// Incremental sparse matrix builder using triplet (COO) format.
///
/// Duplicate entries at the same (row, col) are summed when converting to CSC.
#[derive(Debug)]
pub struct TripletBuilder {
    triplet: TriMat<f64>,
}

impl TripletBuilder {
    pub fn new(nrow: usize, ncol: usize) -> Self {
        Self {
            triplet: TriMat::new((nrow, ncol)),
        }
    }

    /// Add a value at (row, col). Duplicate entries will be summed.
    pub fn add(&mut self, row: usize, col: usize, val: f64) {
        self.triplet.add_triplet(row, col, val);
    }

    /// Convert to a CSC (Compressed Sparse Column) matrix.
    pub fn to_csc(&self) -> CsMat<f64> {
        self.triplet.to_csc()
    }
}

/// Multiply a sparse matrix by a dense vector: result = A * x.
pub fn spmv(a: &CsMat<f64>, x: &[f64]) -> Vec<f64> {
    debug_assert_eq!(a.cols(), x.len());
    let mut result = vec![0.0; a.rows()];
    for (val, (row, col)) in a.iter() {
        result[row] += val * x[col];
    }
    result
}

/// Compute X' * y for a sparse matrix X and dense vector y.
pub fn xt_y(x: &CsMat<f64>, y: &[f64]) -> Vec<f64> {
    let mut result = vec![0.0; x.cols()];
    for (val, (row, col)) in x.iter() {
        result[col] += val * y[row];
    }
    result
}

fn as_csc(x: &CsMat<f64>) -> CsMat<f64> {
    if x.is_csc() {
        x.clone()
    } else {
        x.to_csc()
    }
}

/// Compute X' * X for a sparse matrix X, returning a dense matrix.
pub fn xtx_dense(x: &CsMat<f64>) -> DMatrix<f64> {
    let ncol = x.cols();
    let mut result = DMatrix::zeros(ncol, ncol);
    let x_csc = as_csc(x);

    for j in 0..ncol {
        if let Some(col_j) = x_csc.outer_view(j) {
            for i in j..ncol {
                if let Some(col_i) = x_csc.outer_view(i) {
                    let dot = col_j.dot(&col_i);
                    result[(i, j)] = dot;
                    result[(j, i)] = dot;
                }
            }
        }
    }

    result
}

/// Compute A' * B for two sparse matrices with the same row count.
pub fn at_b_dense(a: &CsMat<f64>, b: &CsMat<f64>) -> DMatrix<f64> {
    debug_assert_eq!(a.rows(), b.rows());
    let a_csc = as_csc(a);
    let b_csc = as_csc(b);
    let mut result = DMatrix::zeros(a.cols(), b.cols());

    for i in 0..a.cols() {
        if let Some(col_a) = a_csc.outer_view(i) {
            for j in 0..b.cols() {
                if let Some(col_b) = b_csc.outer_view(j) {
                    result[(i, j)] = col_a.dot(&col_b);
                }
            }
        }
    }

    result
}
