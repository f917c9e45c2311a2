/// The scalar type used throughout the library.
pub type Scalar = f64;

/// Dense matrix type (column-major).
pub type DenseMatrix = nalgebra::DMatrix<Scalar>;

/// Dense vector type.
pub type DenseVector = nalgebra::DVector<Scalar>;

/// Sparse matrix type (CSC format), used for design and incidence matrices.
pub type SparseMat = sprs::CsMat<Scalar>;

/// Estimation criterion for variance components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum Criterion {
    /// Restricted (residual) maximum likelihood: fixed effects are integrated
    /// out before the variance components are estimated.
    Restricted,
    /// Ordinary (full) maximum likelihood.
    Full,
}

impl Criterion {
    pub fn name(&self) -> &'static str {
        match self {
            Criterion::Restricted => "REML",
            Criterion::Full => "ML",
        }
    }
}

impl std::fmt::Display for Criterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
