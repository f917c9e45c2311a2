use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

use crate::error::{LmmError, Result};
use crate::lmm::FittedModel;
use crate::matrix::dense::{null_space, pinv_symmetric, rank_psd};

use super::ddf::{DdfCalculator, DdfMethod};

/// Result of a Wald F-test for a single fixed-effect term.
#[derive(Debug, Clone, Serialize)]
pub struct TermTest {
    pub term: String,
    /// Wald F-statistic `(Lβ)' (LΦL')⁻¹ (Lβ) / rank(L)`.
    pub statistic: f64,
    pub num_df: usize,
    pub den_df: f64,
    pub p_value: f64,
}

/// Options for [`test_fixed_effects_with`].
#[derive(Debug, Clone, Default)]
pub struct TestOptions {
    pub ddf: DdfMethod,
}

impl TestOptions {
    pub fn ddf(mut self, method: DdfMethod) -> Self {
        self.ddf = method;
        self
    }
}

/// Type-II Wald tests with Satterthwaite denominator df.
pub fn test_fixed_effects(model: &FittedModel) -> Result<Vec<TermTest>> {
    test_fixed_effects_with(model, &TestOptions::default())
}

/// Type-II Wald F-tests for every fixed-effect term.
///
/// Each term `T` is tested after all terms that do not contain it. Its
/// hypothesis matrix spans the coefficients of `T` and its higher-order
/// relatives `R` (terms containing `T`), restricted to the directions that
/// are `Φ`-orthogonal to `R`'s own coefficients. A main effect is therefore
/// assessed with its interactions present in the model, never by dropping
/// them. Without relatives this is the plain joint test of `T`'s
/// coefficients. The intercept is not tested.
pub fn test_fixed_effects_with(model: &FittedModel, options: &TestOptions) -> Result<Vec<TermTest>> {
    let calc = DdfCalculator::new(model, options.ddf);
    let beta = DVector::from_vec(model.estimates());
    let p = beta.len();

    let mut tests = Vec::with_capacity(model.term_columns.len());
    for tc in &model.term_columns {
        if tc.columns.is_empty() {
            return Err(LmmError::singular(format!(
                "term '{}' has no estimable columns (a single observed level?)",
                tc.term.label()
            )));
        }
        let relatives: Vec<usize> = model
            .term_columns
            .iter()
            .filter(|other| other.term.contains(&tc.term))
            .flat_map(|other| other.columns.clone())
            .collect();

        let l = hypothesis_matrix(&model.vcov, &relatives, &tc.columns.clone().collect::<Vec<_>>(), p);
        let test = wald_f(&tc.term.label(), &l, &beta, &model.vcov, &calc)?;
        log::debug!(
            "{}: F = {:.4} on ({}, {:.2}) df",
            test.term,
            test.statistic,
            test.num_df,
            test.den_df
        );
        tests.push(test);
    }
    Ok(tests)
}

/// Rows of `L` for a term with columns `term` and relative columns
/// `relatives`, in the full coefficient space of dimension `p`.
fn hypothesis_matrix(vcov: &DMatrix<f64>, relatives: &[usize], term: &[usize], p: usize) -> DMatrix<f64> {
    if relatives.is_empty() {
        return DMatrix::from_fn(term.len(), p, |i, j| if term[i] == j { 1.0 } else { 0.0 });
    }
    let span: Vec<usize> = relatives.iter().chain(term).copied().collect();
    // Φ[R, R ∪ T]; its null space gives combinations orthogonal to R.
    let cross = DMatrix::from_fn(relatives.len(), span.len(), |i, j| {
        vcov[(relatives[i], span[j])]
    });
    let basis = null_space(&cross, 1e-10);
    let mut l = DMatrix::zeros(basis.ncols(), p);
    for r in 0..basis.ncols() {
        for (k, &col) in span.iter().enumerate() {
            l[(r, col)] = basis[(k, r)];
        }
    }
    l
}

fn wald_f(
    term: &str,
    l: &DMatrix<f64>,
    beta: &DVector<f64>,
    vcov: &DMatrix<f64>,
    calc: &DdfCalculator<'_>,
) -> Result<TermTest> {
    let lb = l * beta;
    let l_phi_lt = l * vcov * l.transpose();
    let rank = rank_psd(&l_phi_lt, 1e-10);
    if rank == 0 {
        return Err(LmmError::singular(format!(
            "hypothesis for '{}' has no estimable contrast",
            term
        )));
    }
    let inv = pinv_symmetric(&l_phi_lt, 1e-10);
    let statistic = (lb.transpose() * inv * &lb)[(0, 0)] / rank as f64;
    let den_df = calc.ddf_multi(l);

    let dist = FisherSnedecor::new(rank as f64, den_df)
        .map_err(|e| LmmError::Validation(format!("F distribution for '{}': {}", term, e)))?;
    let p_value = (1.0 - dist.cdf(statistic)).clamp(0.0, 1.0);

    Ok(TermTest {
        term: term.to_string(),
        statistic,
        num_df: rank,
        den_df,
        p_value,
    })
}

fn significance(p: f64) -> &'static str {
    if p < 0.001 {
        "***"
    } else if p < 0.01 {
        "**"
    } else if p < 0.05 {
        "*"
    } else if p < 0.1 {
        "."
    } else {
        ""
    }
}

/// Format term tests as a table string.
pub fn format_tests(tests: &[TermTest]) -> String {
    let mut s = String::new();
    s.push_str("--- Type II Wald Tests for Fixed Effects ---\n");
    s.push_str(&format!(
        "{:<24} {:>10} {:>8} {:>10} {:>12}\n",
        "Term", "F-stat", "NumDF", "DenDF", "Pr(>F)"
    ));
    s.push_str(&format!("{}\n", "-".repeat(66)));

    for test in tests {
        s.push_str(&format!(
            "{:<24} {:>10.4} {:>8} {:>10.2} {:>12.4e} {}\n",
            test.term,
            test.statistic,
            test.num_df,
            test.den_df,
            test.p_value,
            significance(test.p_value)
        ));
    }

    s.push_str("---\nSignif. codes:  0 '***' 0.001 '**' 0.01 '*' 0.05 '.' 0.1 ' ' 1\n");
    s
}
