use serde::Serialize;
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::error::{LmmError, Result};
use crate::lmm::FittedModel;
use crate::types::Criterion;

/// Likelihood-ratio test between two nested fixed-effects structures.
#[derive(Debug, Clone, Serialize)]
pub struct LrtResult {
    pub reduced: String,
    pub full: String,
    /// `2 (logL_full - logL_reduced)`.
    pub statistic: f64,
    pub df: usize,
    pub p_value: f64,
}

/// Compare `reduced` against `full` by a chi-square likelihood-ratio test.
///
/// Both models must be fitted by full likelihood to the same observations,
/// share response and random groupings, and the fixed terms of `reduced`
/// must be a strict subset of those of `full`.
pub fn likelihood_ratio_test(reduced: &FittedModel, full: &FittedModel) -> Result<LrtResult> {
    for m in [reduced, full] {
        if m.criterion() != Criterion::Full {
            return Err(LmmError::IncomparableModels(format!(
                "'{}' was fitted by {}; likelihood-ratio tests of fixed effects need ML fits",
                m.spec.formula(),
                m.criterion()
            )));
        }
    }
    if reduced.spec.response() != full.spec.response() || reduced.n_obs != full.n_obs {
        return Err(LmmError::IncomparableModels(
            "models are fitted to different responses or observations".into(),
        ));
    }
    let mut ga: Vec<&String> = reduced.spec.random_groupings().iter().collect();
    let mut gb: Vec<&String> = full.spec.random_groupings().iter().collect();
    ga.sort();
    gb.sort();
    if ga != gb {
        return Err(LmmError::IncomparableModels(
            "models have different random groupings".into(),
        ));
    }
    let nested = reduced
        .spec
        .fixed_terms()
        .iter()
        .all(|t| full.spec.fixed_terms().iter().any(|f| f.same_as(t)))
        && (!reduced.spec.has_intercept() || full.spec.has_intercept());
    if !nested || full.n_fixed() <= reduced.n_fixed() {
        return Err(LmmError::IncomparableModels(format!(
            "'{}' is not nested in '{}'",
            reduced.spec.formula(),
            full.spec.formula()
        )));
    }

    let df = full.effective_parameter_count() - reduced.effective_parameter_count();
    let statistic = (2.0 * (full.log_likelihood - reduced.log_likelihood)).max(0.0);
    let dist = ChiSquared::new(df as f64)
        .map_err(|e| LmmError::Validation(format!("chi-square distribution: {}", e)))?;
    let p_value = 1.0 - dist.cdf(statistic);

    Ok(LrtResult {
        reduced: reduced.spec.formula(),
        full: full.spec.formula(),
        statistic,
        df,
        p_value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataFrame;
    use crate::lmm::fit;
    use crate::model::ModelSpec;
    use approx::assert_relative_eq;

    fn data() -> DataFrame {
        let mut df = DataFrame::new();
        df.add_float_column(
            "y",
            vec![4.1, 5.0, 4.6, 6.2, 6.8, 7.1, 4.4, 5.3, 4.9, 6.0, 7.2, 6.6],
        )
        .unwrap();
        df.add_factor_column(
            "origin",
            &["w", "w", "w", "h", "h", "h", "w", "w", "w", "h", "h", "h"],
        )
        .unwrap();
        df
    }

    #[test]
    fn test_lrt_nested_ml_fits() {
        let df = data();
        let full = ModelSpec::builder("y")
            .fixed_formula("origin")
            .criterion(Criterion::Full)
            .build(&df)
            .unwrap();
        let reduced = ModelSpec::builder("y").criterion(Criterion::Full).build(&df).unwrap();
        let mf = fit(&full, &df).unwrap();
        let mr = fit(&reduced, &df).unwrap();
        let lrt = likelihood_ratio_test(&mr, &mf).unwrap();
        assert_eq!(lrt.df, 1);
        // Gaussian ML: statistic = n ln(RSS0 / RSS1)
        let expected = 12.0 * (mr.residual_variance / mf.residual_variance).ln();
        assert_relative_eq!(lrt.statistic, expected, max_relative = 1e-8);
        assert!(lrt.p_value < 0.01);
    }

    #[test]
    fn test_lrt_rejects_reml_fits() {
        let df = data();
        let full = ModelSpec::builder("y").fixed_formula("origin").build(&df).unwrap();
        let reduced = ModelSpec::builder("y").build(&df).unwrap();
        let err = likelihood_ratio_test(&fit(&reduced, &df).unwrap(), &fit(&full, &df).unwrap())
            .unwrap_err();
        assert!(matches!(err, LmmError::IncomparableModels(_)));
    }

    #[test]
    fn test_lrt_rejects_wrong_order() {
        let df = data();
        let full = ModelSpec::builder("y")
            .fixed_formula("origin")
            .criterion(Criterion::Full)
            .build(&df)
            .unwrap();
        let reduced = ModelSpec::builder("y").criterion(Criterion::Full).build(&df).unwrap();
        let mf = fit(&full, &df).unwrap();
        let mr = fit(&reduced, &df).unwrap();
        assert!(likelihood_ratio_test(&mf, &mr).is_err());
    }
}
