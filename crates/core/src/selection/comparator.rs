use serde::Serialize;

use crate::error::{LmmError, Result};
use crate::lmm::FittedModel;

/// Penalized-likelihood score used to rank models; lower is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InformationCriterion {
    /// `-2 logL + 2k`
    Aic,
    /// `-2 logL + k ln(n)`
    Bic,
    /// AIC with the small-sample correction `2k(k + 1) / (n - k - 1)`.
    Aicc,
}

impl InformationCriterion {
    pub fn name(&self) -> &'static str {
        match self {
            InformationCriterion::Aic => "AIC",
            InformationCriterion::Bic => "BIC",
            InformationCriterion::Aicc => "AICc",
        }
    }

    /// Score of one fitted model, with `k` its effective parameter count.
    pub fn value(&self, model: &FittedModel) -> f64 {
        let k = model.effective_parameter_count() as f64;
        let n = model.n_obs as f64;
        match self {
            InformationCriterion::Aic => model.aic(),
            InformationCriterion::Bic => model.bic(),
            InformationCriterion::Aicc => {
                if n - k - 1.0 > 0.0 {
                    model.aic() + 2.0 * k * (k + 1.0) / (n - k - 1.0)
                } else {
                    f64::INFINITY
                }
            }
        }
    }
}

impl std::fmt::Display for InformationCriterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for InformationCriterion {
    type Err = LmmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "aic" => Ok(InformationCriterion::Aic),
            "bic" => Ok(InformationCriterion::Bic),
            "aicc" => Ok(InformationCriterion::Aicc),
            other => Err(LmmError::Validation(format!(
                "unknown information criterion '{}'",
                other
            ))),
        }
    }
}

/// One ranked model.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonRow {
    pub model: FittedModel,
    pub value: f64,
    /// Gap to the best score.
    pub delta: f64,
    /// 1 for the preferred model.
    pub rank: usize,
    /// `exp(-Δ/2) / Σ exp(-Δ_i/2)`.
    pub weight: f64,
}

/// Models ranked by an information criterion.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonTable {
    pub criterion: InformationCriterion,
    pub rows: Vec<ComparisonRow>,
}

impl ComparisonTable {
    /// The preferred model.
    pub fn best(&self) -> &ComparisonRow {
        &self.rows[0]
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn summary(&self) -> String {
        let mut s = format!("--- Model comparison by {} ---\n", self.criterion);
        s.push_str(&format!(
            "{:>4}  {:<44} {:>4} {:>12} {:>10} {:>8}\n",
            "Rank", "Model", "k", self.criterion.name(), "Delta", "Weight"
        ));
        for row in &self.rows {
            s.push_str(&format!(
                "{:>4}  {:<44} {:>4} {:>12.3} {:>10.3} {:>8.4}\n",
                row.rank,
                row.model.spec.formula(),
                row.model.effective_parameter_count(),
                row.value,
                row.delta,
                row.weight
            ));
        }
        s
    }
}

/// Rank `models` by `criterion` with the default tie tolerance of `1e-6`.
pub fn compare(models: &[FittedModel], criterion: InformationCriterion) -> Result<ComparisonTable> {
    compare_with(models, criterion, 1e-6)
}

/// Rank `models` by `criterion`.
///
/// All models must share response, fixed terms, intercept, estimation
/// criterion and observation count; otherwise `IncomparableModels` is
/// returned and nothing is ranked. Scores within `tie_tolerance` of each
/// other are ordered by number of random groupings, fewest first.
pub fn compare_with(
    models: &[FittedModel],
    criterion: InformationCriterion,
    tie_tolerance: f64,
) -> Result<ComparisonTable> {
    let first = models
        .first()
        .ok_or_else(|| LmmError::Validation("no models to compare".into()))?;

    for m in &models[1..] {
        if !m.spec.same_fixed_structure(&first.spec) {
            return Err(LmmError::IncomparableModels(format!(
                "fixed effects differ: '{}' vs '{}'",
                first.spec.formula(),
                m.spec.formula()
            )));
        }
        if m.criterion() != first.criterion() {
            return Err(LmmError::IncomparableModels(format!(
                "estimation criteria differ: {} vs {}",
                first.criterion(),
                m.criterion()
            )));
        }
        if m.n_obs != first.n_obs {
            return Err(LmmError::IncomparableModels(format!(
                "observation counts differ: {} vs {}",
                first.n_obs, m.n_obs
            )));
        }
    }

    let mut scored: Vec<(f64, &FittedModel)> = models
        .iter()
        .map(|m| (criterion.value(m), m))
        .collect();
    if scored.iter().any(|(v, _)| v.is_nan()) {
        return Err(LmmError::Validation(format!(
            "{} is undefined for at least one model",
            criterion
        )));
    }
    scored.sort_by(|a, b| a.0.total_cmp(&b.0));

    // Parsimony among near-ties.
    for i in 1..scored.len() {
        let mut j = i;
        while j > 0
            && (scored[j].0 - scored[j - 1].0).abs() <= tie_tolerance
            && scored[j].1.n_groupings() < scored[j - 1].1.n_groupings()
        {
            scored.swap(j, j - 1);
            j -= 1;
        }
    }

    let best = scored.iter().map(|(v, _)| *v).fold(f64::INFINITY, f64::min);
    let raw: Vec<f64> = scored.iter().map(|(v, _)| (-0.5 * (v - best)).exp()).collect();
    let total: f64 = raw.iter().sum();

    let rows = scored
        .into_iter()
        .zip(raw)
        .enumerate()
        .map(|(i, ((value, model), w))| ComparisonRow {
            model: model.clone(),
            value,
            delta: value - best,
            rank: i + 1,
            weight: w / total,
        })
        .collect();

    Ok(ComparisonTable { criterion, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataFrame;
    use crate::lmm::fit;
    use crate::model::ModelSpec;
    use crate::types::Criterion;
    use approx::assert_relative_eq;

    fn data() -> DataFrame {
        let mut y = Vec::new();
        let mut tank = Vec::new();
        let mut origin = Vec::new();
        let offsets = [1.2, -0.8, 0.5, -1.4, 0.9, -0.3];
        let noise = [0.21, -0.35, 0.12, 0.05, -0.18, 0.27];
        for (t, off) in offsets.iter().enumerate() {
            for (r, e) in noise.iter().enumerate() {
                y.push(20.0 + off + e * if t % 2 == 0 { 1.0 } else { -1.0 } + (r % 2) as f64);
                tank.push(format!("t{}", t));
                origin.push(if r % 2 == 0 { "w" } else { "h" });
            }
        }
        let mut df = DataFrame::new();
        df.add_float_column("length", y).unwrap();
        df.add_factor_column("tank", &tank).unwrap();
        df.add_factor_column("origin", &origin).unwrap();
        df
    }

    fn fit_with(df: &DataFrame, formula: &str, random: &[&str], criterion: Criterion) -> FittedModel {
        let mut b = ModelSpec::builder("length").fixed_formula(formula).criterion(criterion);
        for g in random {
            b = b.random(g);
        }
        fit(&b.build(df).unwrap(), df).unwrap()
    }

    #[test]
    fn test_weights_sum_to_one_and_ranked() {
        let df = data();
        let none = fit_with(&df, "origin", &[], Criterion::Restricted);
        let tank = fit_with(&df, "origin", &["tank"], Criterion::Restricted);
        let table = compare(&[none, tank], InformationCriterion::Aic).unwrap();
        let total: f64 = table.rows.iter().map(|r| r.weight).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-12);
        assert_eq!(table.best().rank, 1);
        assert_relative_eq!(table.best().delta, 0.0);
        assert!(table.rows[0].value <= table.rows[1].value);
        // Tanks differ clearly, so the grouped model wins.
        assert_eq!(table.best().model.n_groupings(), 1);
        assert!(table.summary().contains("AIC"));
    }

    #[test]
    fn test_different_fixed_terms_rejected() {
        let df = data();
        let a = fit_with(&df, "origin", &["tank"], Criterion::Full);
        let b = fit_with(&df, "1", &["tank"], Criterion::Full);
        assert!(matches!(
            compare(&[a, b], InformationCriterion::Aic),
            Err(LmmError::IncomparableModels(_))
        ));
    }

    #[test]
    fn test_different_criteria_rejected() {
        let df = data();
        let a = fit_with(&df, "origin", &["tank"], Criterion::Full);
        let b = fit_with(&df, "origin", &[], Criterion::Restricted);
        assert!(matches!(
            compare(&[a, b], InformationCriterion::Bic),
            Err(LmmError::IncomparableModels(_))
        ));
    }

    #[test]
    fn test_empty_rejected() {
        assert!(matches!(
            compare(&[], InformationCriterion::Aic),
            Err(LmmError::Validation(_))
        ));
    }

    #[test]
    fn test_tie_prefers_fewer_groupings() {
        let df = data();
        let grouped = fit_with(&df, "origin", &["tank"], Criterion::Full);
        let mut simple = fit_with(&df, "origin", &[], Criterion::Full);
        // Force an exact tie in AIC.
        let k_diff = (grouped.effective_parameter_count() - simple.effective_parameter_count()) as f64;
        simple.log_likelihood = grouped.log_likelihood - k_diff;
        let table = compare(&[grouped, simple], InformationCriterion::Aic).unwrap();
        assert_eq!(table.rows[0].model.n_groupings(), 0);
        assert_relative_eq!(table.rows[0].weight, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_criterion_values() {
        let df = data();
        let m = fit_with(&df, "origin", &["tank"], Criterion::Full);
        let k = 4.0;
        let n = 36.0_f64;
        assert_relative_eq!(InformationCriterion::Aic.value(&m), -2.0 * m.log_likelihood + 2.0 * k);
        assert_relative_eq!(
            InformationCriterion::Bic.value(&m),
            -2.0 * m.log_likelihood + k * n.ln()
        );
        assert!(InformationCriterion::Aicc.value(&m) > InformationCriterion::Aic.value(&m));
        assert_eq!("bic".parse::<InformationCriterion>().unwrap(), InformationCriterion::Bic);
    }
}
