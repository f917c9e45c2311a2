use serde::Serialize;

use crate::data::{Column, DataFrame};
use crate::error::{LmmError, Result};
use crate::types::Criterion;

use super::term::{parse_fixed_formula, FixedTerm};

/// Immutable description of a mixed model.
///
/// Built through [`ModelSpecBuilder`], which checks every name against the
/// table schema. Derivation methods return new values; a `ModelSpec` is
/// never modified after construction.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSpec {
    response: String,
    fixed_terms: Vec<FixedTerm>,
    intercept: bool,
    random_groupings: Vec<String>,
    criterion: Criterion,
}

impl ModelSpec {
    /// Start building a specification for `response`.
    pub fn builder(response: &str) -> ModelSpecBuilder {
        ModelSpecBuilder::new(response)
    }

    pub fn response(&self) -> &str {
        &self.response
    }

    pub fn fixed_terms(&self) -> &[FixedTerm] {
        &self.fixed_terms
    }

    pub fn has_intercept(&self) -> bool {
        self.intercept
    }

    pub fn random_groupings(&self) -> &[String] {
        &self.random_groupings
    }

    pub fn criterion(&self) -> Criterion {
        self.criterion
    }

    /// Same specification under another estimation criterion.
    pub fn with_criterion(&self, criterion: Criterion) -> ModelSpec {
        ModelSpec {
            criterion,
            ..self.clone()
        }
    }

    /// Same fixed part with a different set of random groupings.
    ///
    /// The groupings were already validated for the original spec when they
    /// come from it; new names are checked when the model is fitted.
    pub fn with_random(&self, groupings: &[&str]) -> ModelSpec {
        ModelSpec {
            random_groupings: groupings.iter().map(|g| g.to_string()).collect(),
            ..self.clone()
        }
    }

    /// `true` when response, intercept and the set of fixed terms agree.
    pub fn same_fixed_structure(&self, other: &ModelSpec) -> bool {
        self.response == other.response
            && self.intercept == other.intercept
            && self.fixed_terms.len() == other.fixed_terms.len()
            && self
                .fixed_terms
                .iter()
                .all(|t| other.fixed_terms.iter().any(|o| o.same_as(t)))
    }

    /// Formula-style rendering, e.g. `y ~ 1 + a + b + a:b + (1|g)`.
    pub fn formula(&self) -> String {
        let mut parts: Vec<String> = vec![if self.intercept { "1" } else { "0" }.to_string()];
        parts.extend(self.fixed_terms.iter().map(|t| t.label()));
        parts.extend(self.random_groupings.iter().map(|g| format!("(1|{})", g)));
        format!("{} ~ {}", self.response, parts.join(" + "))
    }
}

/// Builder for [`ModelSpec`].
///
/// ```
/// use nestlmm_core::data::DataFrame;
/// use nestlmm_core::model::ModelSpec;
/// use nestlmm_core::Criterion;
///
/// let mut df = DataFrame::new();
/// df.add_float_column("length", vec![1.0, 2.0, 3.0, 4.0]).unwrap();
/// df.add_factor_column("origin", &["w", "w", "h", "h"]).unwrap();
/// df.add_factor_column("tank", &["t1", "t2", "t3", "t4"]).unwrap();
///
/// let spec = ModelSpec::builder("length")
///     .fixed_formula("origin")
///     .random("tank")
///     .criterion(Criterion::Full)
///     .build(&df)
///     .unwrap();
/// assert_eq!(spec.formula(), "length ~ 1 + origin + (1|tank)");
/// ```
pub struct ModelSpecBuilder {
    response: String,
    formula: Option<String>,
    fixed_terms: Vec<FixedTerm>,
    intercept: bool,
    random: Vec<String>,
    hierarchies: Vec<Vec<String>>,
    criterion: Criterion,
}

impl ModelSpecBuilder {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            formula: None,
            fixed_terms: Vec::new(),
            intercept: true,
            random: Vec::new(),
            hierarchies: Vec::new(),
            criterion: Criterion::Restricted,
        }
    }

    /// Fixed effects from a formula string (see [`parse_fixed_formula`]).
    pub fn fixed_formula(mut self, formula: &str) -> Self {
        self.formula = Some(formula.to_string());
        self
    }

    /// Add a single fixed term.
    pub fn fixed(mut self, term: FixedTerm) -> Self {
        self.fixed_terms.push(term);
        self
    }

    /// Include or drop the intercept (default: included).
    pub fn intercept(mut self, yes: bool) -> Self {
        self.intercept = yes;
        self
    }

    /// Add a random intercept for a grouping factor.
    pub fn random(mut self, grouping: &str) -> Self {
        self.random.push(grouping.to_string());
        self
    }

    /// Add random intercepts for a nested hierarchy, finest first
    /// (e.g. `["individual", "population"]`). Strict nesting is checked at
    /// build time.
    pub fn nested_random(mut self, levels: &[&str]) -> Self {
        for level in levels {
            self.random.push(level.to_string());
        }
        self.hierarchies
            .push(levels.iter().map(|l| l.to_string()).collect());
        self
    }

    /// Estimation criterion (default: restricted likelihood).
    pub fn criterion(mut self, criterion: Criterion) -> Self {
        self.criterion = criterion;
        self
    }

    /// Validate against the table schema and produce the specification.
    pub fn build(self, df: &DataFrame) -> Result<ModelSpec> {
        match df.get_column(&self.response) {
            Ok(Column::Float(_)) => {}
            Ok(other) => {
                return Err(LmmError::Validation(format!(
                    "response '{}' must be a Float column, found {}",
                    self.response,
                    other.kind()
                )))
            }
            Err(_) => {
                return Err(LmmError::Validation(format!(
                    "unknown response column '{}'",
                    self.response
                )))
            }
        }

        let mut intercept = self.intercept;
        let mut terms: Vec<FixedTerm> = Vec::new();
        if let Some(formula) = &self.formula {
            let parsed = parse_fixed_formula(formula)?;
            intercept = intercept && parsed.intercept;
            terms.extend(parsed.terms);
        }
        for term in self.fixed_terms {
            term.check_well_formed()?;
            if terms.iter().any(|t| t.same_as(&term)) {
                return Err(LmmError::Validation(format!(
                    "fixed term '{}' given twice",
                    term
                )));
            }
            terms.push(term);
        }
        terms.sort_by_key(|t| t.order());

        for term in &terms {
            for var in term.vars() {
                if var == &self.response {
                    return Err(LmmError::Validation(format!(
                        "response '{}' cannot appear in fixed term '{}'",
                        var, term
                    )));
                }
                if !df.has_column(var) {
                    return Err(LmmError::Validation(format!(
                        "unknown column '{}' in fixed term '{}'",
                        var, term
                    )));
                }
                if self.random.contains(var) {
                    return Err(LmmError::Validation(format!(
                        "'{}' is used both as a fixed term and a random grouping",
                        var
                    )));
                }
            }
            if term.order() > 1 {
                for drop in term.vars() {
                    let rest: Vec<&str> = term
                        .vars()
                        .iter()
                        .filter(|v| *v != drop)
                        .map(|v| v.as_str())
                        .collect();
                    let marginal = FixedTerm::interaction(&rest);
                    if !terms.iter().any(|t| t.same_as(&marginal)) {
                        return Err(LmmError::Validation(format!(
                            "interaction '{}' requires its marginal term '{}'",
                            term, marginal
                        )));
                    }
                }
            }
        }

        for (i, g) in self.random.iter().enumerate() {
            if self.random[..i].contains(g) {
                return Err(LmmError::Validation(format!(
                    "random grouping '{}' given twice",
                    g
                )));
            }
            if g == &self.response {
                return Err(LmmError::Validation(format!(
                    "response '{}' cannot be a random grouping",
                    g
                )));
            }
            match df.get_column(g) {
                Ok(Column::Factor(_)) => {}
                Ok(_) => {
                    return Err(LmmError::Validation(format!(
                        "random grouping '{}' must be a Factor column (see DataFrame::as_factor)",
                        g
                    )))
                }
                Err(_) => {
                    return Err(LmmError::Validation(format!(
                        "unknown random grouping column '{}'",
                        g
                    )))
                }
            }
        }

        for var in terms.iter().flat_map(|t| t.vars()).chain(&self.random) {
            df.require_observed(var)?;
        }

        for levels in &self.hierarchies {
            let names: Vec<&str> = levels.iter().map(|s| s.as_str()).collect();
            df.validate_nesting(&names)?;
        }

        Ok(ModelSpec {
            response: self.response,
            fixed_terms: terms,
            intercept,
            random_groupings: self.random,
            criterion: self.criterion,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_df() -> DataFrame {
        let mut df = DataFrame::new();
        df.add_float_column("length", vec![5.0, 3.0, 7.0, 4.0, 6.0, 2.0]).unwrap();
        df.add_float_column("age", vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0]).unwrap();
        df.add_factor_column("origin", &["w", "w", "w", "h", "h", "h"]).unwrap();
        df.add_factor_column("treatment", &["c", "t", "c", "t", "c", "t"]).unwrap();
        df.add_factor_column("individual", &["i1", "i1", "i2", "i3", "i3", "i4"]).unwrap();
        df.add_factor_column("population", &["A", "A", "A", "B", "B", "B"]).unwrap();
        df
    }

    #[test]
    fn test_missing_factor_labels_rejected() {
        let mut df = sample_df();
        df.add_factor_column("tank", &["t1", "t1", "", "t2", "t2", "t3"]).unwrap();
        df.add_factor_column("site", &["s1", "s2", "s1", ".", "s2", "s1"]).unwrap();
        for spec in [
            ModelSpec::builder("length").random("tank").build(&df),
            ModelSpec::builder("length").fixed_formula("site").build(&df),
        ] {
            assert!(matches!(spec, Err(LmmError::Validation(ref m)) if m.contains("missing value")));
        }
        assert!(ModelSpec::builder("length").random("individual").build(&df).is_ok());
    }

    #[test]
    fn test_build_basic() {
        let df = sample_df();
        let spec = ModelSpec::builder("length")
            .fixed_formula("origin * treatment")
            .random("individual")
            .build(&df)
            .unwrap();
        assert_eq!(spec.fixed_terms().len(), 3);
        assert!(spec.has_intercept());
        assert_eq!(spec.criterion(), Criterion::Restricted);
        assert_eq!(
            spec.formula(),
            "length ~ 1 + origin + treatment + origin:treatment + (1|individual)"
        );
    }

    #[test]
    fn test_unknown_column_rejected_eagerly() {
        let df = sample_df();
        let err = ModelSpec::builder("length")
            .fixed_formula("origin + sex")
            .build(&df)
            .unwrap_err();
        assert!(err.to_string().contains("sex"));
        assert!(ModelSpec::builder("weight").build(&df).is_err());
        assert!(ModelSpec::builder("length").random("tank").build(&df).is_err());
    }

    #[test]
    fn test_response_must_be_float() {
        let df = sample_df();
        assert!(ModelSpec::builder("origin").build(&df).is_err());
    }

    #[test]
    fn test_interaction_without_marginals_rejected() {
        let df = sample_df();
        let err = ModelSpec::builder("length")
            .fixed_formula("origin + origin:treatment")
            .build(&df)
            .unwrap_err();
        assert!(err.to_string().contains("marginal"));
    }

    #[test]
    fn test_grouping_must_be_factor_and_not_fixed() {
        let df = sample_df();
        assert!(ModelSpec::builder("length").random("age").build(&df).is_err());
        assert!(ModelSpec::builder("length")
            .fixed_formula("origin")
            .random("origin")
            .build(&df)
            .is_err());
        assert!(ModelSpec::builder("length")
            .random("individual")
            .random("individual")
            .build(&df)
            .is_err());
    }

    #[test]
    fn test_nested_random_validates_hierarchy() {
        let df = sample_df();
        let spec = ModelSpec::builder("length")
            .nested_random(&["individual", "population"])
            .build(&df)
            .unwrap();
        assert_eq!(spec.random_groupings(), &["individual", "population"]);

        assert!(ModelSpec::builder("length")
            .nested_random(&["treatment", "origin"])
            .build(&df)
            .is_err());
    }

    #[test]
    fn test_derivations_leave_original_untouched() {
        let df = sample_df();
        let spec = ModelSpec::builder("length")
            .fixed_formula("origin")
            .random("individual")
            .build(&df)
            .unwrap();
        let full = spec.with_criterion(Criterion::Full);
        let none = spec.with_random(&[]);
        assert_eq!(spec.criterion(), Criterion::Restricted);
        assert_eq!(full.criterion(), Criterion::Full);
        assert!(none.random_groupings().is_empty());
        assert!(spec.same_fixed_structure(&none));
    }

    #[test]
    fn test_same_fixed_structure_order_independent() {
        let df = sample_df();
        let a = ModelSpec::builder("length")
            .fixed_formula("origin + treatment")
            .build(&df)
            .unwrap();
        let b = ModelSpec::builder("length")
            .fixed_formula("treatment + origin")
            .build(&df)
            .unwrap();
        let c = ModelSpec::builder("length")
            .fixed_formula("origin")
            .build(&df)
            .unwrap();
        assert!(a.same_fixed_structure(&b));
        assert!(!a.same_fixed_structure(&c));
    }
}
