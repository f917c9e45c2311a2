use nalgebra::DVector;
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::data::DataFrame;
use crate::diagnostics::{DdfCalculator, DdfMethod};
use crate::error::{LmmError, Result};
use crate::model::{build_model_frame, ModelSpec};

use super::fitter::Fitter;

/// Estimated mean of one factor combination.
#[derive(Debug, Clone, Serialize)]
pub struct CellEstimate {
    /// One level per factor, in factor order.
    pub levels: Vec<String>,
    pub estimate: f64,
    pub std_error: f64,
    /// Satterthwaite degrees of freedom of the estimate.
    pub df: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Model-based means of every observed combination of some factors.
#[derive(Debug, Clone, Serialize)]
pub struct CellMeans {
    pub factors: Vec<String>,
    pub confidence: f64,
    pub cells: Vec<CellEstimate>,
}

impl CellMeans {
    pub fn get(&self, levels: &[&str]) -> Option<&CellEstimate> {
        self.cells
            .iter()
            .find(|c| c.levels.iter().map(String::as_str).eq(levels.iter().copied()))
    }

    pub fn summary(&self) -> String {
        let mut s = format!(
            "--- Cell means ({}) with {:.0}% confidence intervals ---\n",
            self.factors.join(" x "),
            self.confidence * 100.0
        );
        s.push_str(&format!(
            "{:<28} {:>12} {:>10} {:>8} {:>12} {:>12}\n",
            "Cell", "Mean", "SE", "df", "Lower", "Upper"
        ));
        for c in &self.cells {
            s.push_str(&format!(
                "{:<28} {:>12.4} {:>10.4} {:>8.2} {:>12.4} {:>12.4}\n",
                c.levels.join(":"),
                c.estimate,
                c.std_error,
                c.df,
                c.lower,
                c.upper
            ));
        }
        s
    }
}

/// Means of each observed combination of `factors` under the random-effects
/// structure of `spec`.
///
/// The model is refitted with one indicator column per combination and no
/// intercept, keeping the rows, random groupings and criterion of `spec`.
/// Every factor must be a main-effect term of `spec`. Intervals use a
/// t quantile with Satterthwaite degrees of freedom.
pub fn cell_means(
    spec: &ModelSpec,
    data: &DataFrame,
    factors: &[&str],
    confidence: f64,
    fitter: &Fitter,
) -> Result<CellMeans> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(LmmError::Validation(format!(
            "confidence level must lie in (0, 1), got {}",
            confidence
        )));
    }
    if factors.is_empty() {
        return Err(LmmError::Validation(
            "cell means need at least one factor".into(),
        ));
    }
    for f in factors {
        let is_main = spec
            .fixed_terms()
            .iter()
            .any(|t| t.order() == 1 && t.vars()[0] == *f);
        if !is_main {
            return Err(LmmError::Validation(format!(
                "'{}' is not a fixed main effect of '{}'",
                f,
                spec.formula()
            )));
        }
        data.get_factor(f)?;
    }

    let frame = build_model_frame(data, spec)?;
    let (cell_frame, labels) = frame.with_cell_design(data, factors)?;

    let mut builder = ModelSpec::builder(spec.response())
        .fixed_formula(&factors.join("*"))
        .intercept(false)
        .criterion(spec.criterion());
    for g in spec.random_groupings() {
        builder = builder.random(g);
    }
    let cell_spec = builder.build(data)?;

    let start = fitter.starting_values(spec, data);
    let model = fitter.fit_frame(&cell_spec, &cell_frame, &start)?;

    let calc = DdfCalculator::new(&model, DdfMethod::Satterthwaite);
    let p = model.n_fixed();
    let upper_tail = 0.5 + confidence / 2.0;

    let mut cells = Vec::with_capacity(p);
    for (j, levels) in labels.into_iter().enumerate() {
        let mut e = DVector::zeros(p);
        e[j] = 1.0;
        let df = calc.ddf(&e);
        let t = StudentsT::new(0.0, 1.0, df)
            .map_err(|err| LmmError::Validation(format!("t distribution: {}", err)))?
            .inverse_cdf(upper_tail);
        let c = &model.coefficients[j];
        cells.push(CellEstimate {
            levels,
            estimate: c.estimate,
            std_error: c.std_error,
            df,
            lower: c.estimate - t * c.std_error,
            upper: c.estimate + t * c.std_error,
        });
    }

    log::debug!(
        "cell means of {} over {} cells",
        factors.join(":"),
        cells.len()
    );

    Ok(CellMeans {
        factors: factors.iter().map(|f| f.to_string()).collect(),
        confidence,
        cells,
    })
}
