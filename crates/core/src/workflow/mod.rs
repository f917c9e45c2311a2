//! End-to-end analysis: enumerate random-effects structures, fit them in
//! parallel, pick one by information criterion, refit it by full likelihood
//! and test its fixed effects.

use rayon::prelude::*;
use serde::Serialize;

use crate::data::DataFrame;
use crate::diagnostics::{test_fixed_effects_with, TermTest, TestOptions};
use crate::error::{LmmError, Result};
use crate::lmm::{cell_means, CellMeans, FitOptions, FittedModel, Fitter};
use crate::model::ModelSpec;
use crate::selection::{compare, ComparisonTable, InformationCriterion};
use crate::types::Criterion;

/// Outcome of fitting one candidate.
#[derive(Debug)]
pub enum CandidateState {
    Fitted(FittedModel),
    Failed(LmmError),
}

/// One candidate random-effects structure.
#[derive(Debug)]
pub struct Candidate {
    pub spec: ModelSpec,
    pub state: CandidateState,
}

impl Candidate {
    pub fn model(&self) -> Option<&FittedModel> {
        match &self.state {
            CandidateState::Fitted(m) => Some(m),
            CandidateState::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&LmmError> {
        match &self.state {
            CandidateState::Failed(e) => Some(e),
            CandidateState::Fitted(_) => None,
        }
    }
}

/// Every subset of `spec`'s random groupings, smallest first, each as its
/// own specification with the fixed part unchanged.
pub fn random_structure_candidates(spec: &ModelSpec) -> Vec<ModelSpec> {
    let all = spec.random_groupings();
    let k = all.len();
    let mut masks: Vec<usize> = (0..1usize << k).collect();
    masks.sort_by_key(|m| (m.count_ones(), *m));
    masks
        .into_iter()
        .map(|mask| {
            let subset: Vec<&str> = (0..k)
                .filter(|i| mask & (1 << i) != 0)
                .map(|i| all[i].as_str())
                .collect();
            spec.with_random(&subset)
        })
        .collect()
}

/// Fit `specs` in parallel. Results keep the order of `specs`.
///
/// A candidate that fails to converge is retried once from unit starting
/// values; failures are kept with their error.
pub fn fit_candidates(specs: &[ModelSpec], data: &DataFrame, fitter: &Fitter) -> Vec<Candidate> {
    specs
        .par_iter()
        .map(|spec| {
            let state = match fitter.fit(spec, data) {
                Ok(m) => CandidateState::Fitted(m),
                Err(LmmError::Convergence { .. }) if fitter.options().starting_values.is_none() => {
                    log::warn!("'{}' did not converge; retrying from unit start", spec.formula());
                    let start = vec![1.0; spec.random_groupings().len()];
                    match fitter.fit_from(spec, data, &start) {
                        Ok(m) => CandidateState::Fitted(m),
                        Err(e) => CandidateState::Failed(e),
                    }
                }
                Err(e) => CandidateState::Failed(e),
            };
            if let CandidateState::Failed(e) = &state {
                if e.is_recoverable() {
                    log::warn!("candidate '{}' dropped: {}", spec.formula(), e);
                } else {
                    log::error!("candidate '{}' failed: {}", spec.formula(), e);
                }
            }
            Candidate {
                spec: spec.clone(),
                state,
            }
        })
        .collect()
}

/// Rank the successfully fitted candidates.
///
/// Fails with `Validation` when no candidate could be fitted.
pub fn select_structure(candidates: &[Candidate], criterion: InformationCriterion) -> Result<ComparisonTable> {
    let fitted: Vec<FittedModel> = candidates.iter().filter_map(|c| c.model().cloned()).collect();
    if fitted.is_empty() {
        return Err(LmmError::Validation(
            "no candidate random-effects structure could be fitted".into(),
        ));
    }
    compare(&fitted, criterion)
}

/// Settings for [`analyze`].
#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    pub criterion: InformationCriterion,
    pub fit: FitOptions,
    pub tests: TestOptions,
    /// Factors whose combinations get cell means; empty for none.
    pub cell_factors: Vec<String>,
    pub confidence: f64,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            criterion: InformationCriterion::Aic,
            fit: FitOptions::default(),
            tests: TestOptions::default(),
            cell_factors: Vec::new(),
            confidence: 0.95,
        }
    }
}

impl WorkflowOptions {
    pub fn criterion(mut self, criterion: InformationCriterion) -> Self {
        self.criterion = criterion;
        self
    }

    pub fn fit_options(mut self, fit: FitOptions) -> Self {
        self.fit = fit;
        self
    }

    pub fn test_options(mut self, tests: TestOptions) -> Self {
        self.tests = tests;
        self
    }

    pub fn cell_factors(mut self, factors: &[&str]) -> Self {
        self.cell_factors = factors.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn confidence(mut self, level: f64) -> Self {
        self.confidence = level;
        self
    }
}

/// A candidate that could not be fitted.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateFailure {
    pub formula: String,
    pub error: String,
}

/// Everything [`analyze`] produces.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub comparison: ComparisonTable,
    pub failures: Vec<CandidateFailure>,
    /// The selected structure refitted by full likelihood.
    pub final_model: FittedModel,
    pub tests: Vec<TermTest>,
    pub cell_means: Option<CellMeans>,
}

impl AnalysisReport {
    pub fn summary(&self) -> String {
        let mut s = self.comparison.summary();
        for f in &self.failures {
            s.push_str(&format!("  not fitted: {} ({})\n", f.formula, f.error));
        }
        s.push('\n');
        s.push_str(&self.final_model.summary());
        s.push('\n');
        s.push_str(&crate::diagnostics::format_tests(&self.tests));
        if let Some(cm) = &self.cell_means {
            s.push('\n');
            s.push_str(&cm.summary());
        }
        s
    }
}

/// Run the full workflow for `spec`, whose random groupings define the
/// largest candidate structure.
///
/// Candidates are fitted under `spec`'s criterion and compared. The winner
/// is refitted by full likelihood for the fixed-effect tests; cell means use
/// the winner as fitted.
pub fn analyze(spec: &ModelSpec, data: &DataFrame, options: &WorkflowOptions) -> Result<AnalysisReport> {
    let fitter = Fitter::new(options.fit.clone());
    let specs = random_structure_candidates(spec);
    log::info!("fitting {} candidate random-effects structures", specs.len());

    let candidates = fit_candidates(&specs, data, &fitter);
    let failures: Vec<CandidateFailure> = candidates
        .iter()
        .filter_map(|c| {
            c.error().map(|e| CandidateFailure {
                formula: c.spec.formula(),
                error: e.to_string(),
            })
        })
        .collect();

    let comparison = select_structure(&candidates, options.criterion)?;
    let best = &comparison.best().model;
    log::info!(
        "selected '{}' by {} (weight {:.3})",
        best.spec.formula(),
        options.criterion,
        comparison.best().weight
    );

    let final_model = if best.criterion() == Criterion::Full {
        best.clone()
    } else {
        fitter.fit(&best.spec.with_criterion(Criterion::Full), data)?
    };
    let tests = test_fixed_effects_with(&final_model, &options.tests)?;
    log::info!("tested {} fixed-effect terms", tests.len());

    let cell_means = if options.cell_factors.is_empty() {
        None
    } else {
        let factors: Vec<&str> = options.cell_factors.iter().map(String::as_str).collect();
        Some(cell_means(&best.spec, data, &factors, options.confidence, &fitter)?)
    };

    Ok(AnalysisReport {
        comparison,
        failures,
        final_model,
        tests,
        cell_means,
    })
}
