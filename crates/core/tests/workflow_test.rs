//! Structure selection and testing on simulated crossed designs.
//!
//! Design: 2x2 fixed factors, 20 individuals (variance 2.0) crossed with
//! 8 batches (variance 1.5), residual variance 1.0, 200 observations.

use approx::assert_relative_eq;
use nestlmm_core::data::DataFrame;
use nestlmm_core::diagnostics::{likelihood_ratio_test, test_fixed_effects};
use nestlmm_core::lmm::{fit, Fitter};
use nestlmm_core::model::ModelSpec;
use nestlmm_core::selection::{compare, InformationCriterion};
use nestlmm_core::simulate::SimulationDesign;
use nestlmm_core::workflow::{
    analyze, fit_candidates, random_structure_candidates, select_structure, WorkflowOptions,
};
use nestlmm_core::{Criterion, LmmError};

fn crossed(seed: u64) -> DataFrame {
    crossed_with(seed, 2.0, 1.5)
}

fn crossed_with(seed: u64, var_individual: f64, var_batch: f64) -> DataFrame {
    SimulationDesign::new(200)
        .fixed_factor("a", &[("a1", 0.0), ("a2", 1.0)])
        .fixed_factor("b", &[("b1", 0.0), ("b2", 0.5)])
        .random("individual", 20, var_individual)
        .random("batch", 8, var_batch)
        .residual_variance(1.0)
        .seed(seed)
        .generate()
        .unwrap()
}

fn full_spec(df: &DataFrame) -> ModelSpec {
    ModelSpec::builder("y")
        .fixed_formula("a*b")
        .random("individual")
        .random("batch")
        .build(df)
        .unwrap()
}

/// How often selection over all four structures picks exactly `expected`.
fn recovered(
    var_individual: f64,
    var_batch: f64,
    criterion: InformationCriterion,
    expected: &[&str],
    replicates: u64,
) -> u64 {
    let fitter = Fitter::default();
    let mut correct = 0;
    for seed in 0..replicates {
        let df = crossed_with(1000 + seed, var_individual, var_batch);
        let specs = random_structure_candidates(&full_spec(&df));
        let candidates = fit_candidates(&specs, &df, &fitter);
        let table = select_structure(&candidates, criterion).unwrap();
        if table.best().model.spec.random_groupings().to_vec() == expected {
            correct += 1;
        }
    }
    correct
}

#[test]
fn test_selection_recovers_generating_structure() {
    let correct = recovered(2.0, 1.5, InformationCriterion::Aic, &["individual", "batch"], 20);
    assert!(correct >= 18, "both groupings chosen in {} of 20 replicates", correct);
}

#[test]
fn test_selection_drops_grouping_without_variance() {
    let correct = recovered(2.0, 0.0, InformationCriterion::Bic, &["individual"], 20);
    assert!(correct >= 17, "individual alone chosen in {} of 20 replicates", correct);
}

#[test]
fn test_selection_without_any_grouping_variance() {
    let correct = recovered(0.0, 0.0, InformationCriterion::Bic, &[], 20);
    assert!(correct >= 17, "no grouping chosen in {} of 20 replicates", correct);
}

#[test]
fn test_variance_components_near_truth() {
    let df = crossed(77);
    let m = fit(&full_spec(&df), &df).unwrap();
    assert_eq!(m.n_groupings(), 2);
    assert!((m.residual_variance - 1.0).abs() < 0.35);
    let individual = m.variance_component("individual").unwrap();
    let batch = m.variance_component("batch").unwrap();
    assert!(individual > 0.5 && individual < 5.0, "individual {}", individual);
    assert!(batch > 0.0 && batch < 8.0, "batch {}", batch);
    assert_eq!(m.random_effects.len(), 2);
    assert_eq!(m.random_effects[1].effects.len(), 8);
}

#[test]
fn test_comparator_weights_and_rejection() {
    let df = crossed(5);
    let spec = full_spec(&df);
    let models: Vec<_> = random_structure_candidates(&spec)
        .iter()
        .map(|s| fit(s, &df).unwrap())
        .collect();
    let table = compare(&models, InformationCriterion::Bic).unwrap();
    assert_eq!(table.len(), 4);
    let total: f64 = table.rows.iter().map(|r| r.weight).sum();
    assert_relative_eq!(total, 1.0, epsilon = 1e-12);
    for (i, row) in table.rows.iter().enumerate() {
        assert_eq!(row.rank, i + 1);
        assert!(row.delta >= 0.0);
    }

    let additive = ModelSpec::builder("y")
        .fixed_formula("a + b")
        .random("individual")
        .build(&df)
        .unwrap();
    let mut mixed = models.clone();
    mixed.push(fit(&additive, &df).unwrap());
    assert!(matches!(
        compare(&mixed, InformationCriterion::Aic),
        Err(LmmError::IncomparableModels(_))
    ));
}

#[test]
fn test_analyze_end_to_end() {
    let df = crossed(9);
    let options = WorkflowOptions::default()
        .criterion(InformationCriterion::Aic)
        .cell_factors(&["a", "b"])
        .confidence(0.9);
    let report = analyze(&full_spec(&df), &df, &options).unwrap();

    assert_eq!(report.final_model.criterion(), Criterion::Full);
    assert_eq!(report.comparison.len() + report.failures.len(), 4);
    let terms: Vec<&str> = report.tests.iter().map(|t| t.term.as_str()).collect();
    assert_eq!(terms, vec!["a", "b", "a:b"]);
    // a has a true effect of 1.0 over 200 observations.
    assert!(report.tests[0].p_value < 0.01);
    for t in &report.tests {
        assert!(t.den_df >= 1.0 && t.den_df <= 196.0);
    }

    let cells = report.cell_means.as_ref().unwrap();
    assert_eq!(cells.cells.len(), 4);
    let a2b2 = cells.get(&["a2", "b2"]).unwrap();
    assert!(a2b2.lower < a2b2.estimate && a2b2.estimate < a2b2.upper);
}

#[test]
fn test_type_two_tests_and_lrt_agree_on_strong_effect() {
    let df = crossed(13);
    let spec = ModelSpec::builder("y")
        .fixed_formula("a + b")
        .random("individual")
        .random("batch")
        .criterion(Criterion::Full)
        .build(&df)
        .unwrap();
    let reduced = ModelSpec::builder("y")
        .fixed_formula("b")
        .random("individual")
        .random("batch")
        .criterion(Criterion::Full)
        .build(&df)
        .unwrap();
    let full_fit = fit(&spec, &df).unwrap();
    let reduced_fit = fit(&reduced, &df).unwrap();

    let tests = test_fixed_effects(&full_fit).unwrap();
    let lrt = likelihood_ratio_test(&reduced_fit, &full_fit).unwrap();
    assert_eq!(lrt.df, 1);
    assert!(tests[0].p_value < 0.01);
    assert!(lrt.p_value < 0.01);
}
