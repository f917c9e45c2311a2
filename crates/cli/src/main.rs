use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use nestlmm_core as core;
use core::data::DataFrame;
use core::diagnostics::{format_tests, test_fixed_effects_with, DdfMethod, TestOptions};
use core::lmm::{cell_means, FitOptions, Fitter};
use core::model::ModelSpec;
use core::selection::InformationCriterion;
use core::simulate::SimulationDesign;
use core::variance::decompose;
use core::workflow::{analyze, WorkflowOptions};
use core::Criterion;

#[derive(Parser)]
#[command(name = "nestlmm")]
#[command(version)]
#[command(about = "Linear mixed models for nested and crossed designs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split the variance of a response over a nesting hierarchy
    Decompose {
        /// Path to data CSV file
        #[arg(short, long)]
        data: String,

        /// Response variable column name
        #[arg(short, long)]
        response: String,

        /// Grouping columns, finest first (e.g. --level individual --level population)
        #[arg(long = "level", required = true)]
        levels: Vec<String>,

        /// Columns to treat as factors even if they look numeric (repeatable)
        #[arg(long)]
        factor: Vec<String>,

        /// Output format: "text" (default) or "json"
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Fit one mixed model and test its fixed effects
    Fit {
        #[command(flatten)]
        model: ModelArgs,

        /// Fit by full maximum likelihood instead of REML
        #[arg(long)]
        ml: bool,

        /// Denominator df for the tests: "satterthwaite" (default) or "residual"
        #[arg(long, default_value = "satterthwaite")]
        ddf: String,

        /// Factors for cell means with confidence intervals (repeatable)
        #[arg(long)]
        cell: Vec<String>,

        /// Confidence level for cell means
        #[arg(long, default_value = "0.95")]
        confidence: f64,

        /// Output format: "text" (default) or "json"
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Select the random-effects structure, refit by ML and test fixed effects
    Select {
        #[command(flatten)]
        model: ModelArgs,

        /// Information criterion: "aic" (default), "bic" or "aicc"
        #[arg(long, default_value = "aic")]
        criterion: String,

        /// Compare candidates fitted by ML instead of REML
        #[arg(long)]
        ml: bool,

        /// Factors for cell means with confidence intervals (repeatable)
        #[arg(long)]
        cell: Vec<String>,

        /// Confidence level for cell means
        #[arg(long, default_value = "0.95")]
        confidence: f64,

        /// Output format: "text" (default) or "json"
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Write a simulated 2x2 design with two crossed random groupings
    Simulate {
        /// Output CSV path
        #[arg(short, long)]
        output: String,

        /// Number of observations
        #[arg(short, long, default_value = "200")]
        n: usize,

        #[arg(long, default_value = "20")]
        individuals: usize,

        #[arg(long, default_value = "8")]
        batches: usize,

        #[arg(long, default_value = "2.0")]
        var_individual: f64,

        #[arg(long, default_value = "1.5")]
        var_batch: f64,

        #[arg(long, default_value = "1.0")]
        var_residual: f64,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

#[derive(clap::Args)]
struct ModelArgs {
    /// Path to data CSV file
    #[arg(short, long)]
    data: String,

    /// Response variable column name
    #[arg(short, long)]
    response: String,

    /// Fixed effects formula (e.g. "origin * treatment")
    #[arg(short, long, default_value = "1")]
    fixed: String,

    /// Random intercept groupings (repeatable, e.g. --random tank --random batch)
    #[arg(long)]
    random: Vec<String>,

    /// Nested random groupings, finest first (e.g. --nested individual,population).
    /// Strict nesting is checked against the data. Repeatable.
    #[arg(long)]
    nested: Vec<String>,

    /// Columns to treat as factors even if they look numeric (repeatable)
    #[arg(long)]
    factor: Vec<String>,

    /// Maximum number of deviance evaluations
    #[arg(long, default_value = "2000")]
    max_evals: usize,

    /// Relative deviance tolerance
    #[arg(long, default_value = "1e-8")]
    tolerance: f64,
}

impl ModelArgs {
    fn load(&self) -> Result<DataFrame> {
        load_table(&self.data, &self.factor)
    }

    fn spec(&self, df: &DataFrame, criterion: Criterion) -> Result<ModelSpec> {
        let mut builder = ModelSpec::builder(&self.response)
            .fixed_formula(&self.fixed)
            .criterion(criterion);
        for g in &self.random {
            builder = builder.random(g);
        }
        for hierarchy in &self.nested {
            let levels: Vec<&str> = hierarchy
                .split(',')
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect();
            if levels.len() < 2 {
                anyhow::bail!(
                    "--nested needs at least two comma-separated groupings, got '{}'",
                    hierarchy
                );
            }
            builder = builder.nested_random(&levels);
        }
        builder.build(df).context("Invalid model specification")
    }

    fn fit_options(&self) -> FitOptions {
        FitOptions::default()
            .max_evaluations(self.max_evals)
            .tolerance(self.tolerance)
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Decompose {
            data,
            response,
            levels,
            factor,
            format,
        } => cmd_decompose(&data, &response, &levels, &factor, &format),
        Commands::Fit {
            model,
            ml,
            ddf,
            cell,
            confidence,
            format,
        } => cmd_fit(&model, ml, &ddf, &cell, confidence, &format),
        Commands::Select {
            model,
            criterion,
            ml,
            cell,
            confidence,
            format,
        } => cmd_select(&model, &criterion, ml, &cell, confidence, &format),
        Commands::Simulate {
            output,
            n,
            individuals,
            batches,
            var_individual,
            var_batch,
            var_residual,
            seed,
        } => {
            let df = SimulationDesign::new(n)
                .fixed_factor("a", &[("a1", 0.0), ("a2", 1.0)])
                .fixed_factor("b", &[("b1", 0.0), ("b2", 0.5)])
                .random("individual", individuals, var_individual)
                .random("batch", batches, var_batch)
                .residual_variance(var_residual)
                .seed(seed)
                .generate()
                .context("Simulation failed")?;
            let file = std::fs::File::create(&output)
                .with_context(|| format!("Cannot create '{}'", output))?;
            df.write_csv(file)
                .with_context(|| format!("Failed to write '{}'", output))?;
            eprintln!("Wrote {} simulated observations to '{}'", n, output);
            Ok(())
        }
    }
}

fn criterion(ml: bool) -> Criterion {
    if ml {
        Criterion::Full
    } else {
        Criterion::Restricted
    }
}

fn load_table(path: &str, factors: &[String]) -> Result<DataFrame> {
    let mut df = DataFrame::from_csv(path)
        .with_context(|| format!("Failed to load data from '{}'", path))?;
    for name in factors {
        df.as_factor(name)
            .with_context(|| format!("Cannot treat '{}' as a factor", name))?;
    }
    eprintln!(
        "Loaded {} observations, {} columns from '{}'",
        df.nrows(),
        df.ncols(),
        path
    );
    Ok(df)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_decompose(
    data_path: &str,
    response: &str,
    levels: &[String],
    factors: &[String],
    output_format: &str,
) -> Result<()> {
    let df = load_table(data_path, factors)?;
    let levels: Vec<&str> = levels.iter().map(String::as_str).collect();
    let result = decompose(&df, response, &levels).context("Variance decomposition failed")?;

    match output_format.to_lowercase().as_str() {
        "json" => print_json(&result)?,
        _ => println!("{}", result.summary()),
    }
    Ok(())
}

fn cmd_fit(
    args: &ModelArgs,
    ml: bool,
    ddf: &str,
    cells: &[String],
    confidence: f64,
    output_format: &str,
) -> Result<()> {
    let df = args.load()?;
    let spec = args.spec(&df, criterion(ml))?;
    let ddf = match ddf.to_lowercase().as_str() {
        "satterthwaite" | "satt" => DdfMethod::Satterthwaite,
        "residual" => DdfMethod::Residual,
        other => anyhow::bail!(
            "Unknown ddf method '{}'. Use 'satterthwaite' (default) or 'residual'.",
            other
        ),
    };

    eprintln!("Fitting {}", spec.formula());
    log::debug!("fit options: {:?}", args.fit_options());
    let fitter = Fitter::new(args.fit_options());
    let model = fitter.fit(&spec, &df).context("Model fitting failed")?;
    let tests = test_fixed_effects_with(&model, &TestOptions::default().ddf(ddf))
        .context("Fixed-effect tests failed")?;
    let means = if cells.is_empty() {
        None
    } else {
        let factors: Vec<&str> = cells.iter().map(String::as_str).collect();
        Some(
            cell_means(&spec, &df, &factors, confidence, &fitter)
                .context("Cell means failed")?,
        )
    };

    match output_format.to_lowercase().as_str() {
        "json" => print_json(&serde_json::json!({
            "model": model,
            "tests": tests,
            "cell_means": means,
        }))?,
        _ => {
            println!("{}", model.summary());
            println!("{}", format_tests(&tests));
            if let Some(m) = &means {
                println!("{}", m.summary());
            }
        }
    }
    Ok(())
}

fn cmd_select(
    args: &ModelArgs,
    ic: &str,
    ml: bool,
    cells: &[String],
    confidence: f64,
    output_format: &str,
) -> Result<()> {
    let df = args.load()?;
    let spec = args.spec(&df, criterion(ml))?;
    let ic: InformationCriterion = ic.parse().context("Invalid --criterion")?;
    let factors: Vec<&str> = cells.iter().map(String::as_str).collect();
    let options = WorkflowOptions::default()
        .criterion(ic)
        .fit_options(args.fit_options())
        .cell_factors(&factors)
        .confidence(confidence);

    let report = analyze(&spec, &df, &options).context("Model selection failed")?;

    match output_format.to_lowercase().as_str() {
        "json" => print_json(&report)?,
        _ => println!("{}", report.summary()),
    }
    Ok(())
}
