//! Synthetic data with known variance components.
//!
//! Fixed factors are fully crossed and balanced. Crossed random groupings
//! assign levels in shuffled balanced order; nested groupings draw their
//! levels within each level of a parent grouping, with globally unique
//! identifiers.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::data::DataFrame;
use crate::error::{LmmError, Result};

#[derive(Debug, Clone)]
struct FixedFactor {
    name: String,
    levels: Vec<String>,
    effects: Vec<f64>,
}

#[derive(Debug, Clone)]
struct RandomFactor {
    name: String,
    /// Levels in total for crossed groupings, per parent level for nested ones.
    n_levels: usize,
    variance: f64,
    parent: Option<String>,
}

/// Builder for a simulated table.
///
/// ```
/// use nestlmm_core::simulate::SimulationDesign;
///
/// let df = SimulationDesign::new(120)
///     .fixed_factor("origin", &[("wild", 0.0), ("hatchery", 1.5)])
///     .random("tank", 12, 2.0)
///     .seed(7)
///     .generate()
///     .unwrap();
/// assert_eq!(df.nrows(), 120);
/// ```
#[derive(Debug, Clone)]
pub struct SimulationDesign {
    n_obs: usize,
    response: String,
    intercept: f64,
    residual_variance: f64,
    fixed: Vec<FixedFactor>,
    interactions: Vec<(String, String, f64)>,
    random: Vec<RandomFactor>,
    seed: u64,
}

impl SimulationDesign {
    pub fn new(n_obs: usize) -> Self {
        Self {
            n_obs,
            response: "y".to_string(),
            intercept: 10.0,
            residual_variance: 1.0,
            fixed: Vec::new(),
            interactions: Vec::new(),
            random: Vec::new(),
            seed: 42,
        }
    }

    pub fn response(mut self, name: &str) -> Self {
        self.response = name.to_string();
        self
    }

    pub fn intercept(mut self, value: f64) -> Self {
        self.intercept = value;
        self
    }

    pub fn residual_variance(mut self, variance: f64) -> Self {
        self.residual_variance = variance;
        self
    }

    /// A fixed factor with an additive effect per level.
    pub fn fixed_factor(mut self, name: &str, levels: &[(&str, f64)]) -> Self {
        self.fixed.push(FixedFactor {
            name: name.to_string(),
            levels: levels.iter().map(|(l, _)| l.to_string()).collect(),
            effects: levels.iter().map(|(_, e)| *e).collect(),
        });
        self
    }

    /// Extra effect added where both factors sit at their last level.
    pub fn interaction(mut self, a: &str, b: &str, effect: f64) -> Self {
        self.interactions.push((a.to_string(), b.to_string(), effect));
        self
    }

    /// A random grouping crossed with everything declared before it.
    pub fn random(mut self, name: &str, n_levels: usize, variance: f64) -> Self {
        self.random.push(RandomFactor {
            name: name.to_string(),
            n_levels,
            variance,
            parent: None,
        });
        self
    }

    /// A random grouping with `per_parent` levels inside each level of
    /// `parent`, which must already be declared.
    pub fn nested(mut self, name: &str, per_parent: usize, parent: &str, variance: f64) -> Self {
        self.random.push(RandomFactor {
            name: name.to_string(),
            n_levels: per_parent,
            variance,
            parent: Some(parent.to_string()),
        });
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.n_obs == 0 {
            return Err(LmmError::Validation("simulation needs at least one observation".into()));
        }
        if !(self.residual_variance >= 0.0) {
            return Err(LmmError::Validation(format!(
                "residual variance must be non-negative, got {}",
                self.residual_variance
            )));
        }
        for f in &self.fixed {
            if f.levels.is_empty() {
                return Err(LmmError::Validation(format!("fixed factor '{}' has no levels", f.name)));
            }
        }
        for (a, b, _) in &self.interactions {
            for name in [a, b] {
                if !self.fixed.iter().any(|f| &f.name == name) {
                    return Err(LmmError::Validation(format!(
                        "interaction refers to undeclared factor '{}'",
                        name
                    )));
                }
            }
        }
        for (i, r) in self.random.iter().enumerate() {
            if r.n_levels == 0 || !(r.variance >= 0.0) {
                return Err(LmmError::Validation(format!(
                    "random grouping '{}' needs at least one level and a non-negative variance",
                    r.name
                )));
            }
            if let Some(parent) = &r.parent {
                if !self.random[..i].iter().any(|p| &p.name == parent) {
                    return Err(LmmError::Validation(format!(
                        "'{}' is nested in undeclared grouping '{}'",
                        r.name, parent
                    )));
                }
            }
        }
        Ok(())
    }

    /// Draw the table: one column per fixed factor and grouping, plus the
    /// response.
    pub fn generate(&self) -> Result<DataFrame> {
        self.validate()?;
        let n = self.n_obs;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut y = vec![self.intercept; n];
        let mut df = DataFrame::new();

        let mut fixed_codes: Vec<Vec<usize>> = Vec::with_capacity(self.fixed.len());
        let mut stride = 1;
        for f in &self.fixed {
            let codes: Vec<usize> = (0..n).map(|i| (i / stride) % f.levels.len()).collect();
            stride *= f.levels.len();
            for (yi, &c) in y.iter_mut().zip(&codes) {
                *yi += f.effects[c];
            }
            let labels: Vec<&str> = codes.iter().map(|&c| f.levels[c].as_str()).collect();
            df.add_factor_column(&f.name, &labels)?;
            fixed_codes.push(codes);
        }
        for (a, b, effect) in &self.interactions {
            let ia = self.fixed.iter().position(|f| &f.name == a).unwrap_or(0);
            let ib = self.fixed.iter().position(|f| &f.name == b).unwrap_or(0);
            let (last_a, last_b) = (self.fixed[ia].levels.len() - 1, self.fixed[ib].levels.len() - 1);
            for i in 0..n {
                if fixed_codes[ia][i] == last_a && fixed_codes[ib][i] == last_b {
                    y[i] += effect;
                }
            }
        }

        let mut random_codes: Vec<Vec<usize>> = Vec::with_capacity(self.random.len());
        for r in &self.random {
            let codes: Vec<usize> = match &r.parent {
                None => {
                    let mut codes: Vec<usize> = (0..n).map(|i| i % r.n_levels).collect();
                    codes.shuffle(&mut rng);
                    codes
                }
                Some(parent) => {
                    let pi = self.random.iter().position(|p| &p.name == parent).unwrap_or(0);
                    random_codes[pi]
                        .iter()
                        .map(|&pc| pc * r.n_levels + rng.gen_range(0..r.n_levels))
                        .collect()
                }
            };
            let total = codes.iter().copied().max().map_or(0, |m| m + 1);
            let dist = Normal::new(0.0, r.variance.sqrt())
                .map_err(|e| LmmError::Validation(format!("grouping '{}': {}", r.name, e)))?;
            let effects: Vec<f64> = (0..total).map(|_| dist.sample(&mut rng)).collect();
            for (yi, &c) in y.iter_mut().zip(&codes) {
                *yi += effects[c];
            }
            let labels: Vec<String> = codes.iter().map(|c| format!("{}{}", r.name, c + 1)).collect();
            df.add_factor_column(&r.name, &labels)?;
            random_codes.push(codes);
        }

        let noise = Normal::new(0.0, self.residual_variance.sqrt())
            .map_err(|e| LmmError::Validation(format!("residual: {}", e)))?;
        for yi in y.iter_mut() {
            *yi += noise.sample(&mut rng);
        }
        df.add_float_column(&self.response, y)?;

        log::debug!(
            "simulated {} rows with {} fixed factors and {} groupings (seed {})",
            n,
            self.fixed.len(),
            self.random.len(),
            self.seed
        );
        Ok(df)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_shape_and_columns() {
        let df = SimulationDesign::new(40)
            .fixed_factor("a", &[("a1", 0.0), ("a2", 1.0)])
            .fixed_factor("b", &[("b1", 0.0), ("b2", -1.0)])
            .random("batch", 5, 1.0)
            .generate()
            .unwrap();
        assert_eq!(df.nrows(), 40);
        assert_eq!(df.column_names(), vec!["a", "b", "batch", "y"]);
        assert_eq!(df.get_factor("batch").unwrap().n_levels(), 5);
        let a = df.get_factor("a").unwrap();
        let b = df.get_factor("b").unwrap();
        let both = (0..40).filter(|&i| a.label(i) == "a2" && b.label(i) == "b2").count();
        assert_eq!(both, 10);
    }

    #[test]
    fn test_same_seed_same_data() {
        let design = SimulationDesign::new(30).random("g", 6, 2.0).seed(11);
        let a = design.generate().unwrap();
        let b = design.generate().unwrap();
        assert_eq!(a.get_float("y").unwrap(), b.get_float("y").unwrap());
        let c = design.clone().seed(12).generate().unwrap();
        assert_ne!(a.get_float("y").unwrap(), c.get_float("y").unwrap());
    }

    #[test]
    fn test_nested_levels_are_strict() {
        let df = SimulationDesign::new(200)
            .random("population", 4, 1.0)
            .nested("individual", 5, "population", 0.5)
            .generate()
            .unwrap();
        df.validate_nesting(&["individual", "population"]).unwrap();
        assert!(df.get_factor("individual").unwrap().n_levels() <= 20);
    }

    #[test]
    fn test_zero_variances_give_constant_response() {
        let df = SimulationDesign::new(10)
            .intercept(3.5)
            .residual_variance(0.0)
            .random("g", 2, 0.0)
            .generate()
            .unwrap();
        for &v in df.get_float("y").unwrap() {
            assert_relative_eq!(v, 3.5);
        }
    }

    #[test]
    fn test_invalid_designs() {
        assert!(SimulationDesign::new(0).generate().is_err());
        assert!(SimulationDesign::new(10).random("g", 0, 1.0).generate().is_err());
        assert!(SimulationDesign::new(10)
            .nested("child", 2, "missing", 1.0)
            .generate()
            .is_err());
        assert!(SimulationDesign::new(10).residual_variance(-1.0).generate().is_err());
        assert!(SimulationDesign::new(10).interaction("a", "b", 1.0).generate().is_err());
    }
}
