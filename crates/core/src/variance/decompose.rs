use serde::Serialize;

use crate::data::DataFrame;
use crate::error::{LmmError, Result};

/// Variance estimate at one level of the hierarchy.
#[derive(Debug, Clone, Serialize)]
pub struct LevelVariance {
    /// `"residual"` for the within-group level, otherwise the grouping whose
    /// means vary at this level.
    pub level: String,
    /// Average of the per-group sample variances. `None` when no group had
    /// at least two values.
    pub variance: Option<f64>,
    /// Number of groups that contributed a variance.
    pub n_groups: usize,
}

/// Result of [`decompose`]: residual first, then one entry per level.
#[derive(Debug, Clone, Serialize)]
pub struct VarianceDecomposition {
    pub response: String,
    pub components: Vec<LevelVariance>,
}

impl VarianceDecomposition {
    /// Variance of a named level.
    pub fn get(&self, level: &str) -> Option<f64> {
        self.components
            .iter()
            .find(|c| c.level == level)
            .and_then(|c| c.variance)
    }

    /// Share of the summed (available) variance attributed to each level.
    pub fn proportions(&self) -> Vec<(String, Option<f64>)> {
        let total: f64 = self.components.iter().filter_map(|c| c.variance).sum();
        self.components
            .iter()
            .map(|c| {
                let share = c.variance.filter(|_| total > 0.0).map(|v| v / total);
                (c.level.clone(), share)
            })
            .collect()
    }

    pub fn summary(&self) -> String {
        let mut s = format!("=== Variance decomposition of '{}' ===\n", self.response);
        s.push_str(&format!("{:<20} {:>14} {:>8} {:>8}\n", "Level", "Variance", "Groups", "Share"));
        for (c, (_, share)) in self.components.iter().zip(self.proportions()) {
            let var = c.variance.map_or("NA".to_string(), |v| format!("{:.6}", v));
            let share = share.map_or("NA".to_string(), |p| format!("{:.1}%", 100.0 * p));
            s.push_str(&format!("{:<20} {:>14} {:>8} {:>8}\n", c.level, var, c.n_groups, share));
        }
        s
    }
}

/// Sample variance (n - 1 denominator); `None` below two values.
fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    Some(values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0))
}

/// A value carried up the hierarchy together with one of its source rows,
/// which identifies its parent group at every coarser level.
struct Unit {
    value: f64,
    row: usize,
}

/// Decompose the variance of `response` over `levels`, ordered finest to
/// coarsest.
///
/// Level 0 is the average within-group variance of the finest grouping
/// (residual). Each following entry is the average variance of group means
/// within the next-coarser grouping; the coarsest grouping's means are
/// compared across the whole table. Missing responses are ignored, and groups
/// with fewer than two values are left out of the average.
pub fn decompose(df: &DataFrame, response: &str, levels: &[&str]) -> Result<VarianceDecomposition> {
    if levels.is_empty() {
        return Err(LmmError::Validation(
            "decompose needs at least one grouping level".into(),
        ));
    }
    let y = df.get_float(response)?;
    for name in levels {
        df.require_observed(name)?;
    }
    df.validate_nesting(levels)?;

    let factors = levels
        .iter()
        .map(|name| df.get_factor(name))
        .collect::<Result<Vec<_>>>()?;

    let mut units: Vec<Unit> = y
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .map(|(row, &value)| Unit { value, row })
        .collect();

    let mut components = Vec::with_capacity(levels.len() + 1);

    for step in 0..=levels.len() {
        let (n_keys, codes) = match factors.get(step) {
            Some(f) => (f.n_levels(), Some(f.codes())),
            None => (1, None),
        };

        let mut groups: Vec<Vec<&Unit>> = (0..n_keys).map(|_| Vec::new()).collect();
        for unit in &units {
            let key = codes.map_or(0, |c| c[unit.row]);
            groups[key].push(unit);
        }

        let variances: Vec<f64> = groups
            .iter()
            .filter_map(|g| sample_variance(&g.iter().map(|u| u.value).collect::<Vec<_>>()))
            .collect();

        let variance = if variances.is_empty() {
            None
        } else {
            Some(variances.iter().sum::<f64>() / variances.len() as f64)
        };

        let level = if step == 0 {
            "residual".to_string()
        } else {
            levels[step - 1].to_string()
        };
        log::debug!(
            "decompose '{}': level '{}' from {} of {} groups",
            response,
            level,
            variances.len(),
            groups.iter().filter(|g| !g.is_empty()).count()
        );
        components.push(LevelVariance {
            level,
            variance,
            n_groups: variances.len(),
        });

        let means: Vec<Unit> = groups
            .iter()
            .filter(|g| !g.is_empty())
            .map(|g| Unit {
                value: g.iter().map(|u| u.value).sum::<f64>() / g.len() as f64,
                row: g[0].row,
            })
            .collect();
        drop(groups);
        units = means;
    }

    Ok(VarianceDecomposition {
        response: response.to_string(),
        components,
    })
}

/// Ratio of among-group to within-group variance for a single grouping, used
/// to seed the relative variance parameter of that grouping.
pub fn grouping_variance_ratio(df: &DataFrame, response: &str, grouping: &str) -> Result<Option<f64>> {
    let d = decompose(df, response, &[grouping])?;
    let ratio = match (d.components[1].variance, d.components[0].variance) {
        (Some(among), Some(within)) if within > 0.0 => Some(among / within),
        _ => None,
    };
    Ok(ratio)
}
