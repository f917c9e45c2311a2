use crate::error::{LmmError, Result};

use super::dataframe::DataFrame;

/// Check that `levels` (ordered finest to coarsest) form a strict hierarchy:
/// every identifier at a finer level maps to exactly one identifier at each
/// coarser level.
///
/// Checking adjacent pairs is sufficient, since mapping is transitive.
pub fn validate_nesting(df: &DataFrame, levels: &[&str]) -> Result<()> {
    for name in levels {
        df.get_factor(name)?;
    }

    for pair in levels.windows(2) {
        let (fine_name, coarse_name) = (pair[0], pair[1]);
        let fine = df.get_factor(fine_name)?;
        let coarse = df.get_factor(coarse_name)?;

        let mut parent: Vec<Option<usize>> = vec![None; fine.n_levels()];
        for (row, (&f, &c)) in fine.codes().iter().zip(coarse.codes()).enumerate() {
            match parent[f] {
                None => parent[f] = Some(c),
                Some(p) if p != c => {
                    return Err(LmmError::Validation(format!(
                        "'{}' level '{}' appears in both '{}' and '{}' of '{}' (row {}); \
                         grouping is not strictly nested",
                        fine_name,
                        fine.label(row),
                        coarse.level_name(p).unwrap_or(""),
                        coarse.label(row),
                        coarse_name,
                        row
                    )));
                }
                Some(_) => {}
            }
        }
    }

    Ok(())
}

impl DataFrame {
    /// See [`validate_nesting`].
    pub fn validate_nesting(&self, levels: &[&str]) -> Result<()> {
        validate_nesting(self, levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy() -> DataFrame {
        let mut df = DataFrame::new();
        df.add_factor_column("individual", &["i1", "i1", "i2", "i3", "i3", "i4"])
            .unwrap();
        df.add_factor_column("population", &["A", "A", "A", "B", "B", "B"])
            .unwrap();
        df.add_float_column("y", vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        df
    }

    #[test]
    fn test_strict_nesting_ok() {
        let df = hierarchy();
        df.validate_nesting(&["individual", "population"]).unwrap();
    }

    #[test]
    fn test_reused_identifier_rejected() {
        let mut df = DataFrame::new();
        df.add_factor_column("individual", &["1", "2", "1", "2"]).unwrap();
        df.add_factor_column("population", &["A", "A", "B", "B"]).unwrap();
        let err = df.validate_nesting(&["individual", "population"]).unwrap_err();
        assert!(matches!(err, LmmError::Validation(_)));
        assert!(err.to_string().contains("not strictly nested"));
    }

    #[test]
    fn test_float_level_rejected() {
        let df = hierarchy();
        assert!(df.validate_nesting(&["y", "population"]).is_err());
    }

    #[test]
    fn test_single_level_only_checks_type() {
        let df = hierarchy();
        df.validate_nesting(&["population"]).unwrap();
        assert!(matches!(
            df.validate_nesting(&["tank"]),
            Err(LmmError::ColumnNotFound(_))
        ));
    }
}
