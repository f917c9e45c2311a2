use indexmap::IndexMap;

use super::factor::FactorColumn;
use crate::error::{LmmError, Result};

/// A single column in a [`DataFrame`].
///
/// Missing numeric values are stored as `NaN`.
#[derive(Debug, Clone)]
pub enum Column {
    /// A column of 64-bit floating-point values (`NaN` = missing).
    Float(Vec<f64>),
    /// A categorical column with string levels mapped to integer codes.
    Factor(FactorColumn),
}

impl Column {
    /// Returns the number of elements in the column.
    pub fn len(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::Factor(f) => f.len(),
        }
    }

    /// Returns `true` if the column is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short type name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Column::Float(_) => "Float",
            Column::Factor(_) => "Factor",
        }
    }
}

/// A lightweight columnar table of observations.
///
/// Columns are stored in insertion order using an [`IndexMap`]. All columns
/// must have the same number of rows. The table is never mutated by the
/// modeling code; every stage borrows it immutably.
#[derive(Debug, Clone)]
pub struct DataFrame {
    pub(crate) columns: IndexMap<String, Column>,
    pub(crate) nrows: usize,
}

impl DataFrame {
    /// Create an empty DataFrame with no columns and no rows.
    pub fn new() -> Self {
        DataFrame {
            columns: IndexMap::new(),
            nrows: 0,
        }
    }

    /// Add a floating-point column. Use `f64::NAN` for missing values.
    ///
    /// # Errors
    /// Returns an error if the column length does not match existing rows,
    /// or if a column with the same name already exists.
    pub fn add_float_column(&mut self, name: &str, data: Vec<f64>) -> Result<()> {
        self.insert_column(name, Column::Float(data))
    }

    /// Add a factor (categorical) column from a slice of string values.
    ///
    /// Levels are auto-discovered in order of first appearance.
    pub fn add_factor_column<S: AsRef<str>>(&mut self, name: &str, data: &[S]) -> Result<()> {
        let factor = FactorColumn::new(data);
        self.insert_column(name, Column::Factor(factor))
    }

    /// Retrieve a column by name.
    ///
    /// # Errors
    /// Returns [`LmmError::ColumnNotFound`] if no column with the given name exists.
    pub fn get_column(&self, name: &str) -> Result<&Column> {
        self.columns
            .get(name)
            .ok_or_else(|| LmmError::ColumnNotFound(name.to_string()))
    }

    /// Retrieve a float column's data as a slice.
    pub fn get_float(&self, name: &str) -> Result<&[f64]> {
        match self.get_column(name)? {
            Column::Float(v) => Ok(v.as_slice()),
            other => Err(LmmError::Validation(format!(
                "Column '{}' is a {} column, expected Float",
                name,
                other.kind()
            ))),
        }
    }

    /// Retrieve a factor column reference.
    pub fn get_factor(&self, name: &str) -> Result<&FactorColumn> {
        match self.get_column(name)? {
            Column::Factor(f) => Ok(f),
            other => Err(LmmError::Validation(format!(
                "Column '{}' is a {} column, expected Factor",
                name,
                other.kind()
            ))),
        }
    }

    /// Returns `true` if a column with this name exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Returns the number of rows.
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Returns the number of columns.
    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    /// Returns a vector of column names in insertion order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.keys().map(|s| s.as_str()).collect()
    }

    /// Coerce an existing column to a `Factor` column in-place.
    ///
    /// - If the column is already a `Factor`, this is a no-op.
    /// - If the column is `Float`, every value must be finite and integral
    ///   (identifier columns read from CSV); distinct values become levels
    ///   sorted numerically.
    pub fn as_factor(&mut self, name: &str) -> Result<()> {
        let col = self
            .columns
            .get_mut(name)
            .ok_or_else(|| LmmError::ColumnNotFound(name.to_string()))?;

        let vals = match col {
            Column::Factor(_) => return Ok(()),
            Column::Float(vals) => vals,
        };

        if vals.iter().any(|v| !v.is_finite() || v.fract() != 0.0) {
            return Err(LmmError::Validation(format!(
                "Cannot coerce Float column '{}' to Factor: values must be finite integers",
                name
            )));
        }

        let mut unique: Vec<i64> = vals.iter().map(|&v| v as i64).collect();
        unique.sort_unstable();
        unique.dedup();

        let mut levels = IndexMap::new();
        for (i, val) in unique.iter().enumerate() {
            levels.insert(val.to_string(), i);
        }
        let codes: Vec<usize> = vals
            .iter()
            .map(|&v| levels[&(v as i64).to_string()])
            .collect();

        *col = Column::Factor(FactorColumn::from_parts(levels, codes));
        Ok(())
    }

    /// Validate column length and name uniqueness, then insert.
    pub(crate) fn insert_column(&mut self, name: &str, column: Column) -> Result<()> {
        if self.columns.contains_key(name) {
            return Err(LmmError::Validation(format!(
                "Column '{}' already exists in DataFrame",
                name
            )));
        }

        let col_len = column.len();

        if self.columns.is_empty() {
            self.nrows = col_len;
        } else if col_len != self.nrows {
            return Err(LmmError::DimensionMismatch {
                expected: self.nrows,
                got: col_len,
                context: format!("adding column '{}'", name),
            });
        }

        self.columns.insert(name.to_string(), column);
        Ok(())
    }
}

impl Default for DataFrame {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_df() -> DataFrame {
        let mut df = DataFrame::new();
        df.add_float_column("length", vec![5.2, 3.1, 4.7]).unwrap();
        df.add_float_column("tank", vec![1.0, 2.0, 1.0]).unwrap();
        df.add_factor_column("origin", &["wild", "hatchery", "wild"]).unwrap();
        df
    }

    #[test]
    fn test_add_columns_and_dimensions() {
        let df = sample_df();
        assert_eq!(df.nrows(), 3);
        assert_eq!(df.ncols(), 3);
        assert_eq!(df.column_names(), vec!["length", "tank", "origin"]);
        assert!(df.has_column("tank"));
        assert!(!df.has_column("sex"));
    }

    #[test]
    fn test_get_typed_columns() {
        let df = sample_df();
        assert_eq!(df.get_float("length").unwrap(), &[5.2, 3.1, 4.7]);
        let origin = df.get_factor("origin").unwrap();
        assert_eq!(origin.n_levels(), 2);
        assert_eq!(origin.codes(), &[0, 1, 0]);
    }

    #[test]
    fn test_wrong_type_is_validation_error() {
        let df = sample_df();
        assert!(matches!(df.get_float("origin"), Err(LmmError::Validation(_))));
        assert!(matches!(df.get_factor("length"), Err(LmmError::Validation(_))));
        assert!(matches!(df.get_column("missing"), Err(LmmError::ColumnNotFound(_))));
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut df = DataFrame::new();
        df.add_float_column("a", vec![1.0, 2.0]).unwrap();
        let err = df.add_float_column("b", vec![1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, LmmError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_duplicate_column_name() {
        let mut df = DataFrame::new();
        df.add_float_column("x", vec![1.0]).unwrap();
        assert!(df.add_float_column("x", vec![2.0]).is_err());
    }

    #[test]
    fn test_as_factor_from_integral_floats() {
        let mut df = DataFrame::new();
        df.add_float_column("tank", vec![3.0, 1.0, 2.0, 1.0, 3.0]).unwrap();
        df.as_factor("tank").unwrap();

        let factor = df.get_factor("tank").unwrap();
        assert_eq!(factor.n_levels(), 3);
        assert_eq!(factor.level_name(0), Some("1"));
        assert_eq!(factor.level_name(2), Some("3"));
        assert_eq!(factor.codes(), &[2, 0, 1, 0, 2]);
    }

    #[test]
    fn test_as_factor_rejects_fractional_and_missing() {
        let mut df = sample_df();
        assert!(df.as_factor("length").is_err());

        let mut df = DataFrame::new();
        df.add_float_column("id", vec![1.0, f64::NAN]).unwrap();
        assert!(df.as_factor("id").is_err());
    }

    #[test]
    fn test_as_factor_noop_on_factor() {
        let mut df = sample_df();
        df.as_factor("origin").unwrap();
        assert_eq!(df.get_factor("origin").unwrap().n_levels(), 2);
    }
}
