use std::path::Path;

use crate::error::{LmmError, Result};

use super::dataframe::{Column, DataFrame};
use super::factor::FactorColumn;

/// Cell contents read as a missing value.
const MISSING_TOKENS: [&str; 4] = ["", "NA", "NaN", "."];

fn is_missing(field: &str) -> bool {
    MISSING_TOKENS.contains(&field)
}

impl DataFrame {
    /// Read a CSV file into a DataFrame.
    ///
    /// The first row is a header. A column becomes `Float` when every
    /// non-missing cell parses as `f64` (missing cells: empty, `NA`, `NaN`,
    /// `.` are stored as `NaN`); otherwise it becomes a `Factor`. Identifier
    /// columns that happen to be numeric can be converted afterwards with
    /// [`DataFrame::as_factor`]. Missing cells of a `Factor` keep their token
    /// as a label and are rejected by [`DataFrame::require_observed`] when the
    /// column is used for modeling.
    ///
    /// # Examples
    /// ```no_run
    /// use nestlmm_core::data::DataFrame;
    ///
    /// let df = DataFrame::from_csv("growth.csv").unwrap();
    /// println!("rows = {}, cols = {}", df.nrows(), df.ncols());
    /// ```
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .trim(csv::Trim::All)
            .from_path(path.as_ref())?;
        Self::from_csv_reader(reader)
    }

    /// Read CSV from any reader (used by tests and by `from_csv`).
    pub fn from_csv_reader<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Self> {
        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
        let ncols = headers.len();
        let mut string_columns: Vec<Vec<String>> = vec![Vec::new(); ncols];

        for result in reader.records() {
            let record = result?;
            if record.len() != ncols {
                return Err(LmmError::Validation(format!(
                    "Row has {} fields but header has {} columns",
                    record.len(),
                    ncols
                )));
            }
            for (i, field) in record.iter().enumerate() {
                string_columns[i].push(field.to_string());
            }
        }

        let mut df = DataFrame::new();
        if string_columns.first().map_or(true, |c| c.is_empty()) {
            return Ok(df);
        }

        for (header, raw) in headers.iter().zip(string_columns) {
            let parsed: std::result::Result<Vec<f64>, _> = raw
                .iter()
                .map(|s| {
                    if is_missing(s) {
                        Ok(f64::NAN)
                    } else {
                        s.parse::<f64>()
                    }
                })
                .collect();

            let all_missing = raw.iter().all(|s| is_missing(s));
            match parsed {
                Ok(values) if !all_missing => df.add_float_column(header, values)?,
                _ => df.insert_column(header, Column::Factor(FactorColumn::new(&raw)))?,
            }
        }

        Ok(df)
    }

    /// Fails with `Validation` if the factor column `name` has a missing
    /// cell. Float columns pass; their `NaN` rows are dropped when fitting.
    pub fn require_observed(&self, name: &str) -> Result<()> {
        if let Column::Factor(factor) = self.get_column(name)? {
            if let Some(row) = (0..factor.len()).find(|&r| is_missing(factor.label(r))) {
                return Err(LmmError::Validation(format!(
                    "factor column '{}' has a missing value at row {} ('{}'); \
                     remove incomplete rows first",
                    name,
                    row,
                    factor.label(row)
                )));
            }
        }
        Ok(())
    }

    /// Write the table as CSV. Missing floats are written as `NA`.
    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(self.columns.keys())?;
        for row in 0..self.nrows {
            let record: Vec<String> = self
                .columns
                .values()
                .map(|col| match col {
                    Column::Float(v) if v[row].is_nan() => "NA".to_string(),
                    Column::Float(v) => v[row].to_string(),
                    Column::Factor(f) => f.label(row).to_string(),
                })
                .collect();
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(content: &str) -> DataFrame {
        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());
        DataFrame::from_csv_reader(reader).unwrap()
    }

    #[test]
    fn test_from_csv_type_detection() {
        let df = read("population,individual,length\nP1,1,5.2\nP2,2,3.1\nP1,3,4.7\n");
        assert_eq!(df.nrows(), 3);
        assert_eq!(df.get_factor("population").unwrap().n_levels(), 2);
        assert_eq!(df.get_float("individual").unwrap(), &[1.0, 2.0, 3.0]);
        assert_eq!(df.get_float("length").unwrap(), &[5.2, 3.1, 4.7]);
    }

    #[test]
    fn test_missing_numeric_cells() {
        let df = read("id,value\n1,10.5\n2,NA\n3,\n4,7.3\n");
        let value = df.get_float("value").unwrap();
        assert_eq!(value[0], 10.5);
        assert!(value[1].is_nan());
        assert!(value[2].is_nan());
        assert_eq!(value[3], 7.3);
    }

    #[test]
    fn test_missing_factor_cells_are_rejected() {
        let df = read("pond,fish,y\nA,f1,1.0\nA,,2.0\nB,NA,3.0\nB,f4,4.0\n");
        assert_eq!(df.get_factor("fish").unwrap().label(1), "");
        let err = df.require_observed("fish").unwrap_err();
        assert!(matches!(err, LmmError::Validation(ref m) if m.contains("row 1")));
        assert!(df.require_observed("pond").is_ok());
        assert!(df.require_observed("y").is_ok());
        assert!(df.require_observed("missing").is_err());
    }

    #[test]
    fn test_header_only() {
        let df = read("a,b,c\n");
        assert_eq!(df.nrows(), 0);
        assert_eq!(df.ncols(), 0);
    }

    #[test]
    fn test_whitespace_trimmed() {
        let df = read("name , score\n  Alice , 95 \n  Bob , 88 \n");
        assert_eq!(df.column_names(), vec!["name", "score"]);
        assert_eq!(df.get_float("score").unwrap(), &[95.0, 88.0]);
    }

    #[test]
    fn test_file_not_found() {
        assert!(DataFrame::from_csv("/nonexistent/path/data.csv").is_err());
    }

    #[test]
    fn test_write_then_read_preserves_missing() {
        let mut df = DataFrame::new();
        df.add_factor_column("g", &["a", "b"]).unwrap();
        df.add_float_column("y", vec![1.5, f64::NAN]).unwrap();

        let mut buf = Vec::new();
        df.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "g,y\na,1.5\nb,NA\n");

        let back = read(&text);
        assert!(back.get_float("y").unwrap()[1].is_nan());
    }
}
