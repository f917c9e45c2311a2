use std::ops::Range;

use serde::Serialize;

use crate::data::{Column, DataFrame};
use crate::error::{LmmError, Result};
use crate::matrix::TripletBuilder;
use crate::types::{DenseVector, SparseMat};

use super::spec::ModelSpec;
use super::term::FixedTerm;

/// Columns of the fixed-effects design that belong to one term.
#[derive(Debug, Clone, Serialize)]
pub struct TermColumns {
    pub term: FixedTerm,
    pub columns: Range<usize>,
}

/// Incidence matrix of one random grouping over the retained rows.
#[derive(Debug, Clone)]
pub struct GroupingDesign {
    pub name: String,
    /// n_obs x n_levels, one unit entry per row.
    pub z: SparseMat,
    /// Levels present in the retained rows, in column order.
    pub levels: Vec<String>,
}

/// Everything the fitter needs from a table once a specification is applied.
#[derive(Debug, Clone)]
pub struct ModelFrame {
    /// Indices of the table rows that entered the fit.
    pub rows: Vec<usize>,
    pub y: DenseVector,
    pub x: SparseMat,
    pub coef_names: Vec<String>,
    /// Empty for the intercept; one entry per fixed term otherwise.
    pub term_columns: Vec<TermColumns>,
    pub groupings: Vec<GroupingDesign>,
}

impl ModelFrame {
    pub fn n_obs(&self) -> usize {
        self.y.len()
    }

    pub fn n_fixed(&self) -> usize {
        self.x.cols()
    }

    /// Replace the fixed part by a no-intercept indicator coding of the
    /// observed combinations of `factors` (one column per cell).
    ///
    /// Returns the level labels of each cell, in column order.
    pub fn with_cell_design(&self, df: &DataFrame, factors: &[&str]) -> Result<(ModelFrame, Vec<Vec<String>>)> {
        if factors.is_empty() {
            return Err(LmmError::Validation("cell means need at least one factor".into()));
        }
        let columns = factors
            .iter()
            .map(|f| df.get_factor(f))
            .collect::<Result<Vec<_>>>()?;

        let mut cells: indexmap::IndexMap<Vec<usize>, usize> = indexmap::IndexMap::new();
        let mut row_cell = Vec::with_capacity(self.rows.len());
        for &row in &self.rows {
            let key: Vec<usize> = columns.iter().map(|c| c.codes()[row]).collect();
            let next = cells.len();
            row_cell.push(*cells.entry(key).or_insert(next));
        }
        cells.sort_keys();

        let mut order = vec![0usize; cells.len()];
        for (col, (_, &first_seen)) in cells.iter().enumerate() {
            order[first_seen] = col;
        }

        let mut builder = TripletBuilder::new(self.rows.len(), cells.len());
        for (i, &c) in row_cell.iter().enumerate() {
            builder.add(i, order[c], 1.0);
        }

        let labels: Vec<Vec<String>> = cells
            .keys()
            .map(|key| {
                key.iter()
                    .zip(&columns)
                    .map(|(&code, col)| col.level_name(code).unwrap_or("").to_string())
                    .collect()
            })
            .collect();
        let coef_names = labels
            .iter()
            .map(|l| {
                factors
                    .iter()
                    .zip(l)
                    .map(|(f, lvl)| format!("{}[{}]", f, lvl))
                    .collect::<Vec<_>>()
                    .join(":")
            })
            .collect();

        let frame = ModelFrame {
            rows: self.rows.clone(),
            y: self.y.clone(),
            x: builder.to_csc(),
            coef_names,
            term_columns: vec![TermColumns {
                term: FixedTerm::interaction(factors),
                columns: 0..cells.len(),
            }],
            groupings: self.groupings.clone(),
        };
        Ok((frame, labels))
    }
}

/// Coded columns of a single variable, restricted to the retained rows.
struct CodedVariable {
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
}

fn code_variable(df: &DataFrame, var: &str, rows: &[usize], full_rank_coding: bool) -> Result<CodedVariable> {
    match df.get_column(var)? {
        Column::Float(values) => Ok(CodedVariable {
            names: vec![var.to_string()],
            columns: vec![rows.iter().map(|&r| values[r]).collect()],
        }),
        Column::Factor(factor) => {
            let mut present = vec![false; factor.n_levels()];
            for &r in rows {
                present[factor.codes()[r]] = true;
            }
            let skip = usize::from(!full_rank_coding);
            let coded: Vec<usize> = (0..factor.n_levels())
                .filter(|&l| present[l])
                .skip(skip)
                .collect();
            let names = coded
                .iter()
                .map(|&l| format!("{}[{}]", var, factor.level_name(l).unwrap_or("")))
                .collect();
            let columns = coded
                .iter()
                .map(|&l| {
                    rows.iter()
                        .map(|&r| if factor.codes()[r] == l { 1.0 } else { 0.0 })
                        .collect()
                })
                .collect();
            Ok(CodedVariable { names, columns })
        }
    }
}

/// Rows whose response and float covariates are all observed.
fn complete_rows(df: &DataFrame, spec: &ModelSpec) -> Result<Vec<usize>> {
    let y = df.get_float(spec.response())?;
    let mut floats: Vec<&[f64]> = vec![y];
    for term in spec.fixed_terms() {
        for var in term.vars() {
            if let Column::Float(values) = df.get_column(var)? {
                floats.push(values);
            }
        }
    }
    let rows: Vec<usize> = (0..df.nrows())
        .filter(|&r| floats.iter().all(|col| col[r].is_finite()))
        .collect();
    if rows.len() < df.nrows() {
        log::debug!(
            "dropped {} of {} rows with missing values for '{}'",
            df.nrows() - rows.len(),
            df.nrows(),
            spec.formula()
        );
    }
    Ok(rows)
}

/// Build response, fixed design and random incidence matrices for `spec`.
///
/// Factors use treatment coding with the first level present in the retained
/// rows as reference. Without an intercept the first factor main effect keeps
/// all its levels. Interaction columns are products of the members' coded
/// columns.
pub fn build_model_frame(df: &DataFrame, spec: &ModelSpec) -> Result<ModelFrame> {
    let rows = complete_rows(df, spec)?;
    let n = rows.len();
    if n == 0 {
        return Err(LmmError::Validation(format!(
            "no complete observations for '{}'",
            spec.formula()
        )));
    }

    let y_all = df.get_float(spec.response())?;
    let y = DenseVector::from_iterator(n, rows.iter().map(|&r| y_all[r]));

    let mut names: Vec<String> = Vec::new();
    let mut columns: Vec<Vec<f64>> = Vec::new();
    let mut term_columns = Vec::with_capacity(spec.fixed_terms().len());

    if spec.has_intercept() {
        names.push("(Intercept)".to_string());
        columns.push(vec![1.0; n]);
    }

    let mut full_coding_used = spec.has_intercept();
    for term in spec.fixed_terms() {
        let full = !full_coding_used
            && term.order() == 1
            && matches!(df.get_column(&term.vars()[0])?, Column::Factor(_));
        full_coding_used |= full;

        let mut term_names = vec![String::new()];
        let mut term_cols = vec![vec![1.0; n]];
        for var in term.vars() {
            let coded = code_variable(df, var, &rows, full)?;
            let mut next_names = Vec::with_capacity(term_names.len() * coded.names.len());
            let mut next_cols = Vec::with_capacity(next_names.capacity());
            for (prefix, base) in term_names.iter().zip(&term_cols) {
                for (name, col) in coded.names.iter().zip(&coded.columns) {
                    next_names.push(if prefix.is_empty() {
                        name.clone()
                    } else {
                        format!("{}:{}", prefix, name)
                    });
                    next_cols.push(base.iter().zip(col).map(|(a, b)| a * b).collect());
                }
            }
            term_names = next_names;
            term_cols = next_cols;
        }

        let start = columns.len();
        names.extend(term_names);
        columns.extend(term_cols);
        term_columns.push(TermColumns {
            term: term.clone(),
            columns: start..columns.len(),
        });
    }

    if columns.is_empty() {
        return Err(LmmError::Validation(format!(
            "'{}' has no fixed-effect columns",
            spec.formula()
        )));
    }

    let mut xb = TripletBuilder::new(n, columns.len());
    for (j, col) in columns.iter().enumerate() {
        for (i, &v) in col.iter().enumerate() {
            if v != 0.0 {
                xb.add(i, j, v);
            }
        }
    }

    let groupings = spec
        .random_groupings()
        .iter()
        .map(|g| build_random_design(df, g, &rows))
        .collect::<Result<Vec<_>>>()?;

    Ok(ModelFrame {
        rows,
        y,
        x: xb.to_csc(),
        coef_names: names,
        term_columns,
        groupings,
    })
}

/// Incidence matrix of `column` over `rows`, using only the levels present.
pub fn build_random_design(df: &DataFrame, column: &str, rows: &[usize]) -> Result<GroupingDesign> {
    let factor = df.get_factor(column)?;

    let mut index: Vec<Option<usize>> = vec![None; factor.n_levels()];
    let mut levels = Vec::new();
    for &r in rows {
        let code = factor.codes()[r];
        if index[code].is_none() {
            index[code] = Some(0);
        }
    }
    for (code, slot) in index.iter_mut().enumerate() {
        if slot.is_some() {
            *slot = Some(levels.len());
            levels.push(factor.level_name(code).unwrap_or("").to_string());
        }
    }

    let mut builder = TripletBuilder::new(rows.len(), levels.len());
    for (i, &r) in rows.iter().enumerate() {
        if let Some(col) = index[factor.codes()[r]] {
            builder.add(i, col, 1.0);
        }
    }

    Ok(GroupingDesign {
        name: column.to_string(),
        z: builder.to_csc(),
        levels,
    })
}

/// Horizontal concatenation `[Z_1 | Z_2 | ...]`.
pub fn combined_random_design(groupings: &[GroupingDesign], n: usize) -> SparseMat {
    let total: usize = groupings.iter().map(|g| g.z.cols()).sum();
    let mut builder = TripletBuilder::new(n, total);
    let mut offset = 0;
    for g in groupings {
        for (val, (row, col)) in g.z.iter() {
            builder.add(row, offset + col, *val);
        }
        offset += g.z.cols();
    }
    builder.to_csc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::sparse::spmv;

    fn sample_df() -> DataFrame {
        let mut df = DataFrame::new();
        df.add_float_column("y", vec![5.0, 3.0, 7.0, 4.0, f64::NAN, 6.0]).unwrap();
        df.add_float_column("age", vec![1.0, 2.0, 3.0, 4.0, 5.0, f64::NAN]).unwrap();
        df.add_factor_column("origin", &["w", "w", "h", "h", "w", "h"]).unwrap();
        df.add_factor_column("treat", &["c", "t", "c", "t", "c", "t"]).unwrap();
        df.add_factor_column("tank", &["t1", "t1", "t2", "t2", "t3", "t3"]).unwrap();
        df
    }

    #[test]
    fn test_treatment_coding_with_intercept() {
        let df = sample_df();
        let spec = ModelSpec::builder("y").fixed_formula("origin").build(&df).unwrap();
        let frame = build_model_frame(&df, &spec).unwrap();
        assert_eq!(frame.n_obs(), 5);
        assert_eq!(frame.coef_names, vec!["(Intercept)", "origin[h]"]);
        let fitted = spmv(&frame.x, &[1.0, 10.0]);
        assert_eq!(fitted, vec![1.0, 1.0, 11.0, 11.0, 11.0]);
        assert_eq!(frame.term_columns[0].columns, 1..2);
    }

    #[test]
    fn test_interaction_columns_are_products() {
        let df = sample_df();
        let spec = ModelSpec::builder("y")
            .fixed_formula("origin*treat")
            .build(&df)
            .unwrap();
        let frame = build_model_frame(&df, &spec).unwrap();
        assert_eq!(
            frame.coef_names,
            vec!["(Intercept)", "origin[h]", "treat[t]", "origin[h]:treat[t]"]
        );
        let col = spmv(&frame.x, &[0.0, 0.0, 0.0, 1.0]);
        assert_eq!(col, vec![0.0, 0.0, 0.0, 1.0, 1.0]);
        assert_eq!(frame.term_columns[2].columns, 3..4);
    }

    #[test]
    fn test_missing_covariate_drops_row() {
        let df = sample_df();
        let spec = ModelSpec::builder("y").fixed_formula("age").build(&df).unwrap();
        let frame = build_model_frame(&df, &spec).unwrap();
        assert_eq!(frame.rows, vec![0, 1, 2, 3]);
        assert_eq!(frame.coef_names, vec!["(Intercept)", "age"]);
    }

    #[test]
    fn test_no_intercept_full_coding() {
        let df = sample_df();
        let spec = ModelSpec::builder("y")
            .fixed_formula("0 + origin + treat")
            .build(&df)
            .unwrap();
        let frame = build_model_frame(&df, &spec).unwrap();
        assert_eq!(frame.coef_names, vec!["origin[w]", "origin[h]", "treat[t]"]);
    }

    #[test]
    fn test_random_design_uses_present_levels() {
        let df = sample_df();
        let spec = ModelSpec::builder("y")
            .fixed_formula("age")
            .random("tank")
            .build(&df)
            .unwrap();
        let frame = build_model_frame(&df, &spec).unwrap();
        // Rows 4 and 5 are dropped, so tank t3 never appears.
        assert_eq!(frame.groupings[0].levels, vec!["t1", "t2"]);
        assert_eq!(frame.groupings[0].z.cols(), 2);
        let z = combined_random_design(&frame.groupings, frame.n_obs());
        assert_eq!(spmv(&z, &[1.0, 2.0]), vec![1.0, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn test_cell_design() {
        let df = sample_df();
        let spec = ModelSpec::builder("y")
            .fixed_formula("origin*treat")
            .build(&df)
            .unwrap();
        let frame = build_model_frame(&df, &spec).unwrap();
        let (cells, labels) = frame.with_cell_design(&df, &["origin", "treat"]).unwrap();
        assert_eq!(labels.len(), 4);
        assert_eq!(labels[0], vec!["w", "c"]);
        assert_eq!(cells.coef_names[0], "origin[w]:treat[c]");
        let row_sums = spmv(&cells.x, &[1.0; 4]);
        assert!(row_sums.iter().all(|&s| s == 1.0));
    }
}
