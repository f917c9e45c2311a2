use serde::Serialize;

use crate::error::{LmmError, Result};

/// A fixed-effect term: one variable (main effect) or several (interaction).
///
/// Factor variables are treatment coded; float variables enter as
/// covariates. An interaction's columns are the element-wise products of its
/// members' columns.
#[derive(Debug, Clone, Serialize)]
pub struct FixedTerm {
    vars: Vec<String>,
}

impl FixedTerm {
    /// A main effect.
    pub fn main(var: &str) -> Self {
        Self {
            vars: vec![var.to_string()],
        }
    }

    /// An interaction between two or more variables.
    pub fn interaction(vars: &[&str]) -> Self {
        Self {
            vars: vars.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn vars(&self) -> &[String] {
        &self.vars
    }

    /// Number of variables in the term (1 = main effect).
    pub fn order(&self) -> usize {
        self.vars.len()
    }

    /// `a:b` style label.
    pub fn label(&self) -> String {
        self.vars.join(":")
    }

    /// Order-independent identity of the term.
    pub fn key(&self) -> Vec<&str> {
        let mut k: Vec<&str> = self.vars.iter().map(|s| s.as_str()).collect();
        k.sort_unstable();
        k
    }

    pub fn same_as(&self, other: &FixedTerm) -> bool {
        self.key() == other.key()
    }

    /// `true` if `self` is a strictly higher-order term containing every
    /// variable of `other` (a relative in the marginality sense).
    pub fn contains(&self, other: &FixedTerm) -> bool {
        self.order() > other.order() && other.vars.iter().all(|v| self.vars.contains(v))
    }

    pub(crate) fn check_well_formed(&self) -> Result<()> {
        if self.vars.is_empty() {
            return Err(LmmError::Validation("empty fixed-effect term".into()));
        }
        for (i, v) in self.vars.iter().enumerate() {
            if v.trim().is_empty() {
                return Err(LmmError::Validation(format!(
                    "term '{}' has an empty variable name",
                    self.label()
                )));
            }
            if self.vars[..i].contains(v) {
                return Err(LmmError::Validation(format!(
                    "term '{}' repeats variable '{}'",
                    self.label(),
                    v
                )));
            }
        }
        Ok(())
    }
}

impl PartialEq for FixedTerm {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl std::fmt::Display for FixedTerm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

/// Parsed right-hand side of a fixed-effects formula.
#[derive(Debug, Clone)]
pub struct FixedFormula {
    pub terms: Vec<FixedTerm>,
    pub intercept: bool,
}

/// Parse a formula such as `"origin * treatment + length"`.
///
/// - `a * b` expands to `a + b + a:b` (all sub-interactions for more factors).
/// - `a:b` is a single interaction term.
/// - `1`, `mu`, `intercept` request the intercept (the default); `0` or `-1`
///   removes it.
///
/// Terms are ordered by interaction order, then first appearance; duplicates
/// are merged. Column existence is checked later, when the specification is built
/// against a table.
pub fn parse_fixed_formula(formula: &str) -> Result<FixedFormula> {
    let mut terms: Vec<FixedTerm> = Vec::new();
    let mut intercept = true;

    for piece in formula.split(|c| "+*:-".contains(c)) {
        if piece.trim().contains(char::is_whitespace) {
            return Err(LmmError::Validation(format!(
                "malformed formula '{}': '{}' is not a single variable",
                formula,
                piece.trim()
            )));
        }
    }

    let compact: String = formula.chars().filter(|c| !c.is_whitespace()).collect();
    let normalized = compact.replace("-1", "+0");
    for part in normalized.split('+') {
        let part = part.trim();
        if part.is_empty() {
            if compact.is_empty() {
                continue;
            }
            return Err(LmmError::Validation(format!(
                "malformed formula '{}': empty term",
                formula
            )));
        }

        match part.to_lowercase().as_str() {
            "1" | "mu" | "intercept" => {
                intercept = true;
                continue;
            }
            "0" => {
                intercept = false;
                continue;
            }
            _ => {}
        }

        if part.contains('*') && part.contains(':') {
            return Err(LmmError::Validation(format!(
                "malformed term '{}': mix of '*' and ':'",
                part
            )));
        }

        let expanded = if part.contains('*') {
            let vars = split_vars(part, '*')?;
            expand_factorial(&vars)
        } else {
            vec![FixedTerm {
                vars: split_vars(part, ':')?,
            }]
        };

        for term in expanded {
            term.check_well_formed()?;
            if !terms.iter().any(|t| t.same_as(&term)) {
                terms.push(term);
            }
        }
    }

    terms.sort_by_key(|t| t.order());
    Ok(FixedFormula { terms, intercept })
}

fn split_vars(part: &str, sep: char) -> Result<Vec<String>> {
    let vars: Vec<String> = part.split(sep).map(|v| v.trim().to_string()).collect();
    if vars.iter().any(|v| v.is_empty()) {
        return Err(LmmError::Validation(format!("malformed term '{}'", part)));
    }
    Ok(vars)
}

/// All non-empty subsets of `vars`, in order of increasing size.
fn expand_factorial(vars: &[String]) -> Vec<FixedTerm> {
    let n = vars.len();
    let mut out: Vec<FixedTerm> = (1..(1u32 << n))
        .map(|mask| FixedTerm {
            vars: (0..n)
                .filter(|i| mask & (1 << i) != 0)
                .map(|i| vars[i].clone())
                .collect(),
        })
        .collect();
    out.sort_by_key(|t| t.order());
    out
}
