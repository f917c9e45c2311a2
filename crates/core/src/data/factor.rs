use indexmap::IndexMap;

/// A categorical (factor) column that maps string levels to integer codes.
///
/// Levels are discovered in order of first appearance and assigned 0-based
/// codes. The first level is the reference level under treatment coding.
#[derive(Debug, Clone)]
pub struct FactorColumn {
    levels: IndexMap<String, usize>,
    codes: Vec<usize>,
}

impl FactorColumn {
    /// Create a new `FactorColumn` from string values.
    ///
    /// # Examples
    /// ```
    /// use nestlmm_core::data::FactorColumn;
    ///
    /// let col = FactorColumn::new(&["A", "B", "A", "C", "B"]);
    /// assert_eq!(col.n_levels(), 3);
    /// assert_eq!(col.codes(), &[0, 1, 0, 2, 1]);
    /// ```
    pub fn new<S: AsRef<str>>(values: &[S]) -> Self {
        let mut levels = IndexMap::new();
        let mut codes = Vec::with_capacity(values.len());

        for val in values {
            let next_code = levels.len();
            let code = *levels.entry(val.as_ref().to_string()).or_insert(next_code);
            codes.push(code);
        }

        FactorColumn { levels, codes }
    }

    pub(crate) fn from_parts(levels: IndexMap<String, usize>, codes: Vec<usize>) -> Self {
        FactorColumn { levels, codes }
    }

    /// Returns the number of distinct levels.
    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    /// Returns the integer code of each observation.
    pub fn codes(&self) -> &[usize] {
        &self.codes
    }

    /// Level names in code order.
    pub fn level_names(&self) -> Vec<&str> {
        self.levels.keys().map(|s| s.as_str()).collect()
    }

    /// Returns the level name for a code, or `None` if out of range.
    pub fn level_name(&self, code: usize) -> Option<&str> {
        self.levels.get_index(code).map(|(name, _)| name.as_str())
    }

    /// Level name of observation `row`.
    pub fn label(&self, row: usize) -> &str {
        self.level_name(self.codes[row]).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}
