use thiserror::Error;

#[derive(Error, Debug)]
pub enum LmmError {
    /// Input that can never produce a valid fit: unknown or mistyped columns,
    /// broken nesting, malformed terms, empty data.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Column '{0}' not found in DataFrame")]
    ColumnNotFound(String),

    #[error("Dimension mismatch: expected {expected}, got {got} in {context}")]
    DimensionMismatch {
        expected: usize,
        got: usize,
        context: String,
    },

    #[error("Matrix is not positive definite")]
    NotPositiveDefinite,

    #[error("Optimizer did not converge after {iterations} evaluations (change = {change:.2e})")]
    Convergence { iterations: usize, change: f64 },

    #[error("Singular fit: {context}")]
    SingularFit { context: String },

    #[error("Models are not comparable: {0}")]
    IncomparableModels(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl LmmError {
    /// Whether a caller may retry with other starting values or a simpler
    /// random-effects structure.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LmmError::Convergence { .. } | LmmError::SingularFit { .. }
        )
    }

    pub(crate) fn singular(context: impl Into<String>) -> Self {
        LmmError::SingularFit {
            context: context.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LmmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_kinds() {
        assert!(LmmError::Convergence { iterations: 10, change: 1.0 }.is_recoverable());
        assert!(LmmError::singular("sigma2 at boundary").is_recoverable());
        assert!(!LmmError::Validation("bad".into()).is_recoverable());
        assert!(!LmmError::IncomparableModels("x".into()).is_recoverable());
    }

    #[test]
    fn test_display() {
        let err = LmmError::Convergence { iterations: 7, change: 0.5 };
        assert!(err.to_string().contains("7 evaluations"));
    }
}
