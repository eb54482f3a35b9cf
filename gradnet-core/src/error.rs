use thiserror::Error;

/// Crate-wide error type.
///
/// All failures are fatal and local: the interpreter makes no
/// partial-application guarantee, and a caller that sees an error should
/// discard and reconstruct the runtime.
#[derive(Error, Debug, PartialEq, Clone)] // PartialEq/Clone for easier testing
pub enum GradNetError {
    #[error("Dimension mismatch during {operation}: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        operation: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Unknown tensor id {id}")]
    UnknownTensor { id: usize },

    #[error("Missing role: no {role} tensor designated in this graph")]
    MissingRole { role: String },

    #[error("Invalid graph: {message}")]
    InvalidGraph { message: String },

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl GradNetError {
    /// Shorthand for the most common failure, keeping call sites short.
    pub(crate) fn mismatch(operation: &str, expected: &[usize], actual: &[usize]) -> Self {
        GradNetError::DimensionMismatch {
            operation: operation.to_string(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
