//! Error types for the timecourse-gsa library.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum TcgsaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid expression value '{value}' at row {row}, column {col}")]
    InvalidExpression {
        value: String,
        row: usize,
        col: usize,
    },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Sample ID mismatch: {0}")]
    SampleMismatch(String),

    #[error("Missing column '{0}' in design table")]
    MissingColumn(String),

    #[error("Conflicting configuration: {0}")]
    ConflictingConfig(String),

    #[error("Time expression parse error: {0}")]
    TimeExprParse(String),

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, TcgsaError>;
