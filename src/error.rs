//! Error types for the compatibility engine

use std::path::PathBuf;

use thiserror::Error;

/// Result type for compatibility operations
pub type Result<T> = std::result::Result<T, CompatError>;

/// Compatibility engine errors
#[derive(Error, Debug)]
pub enum CompatError {
    #[error("Malformed version '{input}': {reason}")]
    MalformedVersion { input: String, reason: String },

    #[error("Schema parse error at line {line}: {message}")]
    SchemaParse { line: usize, message: String },

    #[error("Unsupported type '{type_name}' for column '{column}'")]
    UnsupportedType { column: String, type_name: String },

    #[error("Row {row_index}: expected {expected} fields, found {actual}")]
    FieldCountMismatch {
        row_index: u64,
        expected: usize,
        actual: usize,
    },

    #[error("Row {row_index}: value '{value}' in column '{column}' is not a valid {kind}")]
    FieldTypeMismatch {
        row_index: u64,
        column: String,
        value: String,
        kind: String,
    },

    #[error("Artifact not found: {}", path.display())]
    ArtifactNotFound { path: PathBuf },

    #[error("Artifact already exists: {}", path.display())]
    ArtifactAlreadyExists { path: PathBuf },

    #[error("Corrupt columnar artifact: {reason}")]
    CorruptArtifact { reason: String },

    #[error("Invalid artifact name {}: {reason}", path.display())]
    InvalidArtifactName { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),
}

impl CompatError {
    /// Attach the row index to a row-level error raised by a stateless decoder.
    pub fn at_row(self, index: u64) -> Self {
        match self {
            CompatError::FieldCountMismatch {
                expected, actual, ..
            } => CompatError::FieldCountMismatch {
                row_index: index,
                expected,
                actual,
            },
            CompatError::FieldTypeMismatch {
                column, value, kind, ..
            } => CompatError::FieldTypeMismatch {
                row_index: index,
                column,
                value,
                kind,
            },
            other => other,
        }
    }

    /// Whether a caller may skip the failing unit and continue.
    ///
    /// Only a missing artifact qualifies; everything else is a deterministic
    /// data or format error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CompatError::ArtifactNotFound { .. })
    }

    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        CompatError::CorruptArtifact {
            reason: reason.into(),
        }
    }
}
