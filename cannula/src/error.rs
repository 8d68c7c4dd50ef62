//! Error types for code generation
//!
//! Every stage of the pipeline reports through [`GeneratorError`]. Metadata
//! parsing is the one stage that never fails; malformed `@metadata(...)`
//! blocks are dropped instead.

use std::path::PathBuf;

/// Error type for code generation
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    /// Malformed SDL or operation document
    #[error("syntax error in document {source_index}: {message}")]
    Syntax {
        /// Position of the offending fragment in the input list
        source_index: usize,
        /// Parser message including the line and column
        message: String,
    },

    /// Schema is syntactically valid but inconsistent
    #[error("schema validation error: {0}")]
    SchemaValidation(String),

    /// A relation between db-backed types could not be resolved
    #[error("relation error: {0}")]
    Relation(String),

    /// Multiple primary keys without a composite key opt in
    #[error("primary key error: {0}")]
    PrimaryKey(String),

    /// Schema nullability disagrees with field metadata
    #[error("nullability error: {0}")]
    Nullability(String),

    /// Invalid `@connect` directive usage
    #[error("connect error: {0}")]
    Connect(String),

    /// Code generation failed
    #[error("code generation error: {0}")]
    CodeGenError(String),

    /// Invalid configuration
    #[error("config error: {0}")]
    Config(String),

    /// Reading or writing a file failed
    #[error("io error at {}: {source}", path.display())]
    Io {
        /// File that was being accessed
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
}

impl GeneratorError {
    /// Wrap an io error with the path it occurred on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GeneratorError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error was raised by schema or relation validation
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            GeneratorError::SchemaValidation(_)
                | GeneratorError::Relation(_)
                | GeneratorError::PrimaryKey(_)
                | GeneratorError::Nullability(_)
                | GeneratorError::Connect(_)
        )
    }
}

impl From<String> for GeneratorError {
    fn from(s: String) -> Self {
        GeneratorError::CodeGenError(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_converts_to_codegen_error() {
        let err: GeneratorError = "boom".to_string().into();
        assert!(matches!(err, GeneratorError::CodeGenError(ref m) if m == "boom"));
        assert!(!err.is_validation());
    }

    #[test]
    fn test_display_includes_context() {
        let err = GeneratorError::Syntax {
            source_index: 1,
            message: "unexpected token at 3:5".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "syntax error in document 1: unexpected token at 3:5"
        );

        let err = GeneratorError::Nullability("Field 'name' conflicts".to_string());
        assert!(err.is_validation());
        assert!(err.to_string().contains("'name'"));
    }
}
