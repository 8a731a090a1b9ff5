//! Compile-time failures.
//!
//! Every variant is a configuration or expression problem. None of them is
//! retryable; the compiler stops at the first one it meets.

use crate::model::{ExpressionError, PlyType, TimePart};
use crate::sql::dialect::DialectError;

/// Errors raised while turning an expression into native queries.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("Unsupported cast from {from} to {to}")]
    UnsupportedCast { from: PlyType, to: PlyType },

    #[error("Unsupported duration '{0}'")]
    UnsupportedDuration(String),

    #[error("Unsupported time part {0}")]
    UnsupportedTimePart(TimePart),

    #[error("Unsupported having: {0}")]
    UnsupportedHaving(String),

    #[error("Unsupported aggregate: {0}")]
    UnsupportedAggregate(String),

    #[error("Unsupported expression: {0}")]
    UnsupportedExpression(String),

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("Duplicate attribute: {0}")]
    DuplicateAttribute(String),

    #[error("Invalid regular expression '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type CompileResult<T> = Result<T, CompileError>;

impl From<DialectError> for CompileError {
    fn from(err: DialectError) -> Self {
        match err {
            DialectError::UnsupportedCast { from, to } => CompileError::UnsupportedCast { from, to },
            DialectError::UnsupportedDuration(d) => CompileError::UnsupportedDuration(d),
            DialectError::UnsupportedTimePart(p) => CompileError::UnsupportedTimePart(p),
        }
    }
}

impl CompileError {
    /// `UnsupportedExpression` naming the offending node.
    pub fn unsupported(what: impl std::fmt::Display) -> Self {
        CompileError::UnsupportedExpression(what.to_string())
    }
}
