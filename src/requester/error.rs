//! Query issuance errors.

use thiserror::Error;

use crate::external::CompileError;

/// Result type for plan execution.
pub type RequesterResult<T> = Result<T, RequesterError>;

/// Errors raised while issuing a plan.
#[derive(Error, Debug)]
pub enum RequesterError {
    /// The engine rejected a query or the transport failed.
    #[error("query failed: {0}")]
    Query(String),

    /// A nested level could not be planned from its parent row.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// The chain was aborted; partial results were discarded.
    #[error("query chain cancelled")]
    Cancelled,
}
