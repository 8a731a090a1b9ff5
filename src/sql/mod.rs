//! SQL generation for the relational backends.
//!
//! - [`dialect`] - per-backend rendering of primitives without a portable spelling
//! - [`render`] - expression to SQL fragment
//! - [`planner`] - folded query to one SELECT
//! - [`query`] - SELECT builder
//! - [`token`] - token types for SQL generation

pub mod dialect;
pub mod planner;
pub mod query;
pub mod render;
pub mod token;

#[cfg(test)]
pub mod test_utils;

pub use dialect::{Dialect, DialectError, SqlDialect};
pub use planner::{plan, ClientKey, Reaggregate, SqlPlan};
pub use query::{OrderByExpr, Query, SelectExpr, SortDir, TableRef};
pub use render::SqlRenderer;
pub use token::{Token, TokenStream};
