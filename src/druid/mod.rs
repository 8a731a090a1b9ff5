//! Lowering folded queries to Druid native JSON.
//!
//! Filters, aggregators and dimensions each have a builder module; the
//! planner picks the query type and stitches them together.

pub mod aggregation;
pub mod extraction;
pub mod filter;
pub mod javascript;
pub mod planner;
pub mod query;

pub use planner::{plan, DruidPlan};
pub use query::DruidQuery;
