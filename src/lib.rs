//! # Heron
//!
//! A federated query compiler: one expression algebra, many backends.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              Expression (model::Expression)              │
//! │   filter / split / apply / sort / limit over a dataset   │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [external::fold]
//! ┌─────────────────────────────────────────────────────────┐
//! │      FoldedQuery (one level, bound to an External)       │
//! └─────────────────────────────────────────────────────────┘
//!                │                            │
//!                ▼ [druid::plan]              ▼ [sql::plan]
//! ┌──────────────────────────┐  ┌──────────────────────────┐
//! │   Druid native JSON      │  │  Presto / BigQuery /     │
//! │   (timeseries, topN,     │  │  Postgres / MySQL SQL    │
//! │    groupBy, select, ...) │  │                          │
//! └──────────────────────────┘  └──────────────────────────┘
//!                          │
//!                          ▼ [requester::execute_plan]
//! ┌─────────────────────────────────────────────────────────┐
//! │        Rows, nested levels bound per parent row          │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod compile;
pub mod config;
pub mod druid;
pub mod external;
pub mod metadata;
pub mod model;
pub mod requester;
pub mod sql;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::compile::{compile, compile_plan, NativeQuery, PlanNode, QueryPlan};
    pub use crate::external::{CompileError, CompileResult, Engine, ExternalValue, Row};
    pub use crate::model::{
        and_all, lit_bool, lit_null, lit_num, lit_number_range, lit_set_str, lit_str, lit_time,
        lit_time_range, ply, r, AttributeInfo, Duration, Expression, PlyType, SortDirection,
        Timezone, Value,
    };
    pub use crate::requester::{execute_plan, AbortHandle, Requester, RowStream};
    pub use crate::sql::{Dialect, SqlDialect};
}
