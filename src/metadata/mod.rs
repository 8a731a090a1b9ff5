//! Catalog metadata: turning an engine's column listing into attributes.
//!
//! Introspection tooling fetches `(name, native type)` pairs from a live
//! backend and hands them to [`map_types`]. The compiler itself never calls
//! this; it only reads the resulting `AttributeInfo`s from an External.
//!
//! ```ignore
//! use heron::external::Engine;
//! use heron::metadata::{map_types, ColumnInfo};
//!
//! let attributes = map_types(Engine::BigQuery, &[ColumnInfo::new("page", "STRING")]);
//! ```

mod mapper;

pub use mapper::{map_types, ColumnInfo};
