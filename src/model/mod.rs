//! The expression algebra: types, values, time primitives and the tree itself.

pub mod attribute;
pub mod expr;
pub mod time;
pub mod types;

pub use attribute::{AttributeInfo, AttributeSpecial};
pub use expr::{
    and_all, lit, lit_bool, lit_null, lit_num, lit_number_range, lit_set_str, lit_str, lit_time,
    lit_time_range, ply, r, simplify_and, Expression, ExpressionError, SortDirection,
};
pub use time::{Duration, DurationUnit, TimeError, TimePart, Timezone};
pub use types::{NumberRange, PlyType, Set, TimeRange, Value};
