//! Convenient imports for typical `sqlguard` usage.
//!
//! ```ignore
//! use sqlguard::prelude::*;
//! ```

pub use crate::{
    Condition, Dialect, ExecContext, GenericClient, IntoArgs, OrmError, OrmResult, QueryBuilder,
    Record, RowMap, Statement, Value, Writer, args,
};
pub use crate::scope::{order_by, paginate, search};

#[cfg(feature = "pool")]
pub use crate::create_pool;
