//! # sqlguard
//!
//! An injection-hardened dynamic SQL query builder with typed row materialization.
//!
//! ## Features
//!
//! - **Immutable builder**: every chain method returns a new snapshot, so partial
//!   queries can be branched and shared across tasks
//! - **Validated fragments**: ORDER BY, JOIN, column lists, HAVING and table names go
//!   through allow-list grammars plus a token denylist; rejected input is dropped
//! - **Placeholder safety**: sequence arguments expand to `(?, ?, …)`, empty ones to a
//!   false predicate, and `?` is rewritten to `$n` for Postgres in one pass
//! - **Typed materialization**: rows map onto `#[derive(Record)]` structs through a
//!   cached column index with lenient per-cell coercion
//! - **Record mutations**: create, patch, update and bulk insert from the same metadata
//! - **Transaction-friendly**: pass a transaction anywhere a `GenericClient` is expected
//!
//! ## Example
//!
//! ```ignore
//! use sqlguard::prelude::*;
//!
//! #[derive(Debug, Default, Record)]
//! #[orm(table = "users")]
//! struct User {
//!     #[orm(id)]
//!     id: i64,
//!     name: String,
//!     status: String,
//! }
//!
//! let users: Vec<User> = QueryBuilder::for_client(&client)
//!     .model::<User>()
//!     .and_where("status = ?", "active")
//!     .and_where("id IN ?", [vec![1, 2, 3]])
//!     .order(&sort_param) // untrusted: ignored unless it is a valid ORDER BY
//!     .limit(10)
//!     .fetch_all(&client)
//!     .await?;
//! ```

pub mod client;
pub mod context;
pub mod decode;
pub mod dialect;
pub mod error;
pub mod materialize;
pub mod memory;
pub mod mutation;
pub mod qb;
pub mod record;
pub mod sanitize;
pub mod scope;
pub mod validate;
pub mod value;

mod transaction;

pub use client::{ExecResult, GenericClient, RowCursor};
pub use context::{CancelSignal, ExecContext};
pub use decode::{FieldKind, FromValue, Json, ToValue, convert_assign};
pub use dialect::Dialect;
pub use error::{DecodeError, OrmError, OrmResult, ValidationError};
pub use materialize::{ColumnPlan, Destination, RowMap};
pub use memory::MemoryClient;
pub use mutation::Writer;
pub use qb::{Condition, QueryBuilder, Statement};
pub use record::{
    AnyRecord, FieldDescriptor, FieldMap, FieldMapCache, Record, clear_field_map_cache, field_map,
};
pub use scope::Scope;
pub use value::{IntoArgs, Value};

#[cfg(feature = "pool")]
pub mod pool;

#[cfg(feature = "pool")]
pub use pool::{create_pool, create_pool_with_max_size};

#[cfg(feature = "derive")]
pub use sqlguard_derive::Record;

pub mod prelude;
