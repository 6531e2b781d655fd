//! Derive macros for sqlguard
//!
//! Provides `#[derive(Record)]`.

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

mod record;

/// Derive the `Record` field-descriptor table for a struct.
///
/// # Example
///
/// ```ignore
/// use sqlguard::Record;
///
/// #[derive(Debug, Default, Record)]
/// #[orm(table = "users")]
/// struct User {
///     #[orm(id)]
///     id: i64,
///     username: String,
///     #[orm(column = "email_address")]
///     email: Option<String>,
///     #[orm(skip)]
///     cached_score: f64,
/// }
/// ```
///
/// # Attributes
///
/// - `#[orm(table = "name")]` - Table name (defaults to the snake_case struct name)
/// - `#[orm(id)]` - Mark field as primary key (at most one)
/// - `#[orm(column = "name")]` - Map field to a different column name
/// - `#[orm(skip)]` - Leave the field out of every statement and row mapping
///
/// Every mapped field type must implement `FromValue` and `ToValue`.
#[proc_macro_derive(Record, attributes(orm))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    record::expand(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
