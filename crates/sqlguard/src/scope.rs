//! Reusable builder transformations.
//!
//! A scope is any `Fn(QueryBuilder) -> QueryBuilder`. Applying a list of scopes
//! is a left fold, so `scopes(&[f, g])` equals `scopes(&[f]).scopes(&[g])`.

use crate::dialect::Dialect;
use crate::qb::QueryBuilder;
use crate::validate::validate_column_name;

/// A builder-to-builder function.
pub trait Scope {
    fn apply(&self, builder: QueryBuilder) -> QueryBuilder;
}

impl<F> Scope for F
where
    F: Fn(QueryBuilder) -> QueryBuilder,
{
    fn apply(&self, builder: QueryBuilder) -> QueryBuilder {
        self(builder)
    }
}

impl QueryBuilder {
    /// Fold the builder through `scopes`, left to right.
    pub fn scopes(&self, scopes: &[&dyn Scope]) -> Self {
        scopes
            .iter()
            .fold(self.clone(), |builder, scope| scope.apply(builder))
    }

    /// Apply a single scope.
    pub fn scope(&self, scope: impl Scope) -> Self {
        scope.apply(self.clone())
    }
}

/// `LIMIT per_page OFFSET (page - 1) * per_page`, 1-based.
///
/// `page` below 1 is treated as 1. `per_page == 0` leaves paging unchanged.
pub fn paginate(page: i64, per_page: u64) -> impl Fn(QueryBuilder) -> QueryBuilder {
    move |builder| {
        if per_page == 0 {
            return builder;
        }
        let page = page.max(1) as u64;
        builder
            .limit(per_page)
            .offset((page - 1).saturating_mul(per_page))
    }
}

/// Case-insensitive substring match of `term` over `columns`, OR-ed together and
/// added as one AND group. Invalid column names are skipped; an empty term or no
/// valid column leaves the builder unchanged.
pub fn search<S: AsRef<str>>(columns: &[S], term: &str) -> impl Fn(QueryBuilder) -> QueryBuilder {
    let columns: Vec<String> = columns
        .iter()
        .map(|c| c.as_ref().trim().to_string())
        .filter(|c| validate_column_name(c).is_ok())
        .collect();
    let pattern = format!("%{}%", escape_like(term.trim()));
    let empty = term.trim().is_empty();

    move |builder| {
        if empty || columns.is_empty() {
            return builder;
        }
        let (op, needs_lower) = match builder.dialect() {
            Dialect::Postgres => ("ILIKE", false),
            Dialect::Generic => ("LIKE", true),
        };
        let group = columns.iter().fold(builder.detach(), |group, column| {
            if needs_lower {
                group.or_where(&format!("LOWER({column}) {op} LOWER(?)"), pattern.as_str())
            } else {
                group.or_where(&format!("{column} {op} ?"), pattern.as_str())
            }
        });
        builder.where_group(&group)
    }
}

/// ORDER BY `clause`, validated like [`QueryBuilder::order`].
pub fn order_by(clause: &str) -> impl Fn(QueryBuilder) -> QueryBuilder {
    let clause = clause.to_string();
    move |builder| builder.order(&clause)
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
