//! Immutable, copy-on-write SELECT builder.
//!
//! Every chain method borrows the current snapshot, copies it, applies one change
//! and returns the copy. The receiver is never mutated, so a partially built query
//! can be branched and reused freely, across threads included.
//!
//! Untrusted text (`join`, `select`, `group_by`, `having`, `order`, `table`) goes
//! through the validator first. A rejected fragment makes the call a no-op: the
//! returned builder is an unchanged copy. Use the `safe_*` variants to get the
//! rejection as an error, or the `*_unchecked` variants to bypass validation.
//!
//! Filter fragments must carry one argument per unquoted `?`. A fragment that
//! does not is replaced by [`FALSE_PREDICATE`], so a miscounted filter matches
//! nothing rather than everything.

mod build;
mod exec;

#[cfg(test)]
mod tests;

pub use build::Statement;

use crate::client::GenericClient;
use crate::context::ExecContext;
use crate::dialect::{Dialect, count_placeholders, expand_placeholders};
use crate::error::ValidationError;
use crate::record::Record;
use crate::sanitize::{
    safe_group_by_fields, safe_having_clauses, safe_join_clause, safe_order_by,
    safe_select_fields,
};
use crate::validate::{validate_sql_operator, validate_table_name};
use crate::value::{IntoArgs, Value};
use std::any::TypeId;

/// Always-false predicate substituted for a filter on an empty sequence.
pub const FALSE_PREDICATE: &str = "1=0";

/// The record type a builder is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelBinding {
    type_id: TypeId,
    type_name: &'static str,
    table: &'static str,
}

impl ModelBinding {
    pub fn of<R: Record>() -> Self {
        Self {
            type_id: TypeId::of::<R>(),
            type_name: std::any::type_name::<R>(),
            table: R::table_name(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn table(&self) -> &'static str {
        self.table
    }
}

/// A filter condition: a text fragment with its positional arguments, or another
/// builder whose filters are folded in as one parenthesized group.
#[derive(Debug, Clone)]
pub enum Condition {
    Fragment { sql: String, args: Vec<Value> },
    Group(Box<QueryBuilder>),
}

impl Condition {
    pub fn fragment(sql: impl Into<String>, args: impl IntoArgs) -> Self {
        Self::Fragment {
            sql: sql.into(),
            args: args.into_args(),
        }
    }

    pub fn group(builder: &QueryBuilder) -> Self {
        Self::Group(Box::new(builder.clone()))
    }
}

impl From<QueryBuilder> for Condition {
    fn from(builder: QueryBuilder) -> Self {
        Self::Group(Box::new(builder))
    }
}

impl From<&QueryBuilder> for Condition {
    fn from(builder: &QueryBuilder) -> Self {
        Self::group(builder)
    }
}

impl From<&str> for Condition {
    fn from(sql: &str) -> Self {
        Self::fragment(sql, ())
    }
}

/// Every unquoted `?` in `sql` needs exactly one argument (a sequence counts once).
pub(crate) fn check_arity(sql: &str, args: &[Value]) -> Result<(), ValidationError> {
    let placeholders = count_placeholders(sql);
    if placeholders != args.len() {
        return Err(ValidationError::ArgumentCount {
            fragment: sql.to_string(),
            placeholders,
            args: args.len(),
        });
    }
    Ok(())
}

/// [`expand_fragment`] for a filter, failing closed on an arity mismatch.
fn filter_fragment(sql: &str, args: Vec<Value>) -> (String, Vec<Value>) {
    match check_arity(sql, &args) {
        Ok(()) => expand_fragment(sql, args),
        Err(err) => {
            tracing::warn!(target: "sqlguard::builder", error = %err, "filter replaced by {}", FALSE_PREDICATE);
            (FALSE_PREDICATE.to_string(), Vec::new())
        }
    }
}

/// Expand sequence arguments positionally: the placeholder matching a `List`
/// argument becomes `(?, ?, …)`. An empty sequence turns the whole fragment into
/// [`FALSE_PREDICATE`] with no arguments.
pub(crate) fn expand_fragment(sql: &str, args: Vec<Value>) -> (String, Vec<Value>) {
    if !args.iter().any(|a| matches!(a, Value::List(_))) {
        return (sql.to_string(), args);
    }
    if args.iter().any(|a| matches!(a, Value::List(items) if items.is_empty())) {
        return (FALSE_PREDICATE.to_string(), Vec::new());
    }

    let widths: Vec<Option<usize>> = args
        .iter()
        .map(|a| match a {
            Value::List(items) => Some(items.len()),
            _ => None,
        })
        .collect();
    let mut flat = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Value::List(items) => flat.extend(items),
            scalar => flat.push(scalar),
        }
    }
    (expand_placeholders(sql, &widths), flat)
}

/// Immutable query-builder snapshot.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    dialect: Dialect,
    ctx: ExecContext,
    table: Option<String>,
    model: Option<ModelBinding>,
    fields: Vec<String>,
    joins: Vec<String>,
    join_args: Vec<Value>,
    wheres: Vec<String>,
    where_args: Vec<Value>,
    or_wheres: Vec<String>,
    or_args: Vec<Value>,
    groups: Vec<String>,
    havings: Vec<String>,
    having_args: Vec<Value>,
    order_by: String,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl QueryBuilder {
    /// Empty builder rendering placeholders for `dialect`.
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            ..Self::default()
        }
    }

    /// Empty builder with the dialect detected from the client's driver name.
    pub fn for_client<C: GenericClient + ?Sized>(client: &C) -> Self {
        Self::new(Dialect::detect(client.driver_name()))
    }

    /// Builder bound to record type `R` (table and field metadata).
    pub fn of<R: Record>(dialect: Dialect) -> Self {
        Self::new(dialect).model::<R>()
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn context(&self) -> &ExecContext {
        &self.ctx
    }

    pub fn model_binding(&self) -> Option<&ModelBinding> {
        self.model.as_ref()
    }

    /// Target table: an explicit `table()` wins over the bound record's table.
    pub fn table_name(&self) -> Option<&str> {
        self.table
            .as_deref()
            .or_else(|| self.model.as_ref().map(|m| m.table))
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    fn derive(&self, f: impl FnOnce(&mut Self)) -> Self {
        let mut next = self.clone();
        f(&mut next);
        next
    }

    // ── bindings ────────────────────────────────────────────────────────────

    /// Rebind the execution context (timeout, cancellation, debug logging).
    pub fn with_context(&self, ctx: ExecContext) -> Self {
        self.derive(|q| q.ctx = ctx)
    }

    /// Rebind the placeholder dialect.
    pub fn with_dialect(&self, dialect: Dialect) -> Self {
        self.derive(|q| q.dialect = dialect)
    }

    /// Bind record type `R`. Its table becomes the target unless `table()` was set.
    pub fn model<R: Record>(&self) -> Self {
        self.derive(|q| q.model = Some(ModelBinding::of::<R>()))
    }

    /// Set the target table. Invalid identifiers are ignored.
    pub fn table(&self, name: &str) -> Self {
        self.try_table(name).unwrap_or_else(|_| self.clone())
    }

    /// Set the target table, surfacing a rejected identifier.
    pub fn try_table(&self, name: &str) -> Result<Self, ValidationError> {
        let name = name.trim();
        validate_table_name(name)?;
        Ok(self.derive(|q| q.table = Some(name.to_string())))
    }

    /// A builder with the same bindings (dialect, context, table, record) and no clauses.
    pub fn detach(&self) -> Self {
        Self {
            dialect: self.dialect,
            ctx: self.ctx.clone(),
            table: self.table.clone(),
            model: self.model,
            ..Self::default()
        }
    }

    // ── filters ─────────────────────────────────────────────────────────────

    /// Append an AND condition.
    pub fn where_condition(&self, cond: impl Into<Condition>) -> Self {
        match cond.into() {
            Condition::Fragment { sql, args } => {
                let (sql, args) = filter_fragment(&sql, args);
                self.derive(|q| {
                    q.wheres.push(sql);
                    q.where_args.extend(args);
                })
            }
            Condition::Group(sub) => match self.flatten_group(&sub) {
                Some((sql, args)) => self.derive(|q| {
                    q.wheres.push(sql);
                    q.where_args.extend(args);
                }),
                None => self.clone(),
            },
        }
    }

    /// Append an AND fragment such as `status = ?` or `id IN ?`.
    pub fn and_where(&self, sql: &str, args: impl IntoArgs) -> Self {
        self.where_condition(Condition::fragment(sql, args))
    }

    /// Like [`and_where`](Self::and_where), but an arity mismatch is returned as an error.
    pub fn safe_where(&self, sql: &str, args: impl IntoArgs) -> Result<Self, ValidationError> {
        let args = args.into_args();
        check_arity(sql, &args)?;
        Ok(self.and_where(sql, args))
    }

    /// Append another builder's filters as one parenthesized AND group.
    pub fn where_group(&self, sub: &QueryBuilder) -> Self {
        self.where_condition(sub)
    }

    /// Append an OR condition. All OR conditions render as one disjunction after
    /// the AND block.
    pub fn or_condition(&self, cond: impl Into<Condition>) -> Self {
        let (sql, args) = match cond.into() {
            Condition::Fragment { sql, args } => filter_fragment(&sql, args),
            Condition::Group(sub) => match self.flatten_group(&sub) {
                Some(group) => group,
                None => return self.clone(),
            },
        };
        self.derive(|q| {
            q.or_wheres.push(sql);
            q.or_args.extend(args);
        })
    }

    /// Append an OR fragment.
    pub fn or_where(&self, sql: &str, args: impl IntoArgs) -> Self {
        self.or_condition(Condition::fragment(sql, args))
    }

    /// Like [`or_where`](Self::or_where), but an arity mismatch is returned as an error.
    pub fn safe_or_where(&self, sql: &str, args: impl IntoArgs) -> Result<Self, ValidationError> {
        let args = args.into_args();
        check_arity(sql, &args)?;
        Ok(self.or_where(sql, args))
    }

    /// `column <op> ?` with both the column and the operator validated.
    ///
    /// `IN`/`NOT IN` expand a sequence value, `BETWEEN` expects a two-element
    /// sequence, and `IS`/`IS NOT` with NULL render without a placeholder.
    /// Rejected input, or `AND`/`OR`/`NOT` as the operator, is a no-op.
    pub fn where_op(&self, column: &str, op: &str, value: impl Into<Value>) -> Self {
        let column = column.trim();
        if safe_select_fields(&[column]).is_err() || column == "*" {
            return self.clone();
        }
        if validate_sql_operator(op).is_err() {
            return self.clone();
        }
        let op = op.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_uppercase();
        let value = value.into();
        match (op.as_str(), value) {
            ("AND" | "OR" | "NOT", _) => self.clone(),
            ("IS" | "IS NOT", Value::Null) => self.and_where(&format!("{column} {op} NULL"), ()),
            ("BETWEEN" | "NOT BETWEEN", Value::List(bounds)) if bounds.len() == 2 => {
                self.and_where(&format!("{column} {op} ? AND ?"), bounds)
            }
            ("BETWEEN" | "NOT BETWEEN", _) => self.clone(),
            (_, value) => self.and_where(&format!("{column} {op} ?"), value),
        }
    }

    /// Render a sub-builder's filters as `(ANDs [OR (ORs)])`.
    ///
    /// When the sub-builder is bound like `self` and starts with the same AND
    /// fragments (it was cloned from `self`), that common prefix and its
    /// arguments are dropped so the parent's filters are not repeated inside
    /// the group. Fragments are compared textually; unrelated chains that happen
    /// to share a leading fragment are stripped too.
    fn flatten_group(&self, sub: &QueryBuilder) -> Option<(String, Vec<Value>)> {
        let mut sub_wheres: &[String] = &sub.wheres;
        let mut sub_where_args: &[Value] = &sub.where_args;

        let same_binding = sub.model == self.model && sub.table == self.table;
        if same_binding && !self.wheres.is_empty() && sub.wheres.len() >= self.wheres.len() {
            let common = self
                .wheres
                .iter()
                .zip(&sub.wheres)
                .take_while(|(a, b)| a == b)
                .count();
            if common > 0 {
                let args_to_drop: usize = self.wheres[..common]
                    .iter()
                    .map(|w| count_placeholders(w))
                    .sum();
                sub_wheres = &sub.wheres[common..];
                sub_where_args = sub.where_args.get(args_to_drop..).unwrap_or(&[]);
            }
        }

        if sub_wheres.is_empty() && sub.or_wheres.is_empty() {
            return None;
        }

        let mut sql = String::from("(");
        sql.push_str(&sub_wheres.join(" AND "));
        if !sub.or_wheres.is_empty() {
            if !sub_wheres.is_empty() {
                sql.push_str(" OR ");
            }
            sql.push('(');
            sql.push_str(&sub.or_wheres.join(" OR "));
            sql.push(')');
        }
        sql.push(')');

        let mut args = Vec::with_capacity(sub_where_args.len() + sub.or_args.len());
        args.extend_from_slice(sub_where_args);
        args.extend_from_slice(&sub.or_args);
        Some((sql, args))
    }

    // ── validated clauses ───────────────────────────────────────────────────

    /// Append a JOIN clause. Invalid clauses are ignored.
    pub fn join(&self, clause: &str, args: impl IntoArgs) -> Self {
        self.safe_join(clause, args).unwrap_or_else(|_| self.clone())
    }

    pub fn safe_join(&self, clause: &str, args: impl IntoArgs) -> Result<Self, ValidationError> {
        let clause = safe_join_clause(clause)?;
        if clause.is_empty() {
            return Ok(self.clone());
        }
        Ok(self.join_unchecked(&clause, args))
    }

    /// Append a JOIN clause without validation. The caller is responsible for its safety.
    pub fn join_unchecked(&self, clause: &str, args: impl IntoArgs) -> Self {
        let (clause, args) = expand_fragment(clause, args.into_args());
        self.derive(|q| {
            q.joins.push(clause);
            q.join_args.extend(args);
        })
    }

    /// Replace the selected columns. Invalid lists are ignored; an empty list keeps the current one.
    pub fn select<S: AsRef<str>>(&self, fields: &[S]) -> Self {
        self.safe_select(fields).unwrap_or_else(|_| self.clone())
    }

    pub fn safe_select<S: AsRef<str>>(&self, fields: &[S]) -> Result<Self, ValidationError> {
        let fields = safe_select_fields(fields)?;
        Ok(self.select_unchecked(&fields))
    }

    /// Replace the selected columns without validation.
    pub fn select_unchecked<S: AsRef<str>>(&self, fields: &[S]) -> Self {
        if fields.is_empty() {
            return self.clone();
        }
        self.derive(|q| q.fields = fields.iter().map(|f| f.as_ref().to_string()).collect())
    }

    /// Replace the GROUP BY columns. Invalid lists are ignored.
    pub fn group_by<S: AsRef<str>>(&self, columns: &[S]) -> Self {
        self.safe_group_by(columns).unwrap_or_else(|_| self.clone())
    }

    pub fn safe_group_by<S: AsRef<str>>(&self, columns: &[S]) -> Result<Self, ValidationError> {
        let columns = safe_group_by_fields(columns)?;
        Ok(self.group_by_unchecked(&columns))
    }

    /// Replace the GROUP BY columns without validation.
    pub fn group_by_unchecked<S: AsRef<str>>(&self, columns: &[S]) -> Self {
        if columns.is_empty() {
            return self.clone();
        }
        self.derive(|q| q.groups = columns.iter().map(|c| c.as_ref().to_string()).collect())
    }

    /// Replace the HAVING clauses and their arguments. Invalid clauses, or an
    /// argument count that does not match their placeholders, are ignored.
    pub fn having<S: AsRef<str>>(&self, clauses: &[S], args: impl IntoArgs) -> Self {
        self.safe_having(clauses, args)
            .unwrap_or_else(|_| self.clone())
    }

    pub fn safe_having<S: AsRef<str>>(
        &self,
        clauses: &[S],
        args: impl IntoArgs,
    ) -> Result<Self, ValidationError> {
        let clauses = safe_having_clauses(clauses)?;
        let args = args.into_args();
        check_arity(&clauses.join(" AND "), &args)?;
        Ok(self.having_unchecked(&clauses, args))
    }

    /// Replace the HAVING clauses without validation.
    pub fn having_unchecked<S: AsRef<str>>(&self, clauses: &[S], args: impl IntoArgs) -> Self {
        if clauses.is_empty() {
            return self.clone();
        }
        let joined = clauses
            .iter()
            .map(|c| c.as_ref())
            .collect::<Vec<_>>()
            .join(" AND ");
        let (joined, args) = expand_fragment(&joined, args.into_args());
        self.derive(|q| {
            q.havings = vec![joined];
            q.having_args = args;
        })
    }

    /// Set ORDER BY. Invalid clauses are ignored; an empty clause clears ordering.
    pub fn order(&self, clause: &str) -> Self {
        self.safe_order(clause).unwrap_or_else(|_| self.clone())
    }

    pub fn safe_order(&self, clause: &str) -> Result<Self, ValidationError> {
        let clause = safe_order_by(clause)?;
        Ok(self.order_unchecked(&clause))
    }

    /// Set ORDER BY without validation.
    pub fn order_unchecked(&self, clause: &str) -> Self {
        self.derive(|q| q.order_by = clause.to_string())
    }

    pub fn limit(&self, limit: u64) -> Self {
        self.derive(|q| q.limit = Some(limit))
    }

    pub fn offset(&self, offset: u64) -> Self {
        self.derive(|q| q.offset = Some(offset))
    }

    /// Remove any LIMIT/OFFSET.
    pub fn unbounded(&self) -> Self {
        self.derive(|q| {
            q.limit = None;
            q.offset = None;
        })
    }
}
