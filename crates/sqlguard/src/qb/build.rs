use super::QueryBuilder;
use crate::value::Value;

/// A finished statement: dialect-rendered SQL plus its positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }
}

impl QueryBuilder {
    /// Render the SELECT statement against `table`.
    pub(crate) fn build_for(&self, table: &str, count: bool) -> Statement {
        let mut sql = String::with_capacity(128);
        let mut args = Vec::with_capacity(
            self.join_args.len() + self.where_args.len() + self.or_args.len() + self.having_args.len(),
        );

        if count {
            sql.push_str("SELECT COUNT(1)");
        } else {
            sql.push_str("SELECT ");
            if self.fields.is_empty() {
                sql.push('*');
            } else {
                sql.push_str(&self.fields.join(", "));
            }
        }
        sql.push_str(" FROM ");
        sql.push_str(table);

        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        args.extend_from_slice(&self.join_args);

        self.push_filters(&mut sql, &mut args);

        if !count {
            if !self.groups.is_empty() {
                sql.push_str(" GROUP BY ");
                sql.push_str(&self.groups.join(", "));
            }
            if !self.havings.is_empty() {
                sql.push_str(" HAVING ");
                sql.push_str(&self.havings.join(" AND "));
                args.extend_from_slice(&self.having_args);
            }
            if !self.order_by.is_empty() {
                sql.push_str(" ORDER BY ");
                sql.push_str(&self.order_by);
            }
            if let Some(limit) = self.limit {
                sql.push_str(&format!(" LIMIT {limit}"));
            }
            if let Some(offset) = self.offset {
                sql.push_str(&format!(" OFFSET {offset}"));
            }
        }

        Statement {
            sql: self.dialect.finalize(&sql),
            args,
        }
    }

    fn push_filters(&self, sql: &mut String, args: &mut Vec<Value>) {
        if self.wheres.is_empty() && self.or_wheres.is_empty() {
            return;
        }
        sql.push_str(" WHERE ");
        sql.push_str(&self.wheres.join(" AND "));
        args.extend_from_slice(&self.where_args);

        if !self.or_wheres.is_empty() {
            if !self.wheres.is_empty() {
                sql.push_str(" OR ");
            }
            sql.push('(');
            sql.push_str(&self.or_wheres.join(" OR "));
            sql.push(')');
            args.extend_from_slice(&self.or_args);
        }
    }

    /// Render the SELECT statement. `None` when no table or record is bound.
    pub fn build(&self) -> Option<Statement> {
        self.table_name().map(|table| self.build_for(table, false))
    }

    /// Render the `SELECT COUNT(1)` projection (no grouping, ordering or paging).
    pub fn build_count(&self) -> Option<Statement> {
        self.table_name().map(|table| self.build_for(table, true))
    }
}
