//! Record-level INSERT/UPDATE helpers.
//!
//! A [`Writer`] renders statements from a record's field-descriptor table and runs
//! them through its client with the bound [`ExecContext`]. Every check (primary
//! key present, column names known, homogeneous bulk input) happens before any
//! statement is issued, and table and column names are validated as identifiers.

use crate::client::{ExecResult, GenericClient};
use crate::context::{ExecContext, run_logged};
use crate::dialect::Dialect;
use crate::error::{OrmError, OrmResult};
use crate::qb::Statement;
use crate::record::{AnyRecord, FieldMap, Record, field_map};
use crate::validate::{validate_column_name, validate_table_name};
use crate::value::Value;

/// Statement runner for record mutations.
#[derive(Debug, Clone)]
pub struct Writer<'c, C: GenericClient + ?Sized> {
    client: &'c C,
    dialect: Dialect,
    ctx: ExecContext,
}

impl<'c, C: GenericClient + ?Sized> Writer<'c, C> {
    /// Writer with the dialect detected from the client's driver name.
    pub fn new(client: &'c C) -> Self {
        Self {
            client,
            dialect: Dialect::detect(client.driver_name()),
            ctx: ExecContext::default(),
        }
    }

    /// Bind an execution context (timeout, cancellation, debug logging).
    pub fn with_context(mut self, ctx: ExecContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Override the detected dialect.
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn execute(&self, stmt: Statement) -> OrmResult<ExecResult> {
        let sql = self.dialect.finalize(&stmt.sql);
        run_logged(
            &self.ctx,
            self.client,
            self.dialect,
            &sql,
            &stmt.args,
            self.client.execute(&sql, &stmt.args),
        )
        .await
    }

    async fn query_scalar(&self, stmt: Statement) -> OrmResult<Value> {
        let sql = self.dialect.finalize(&stmt.sql);
        run_logged(
            &self.ctx,
            self.client,
            self.dialect,
            &sql,
            &stmt.args,
            self.client.query_scalar(&sql, &stmt.args),
        )
        .await
    }

    /// INSERT every non-key column and write the generated key back into `record`.
    ///
    /// On Postgres the key comes from `RETURNING`; elsewhere from the driver's
    /// last-insert id, when it reports one.
    pub async fn create<R: Record>(&self, record: &mut R) -> OrmResult<ExecResult> {
        let map = field_map::<R>();
        let stmt = insert_statement(&map, &[&*record as &dyn AnyRecord])?;

        let Some(pk) = map.primary_key_index() else {
            return self.execute(stmt).await;
        };
        let pk_column = map.fields()[pk].column;

        if self.dialect == Dialect::Postgres {
            let stmt = Statement::new(format!("{} RETURNING {pk_column}", stmt.sql), stmt.args);
            let key = self.query_scalar(stmt).await?;
            record
                .assign(pk, &key)
                .map_err(|e| OrmError::decode(pk_column, e))?;
            return Ok(ExecResult {
                rows_affected: 1,
                last_insert_id: None,
            });
        }

        let result = self.execute(stmt).await?;
        if let Some(id) = result.last_insert_id {
            record
                .assign(pk, &Value::Int(id))
                .map_err(|e| OrmError::decode(pk_column, e))?;
        }
        Ok(result)
    }

    /// UPDATE only the given columns of the row identified by `record`'s primary key.
    pub async fn patch<R, K, I>(&self, record: &R, fields: I) -> OrmResult<ExecResult>
    where
        R: Record,
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let map = field_map::<R>();
        let (pk_column, pk_value) = primary_key_of(&map, record)?;
        check_identifiers(&map)?;

        let mut sets = Vec::new();
        let mut args = Vec::new();
        for (column, value) in fields {
            let column = column.as_ref().trim();
            let known = map.fields().iter().find(|f| f.column == column);
            let Some(field) = known else {
                return Err(OrmError::InvalidColumn {
                    table: map.table().to_string(),
                    column: column.to_string(),
                });
            };
            sets.push(format!("{} = ?", field.column));
            args.push(value);
        }
        if sets.is_empty() {
            return Err(OrmError::Other(format!(
                "patch on {} requires at least one column",
                map.table()
            )));
        }
        args.push(pk_value);

        let sql = format!(
            "UPDATE {} SET {} WHERE {pk_column} = ?",
            map.table(),
            sets.join(", ")
        );
        self.execute(Statement::new(sql, args)).await
    }

    /// UPDATE every non-key column of the row identified by `record`'s primary key.
    pub async fn update<R: Record>(&self, record: &R) -> OrmResult<ExecResult> {
        let map = field_map::<R>();
        let (pk_column, pk_value) = primary_key_of(&map, record)?;
        check_identifiers(&map)?;

        let mut sets = Vec::new();
        let mut args = Vec::new();
        for i in map.non_key_indices() {
            sets.push(format!("{} = ?", map.fields()[i].column));
            args.push(record.value_at(i)?);
        }
        if sets.is_empty() {
            return Err(OrmError::Other(format!(
                "{} has no columns besides its primary key",
                map.table()
            )));
        }
        args.push(pk_value);

        let sql = format!(
            "UPDATE {} SET {} WHERE {pk_column} = ?",
            map.table(),
            sets.join(", ")
        );
        self.execute(Statement::new(sql, args)).await
    }

    /// One multi-row INSERT for `records`. An empty slice issues nothing.
    pub async fn bulk_insert<R: Record>(&self, records: &[R]) -> OrmResult<ExecResult> {
        let refs: Vec<&dyn AnyRecord> = records.iter().map(|r| r as &dyn AnyRecord).collect();
        self.bulk_insert_dyn(&refs).await
    }

    /// Like [`bulk_insert`](Self::bulk_insert) for type-erased records.
    ///
    /// The column shape comes from the first record; a record of any other type
    /// fails the whole call with `OrmError::UnsupportedShape`.
    pub async fn bulk_insert_dyn(&self, records: &[&dyn AnyRecord]) -> OrmResult<ExecResult> {
        let Some(first) = records.first() else {
            return Ok(ExecResult::default());
        };
        let map = first.record_field_map();
        if map.non_key_indices().next().is_none() {
            return Err(OrmError::Other(format!(
                "{} has no insertable columns",
                map.table()
            )));
        }
        let stmt = insert_statement(&map, records)?;
        self.execute(stmt).await
    }
}

/// Table and column names reach SQL verbatim, so each must pass validation first.
fn check_identifiers(map: &FieldMap) -> OrmResult<()> {
    validate_table_name(map.table())?;
    for field in map.fields() {
        validate_column_name(field.column)?;
    }
    Ok(())
}

fn primary_key_of<R: Record>(map: &FieldMap, record: &R) -> OrmResult<(&'static str, Value)> {
    let missing = || OrmError::PrimaryKeyMissing(map.table().to_string());
    let pk = map.primary_key_index().ok_or_else(missing)?;
    let value = record.value_at(pk)?;
    if value.is_null() {
        return Err(missing());
    }
    Ok((map.fields()[pk].column, value))
}

/// `INSERT INTO t (non-key columns) VALUES (…), (…)` for records shaped like `map`.
fn insert_statement(map: &FieldMap, records: &[&dyn AnyRecord]) -> OrmResult<Statement> {
    check_identifiers(map)?;
    let indices: Vec<usize> = map.non_key_indices().collect();
    if indices.is_empty() {
        return Ok(Statement::new(
            format!("INSERT INTO {} DEFAULT VALUES", map.table()),
            Vec::new(),
        ));
    }

    let columns: Vec<&str> = indices.iter().map(|&i| map.fields()[i].column).collect();
    let row_marks = format!("({})", vec!["?"; indices.len()].join(", "));

    let mut rows = Vec::with_capacity(records.len());
    let mut args = Vec::with_capacity(records.len() * indices.len());
    let expected = records.first().map(|r| r.record_type());
    for record in records {
        if Some(record.record_type()) != expected {
            return Err(OrmError::UnsupportedShape(format!(
                "bulk insert into {} expects {}, got {}",
                map.table(),
                map.type_name(),
                record.record_type_name()
            )));
        }
        for &i in &indices {
            args.push(record.record_value(i)?);
        }
        rows.push(row_marks.as_str());
    }

    Ok(Statement::new(
        format!(
            "INSERT INTO {} ({}) VALUES {}",
            map.table(),
            columns.join(", "),
            rows.join(", ")
        ),
        args,
    ))
}
