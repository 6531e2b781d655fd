//! Execution collaborator seam.
//!
//! The builder and mutation helpers never talk to a driver directly. They hand
//! finished statement text and positional [`Value`]s to a [`GenericClient`] and get
//! back either a forward-only [`RowCursor`] or an [`ExecResult`].

use crate::error::{OrmError, OrmResult};
use crate::value::{Value, values_from_row};
use futures_core::Stream;
use futures_util::StreamExt;
use std::pin::Pin;
use tokio_postgres::types::ToSql;

/// Outcome of a statement that returns no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Generated key reported by drivers without `RETURNING` support.
    pub last_insert_id: Option<i64>,
}

/// A result row whose cells may still be in driver form.
enum RawRow {
    Values(Vec<Value>),
    Postgres(tokio_postgres::Row),
}

impl RawRow {
    fn decode(self, wanted: Option<&[bool]>) -> OrmResult<Vec<Value>> {
        match self {
            Self::Values(values) => Ok(values),
            Self::Postgres(row) => values_from_row(&row, wanted),
        }
    }
}

type RowItems = Pin<Box<dyn Stream<Item = OrmResult<RawRow>> + Send>>;

/// Forward-only handle over a result set.
///
/// Dropping the cursor releases the underlying stream (and with it the
/// connection's portal), so every exit path of a scan closes it.
pub struct RowCursor {
    columns: Vec<String>,
    rows: RowItems,
    done: bool,
}

impl RowCursor {
    /// Wrap any compatible row stream.
    pub fn new<S>(columns: Vec<String>, rows: S) -> Self
    where
        S: Stream<Item = OrmResult<Vec<Value>>> + Send + 'static,
    {
        Self {
            columns,
            rows: Box::pin(rows.map(|row| row.map(RawRow::Values))),
            done: false,
        }
    }

    fn from_postgres<S>(columns: Vec<String>, rows: S) -> Self
    where
        S: Stream<Item = Result<tokio_postgres::Row, tokio_postgres::Error>> + Send + 'static,
    {
        let rows = rows.map(|row| row.map(RawRow::Postgres).map_err(OrmError::from_db_error));
        Self {
            columns,
            rows: Box::pin(rows),
            done: false,
        }
    }

    /// A cursor over already materialized rows.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self::new(columns, futures_util::stream::iter(rows.into_iter().map(Ok)))
    }

    /// Result column names, in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Next row, or `None` once exhausted. After an error the cursor is finished.
    pub async fn next_row(&mut self) -> OrmResult<Option<Vec<Value>>> {
        self.advance(None).await
    }

    /// Like [`next_row`](Self::next_row), but only cells flagged in `wanted` are
    /// decoded from driver form. The others read as NULL.
    pub async fn next_row_projected(&mut self, wanted: &[bool]) -> OrmResult<Option<Vec<Value>>> {
        self.advance(Some(wanted)).await
    }

    async fn advance(&mut self, wanted: Option<&[bool]>) -> OrmResult<Option<Vec<Value>>> {
        if self.done {
            return Ok(None);
        }
        let decoded = match self.rows.next().await {
            Some(row) => row.and_then(|row| row.decode(wanted)).map(Some),
            None => Ok(None),
        };
        match decoded {
            Ok(Some(row)) => Ok(Some(row)),
            Err(e) => {
                self.done = true;
                Err(e)
            }
            Ok(None) => {
                self.done = true;
                Ok(None)
            }
        }
    }

    /// Release the cursor explicitly.
    pub fn close(self) {}
}

impl std::fmt::Debug for RowCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowCursor")
            .field("columns", &self.columns)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

/// A trait that unifies database clients and transactions.
///
/// This allows the builder and writer to accept either a direct client connection
/// or a transaction, making it easy to compose operations within transactions.
pub trait GenericClient: Send + Sync {
    /// Driver type name, used for placeholder dialect detection.
    fn driver_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Execute a query and return a cursor over its rows.
    fn query_cursor(
        &self,
        sql: &str,
        args: &[Value],
    ) -> impl std::future::Future<Output = OrmResult<RowCursor>> + Send;

    /// First cell of the first row.
    ///
    /// Returns `OrmError::NotFound` if no rows are returned.
    fn query_scalar(
        &self,
        sql: &str,
        args: &[Value],
    ) -> impl std::future::Future<Output = OrmResult<Value>> + Send {
        async move {
            let mut cursor = self.query_cursor(sql, args).await?;
            let row = cursor
                .next_row()
                .await?
                .ok_or_else(|| OrmError::not_found("Expected one row, got none"))?;
            row.into_iter()
                .next()
                .ok_or_else(|| OrmError::not_found("Expected one column, got none"))
        }
    }

    /// Execute a statement and return the affected row count.
    fn execute(
        &self,
        sql: &str,
        args: &[Value],
    ) -> impl std::future::Future<Output = OrmResult<ExecResult>> + Send;

    /// Get a cancel token for server-side query cancellation.
    ///
    /// Returns `None` if the client type does not support cancellation.
    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        None
    }
}

fn params(args: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    args.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

fn column_names(stmt: &tokio_postgres::Statement) -> Vec<String> {
    stmt.columns().iter().map(|c| c.name().to_string()).collect()
}

impl GenericClient for tokio_postgres::Client {
    async fn query_cursor(&self, sql: &str, args: &[Value]) -> OrmResult<RowCursor> {
        let stmt = tokio_postgres::Client::prepare(self, sql)
            .await
            .map_err(OrmError::from_db_error)?;
        let stream = tokio_postgres::Client::query_raw(self, &stmt, params(args).iter().copied())
            .await
            .map_err(OrmError::from_db_error)?;
        Ok(RowCursor::from_postgres(column_names(&stmt), stream))
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> OrmResult<ExecResult> {
        let rows_affected = tokio_postgres::Client::execute(self, sql, &params(args))
            .await
            .map_err(OrmError::from_db_error)?;
        Ok(ExecResult {
            rows_affected,
            last_insert_id: None,
        })
    }

    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        Some(tokio_postgres::Client::cancel_token(self))
    }
}

impl GenericClient for tokio_postgres::Transaction<'_> {
    async fn query_cursor(&self, sql: &str, args: &[Value]) -> OrmResult<RowCursor> {
        let stmt = tokio_postgres::Transaction::prepare(self, sql)
            .await
            .map_err(OrmError::from_db_error)?;
        let stream =
            tokio_postgres::Transaction::query_raw(self, &stmt, params(args).iter().copied())
                .await
                .map_err(OrmError::from_db_error)?;
        Ok(RowCursor::from_postgres(column_names(&stmt), stream))
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> OrmResult<ExecResult> {
        let rows_affected = tokio_postgres::Transaction::execute(self, sql, &params(args))
            .await
            .map_err(OrmError::from_db_error)?;
        Ok(ExecResult {
            rows_affected,
            last_insert_id: None,
        })
    }

    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        Some(tokio_postgres::Transaction::cancel_token(self))
    }
}

// ===== deadpool-postgres support =====

#[cfg(feature = "pool")]
impl GenericClient for deadpool_postgres::Client {
    fn driver_name(&self) -> &'static str {
        std::any::type_name::<deadpool_postgres::Client>()
    }

    async fn query_cursor(&self, sql: &str, args: &[Value]) -> OrmResult<RowCursor> {
        // Delegate to the deref target (ClientWrapper / tokio_postgres::Client).
        GenericClient::query_cursor(&**self, sql, args).await
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> OrmResult<ExecResult> {
        GenericClient::execute(&**self, sql, args).await
    }

    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        GenericClient::cancel_token(&**self)
    }
}

#[cfg(feature = "pool")]
impl GenericClient for deadpool_postgres::ClientWrapper {
    async fn query_cursor(&self, sql: &str, args: &[Value]) -> OrmResult<RowCursor> {
        GenericClient::query_cursor(&**self, sql, args).await
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> OrmResult<ExecResult> {
        GenericClient::execute(&**self, sql, args).await
    }

    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        GenericClient::cancel_token(&**self)
    }
}

#[cfg(feature = "pool")]
impl GenericClient for deadpool_postgres::Transaction<'_> {
    async fn query_cursor(&self, sql: &str, args: &[Value]) -> OrmResult<RowCursor> {
        GenericClient::query_cursor(&**self, sql, args).await
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> OrmResult<ExecResult> {
        GenericClient::execute(&**self, sql, args).await
    }

    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        GenericClient::cancel_token(&**self)
    }
}

impl<C: GenericClient + ?Sized> GenericClient for &C {
    fn driver_name(&self) -> &'static str {
        (**self).driver_name()
    }

    async fn query_cursor(&self, sql: &str, args: &[Value]) -> OrmResult<RowCursor> {
        (**self).query_cursor(sql, args).await
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> OrmResult<ExecResult> {
        (**self).execute(sql, args).await
    }

    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        (**self).cancel_token()
    }
}
