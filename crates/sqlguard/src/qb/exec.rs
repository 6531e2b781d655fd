use super::QueryBuilder;
use crate::client::GenericClient;
use crate::context::run_logged;
use crate::decode::convert_assign;
use crate::error::{OrmError, OrmResult};
use crate::materialize::{Destination, materialize};
use crate::record::Record;

impl QueryBuilder {
    /// `SELECT COUNT(1)` over the current filters.
    pub async fn count<C: GenericClient + ?Sized>(&self, conn: &C) -> OrmResult<i64> {
        let table = self.table_name().ok_or(OrmError::NoRecordBinding)?;
        let stmt = self.build_for(table, true);
        let raw = run_logged(
            &self.ctx,
            conn,
            self.dialect,
            &stmt.sql,
            &stmt.args,
            conn.query_scalar(&stmt.sql, &stmt.args),
        )
        .await?;
        convert_assign::<i64>(&raw).map_err(|e| OrmError::decode("count", e))
    }

    /// Run the SELECT and materialize the rows into `dest`.
    ///
    /// The table comes from `table()`, then the bound record, then the
    /// destination's record type. Returns the number of rows consumed; zero
    /// rows leave `dest` untouched.
    pub async fn scan<C, D>(&self, conn: &C, dest: &mut D) -> OrmResult<usize>
    where
        C: GenericClient + ?Sized,
        D: Destination + ?Sized,
    {
        let table = self
            .table_name()
            .or(dest.record_table())
            .ok_or(OrmError::NoRecordBinding)?;
        let stmt = self.build_for(table, false);
        run_logged(&self.ctx, conn, self.dialect, &stmt.sql, &stmt.args, async {
            let mut cursor = conn.query_cursor(&stmt.sql, &stmt.args).await?;
            materialize(&mut cursor, dest).await
        })
        .await
    }

    /// Like [`scan`](Self::scan) with `LIMIT 1` unless a limit is already set.
    ///
    /// Returns `OrmError::NotFound` when no row matches.
    pub async fn first<C, D>(&self, conn: &C, dest: &mut D) -> OrmResult<()>
    where
        C: GenericClient + ?Sized,
        D: Destination + ?Sized,
    {
        let query = if self.limit.is_none() {
            self.limit(1)
        } else {
            self.clone()
        };
        match query.scan(conn, dest).await? {
            0 => Err(OrmError::not_found("Expected one row, got none")),
            _ => Ok(()),
        }
    }

    /// Every matching row as `R`.
    pub async fn fetch_all<R, C>(&self, conn: &C) -> OrmResult<Vec<R>>
    where
        R: Record,
        C: GenericClient + ?Sized,
    {
        let mut rows = Vec::new();
        self.scan(conn, &mut rows).await?;
        Ok(rows)
    }

    /// The first matching row as `R`, or `OrmError::NotFound`.
    pub async fn fetch_one<R, C>(&self, conn: &C) -> OrmResult<R>
    where
        R: Record,
        C: GenericClient + ?Sized,
    {
        let mut row: Option<R> = None;
        self.first(conn, &mut row).await?;
        row.ok_or_else(|| OrmError::not_found("Expected one row, got none"))
    }

    /// The first matching row as `R`, if any.
    pub async fn fetch_optional<R, C>(&self, conn: &C) -> OrmResult<Option<R>>
    where
        R: Record,
        C: GenericClient + ?Sized,
    {
        match self.fetch_one(conn).await {
            Ok(row) => Ok(Some(row)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
