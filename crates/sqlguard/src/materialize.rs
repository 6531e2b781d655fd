//! Populate destinations from a row cursor.
//!
//! A destination resolves the result columns once into a [`ColumnPlan`] and is
//! then fed one row at a time. Columns without a matching field are ignored, so
//! `SELECT *` may over-fetch into a narrower record.

use crate::client::RowCursor;
use crate::error::{OrmError, OrmResult};
use crate::record::{Record, field_map};
use crate::value::Value;
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

/// Result columns resolved against a destination's fields.
#[derive(Debug, Clone, Default)]
pub struct ColumnPlan {
    columns: Vec<String>,
    targets: Vec<Option<usize>>,
}

impl ColumnPlan {
    /// Plan for a record type: each column maps to its field index, if any.
    pub fn for_record<R: Record>(columns: &[String]) -> Self {
        let map = field_map::<R>();
        Self {
            columns: columns.to_vec(),
            targets: columns.iter().map(|c| map.index_of(c)).collect(),
        }
    }

    /// Plan keeping every column by position.
    pub fn passthrough(columns: &[String]) -> Self {
        Self {
            columns: columns.to_vec(),
            targets: (0..columns.len()).map(Some).collect(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Per column, whether any field reads it.
    pub fn wanted(&self) -> Vec<bool> {
        self.targets.iter().map(Option::is_some).collect()
    }

    /// Number of columns that resolved to a target.
    pub fn matched(&self) -> usize {
        self.targets.iter().filter(|t| t.is_some()).count()
    }

    fn targets(&self) -> impl Iterator<Item = (usize, &str, usize)> + '_ {
        self.targets
            .iter()
            .zip(&self.columns)
            .enumerate()
            .filter_map(|(pos, (target, column))| target.map(|t| (pos, column.as_str(), t)))
    }
}

/// Something a result set can be materialized into.
pub trait Destination {
    /// Table of the destination's record type, used when the builder has no
    /// explicit table or record binding.
    fn record_table(&self) -> Option<&'static str>;

    /// Whether only the first row is consumed.
    fn is_single(&self) -> bool {
        false
    }

    fn plan(&self, columns: &[String]) -> ColumnPlan;

    fn accept(&mut self, plan: &ColumnPlan, row: Vec<Value>) -> OrmResult<()>;
}

/// Assign every planned cell of `row` into `record`.
pub fn populate<R: Record>(record: &mut R, plan: &ColumnPlan, row: &[Value]) -> OrmResult<()> {
    for (pos, column, field) in plan.targets() {
        let raw = row.get(pos).unwrap_or(&Value::Null);
        record
            .assign(field, raw)
            .map_err(|e| OrmError::decode(column, e))?;
    }
    Ok(())
}

fn record_from_row<R: Record>(plan: &ColumnPlan, row: &[Value]) -> OrmResult<R> {
    let mut record = R::default();
    populate(&mut record, plan, row)?;
    Ok(record)
}

impl<R: Record> Destination for Option<R> {
    fn record_table(&self) -> Option<&'static str> {
        Some(R::table_name())
    }

    fn is_single(&self) -> bool {
        true
    }

    fn plan(&self, columns: &[String]) -> ColumnPlan {
        ColumnPlan::for_record::<R>(columns)
    }

    fn accept(&mut self, plan: &ColumnPlan, row: Vec<Value>) -> OrmResult<()> {
        let record = self.get_or_insert_with(R::default);
        populate(record, plan, &row)
    }
}

impl<R: Record> Destination for Vec<R> {
    fn record_table(&self) -> Option<&'static str> {
        Some(R::table_name())
    }

    fn plan(&self, columns: &[String]) -> ColumnPlan {
        ColumnPlan::for_record::<R>(columns)
    }

    fn accept(&mut self, plan: &ColumnPlan, row: Vec<Value>) -> OrmResult<()> {
        self.push(record_from_row(plan, &row)?);
        Ok(())
    }
}

/// Column name to normalized textual cell (`None` for NULL).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowMap(BTreeMap<String, Option<String>>);

impl RowMap {
    fn from_row(plan: &ColumnPlan, row: Vec<Value>) -> Self {
        let cells = plan
            .columns
            .iter()
            .cloned()
            .zip(row.into_iter().map(|v| v.to_text()))
            .collect();
        Self(cells)
    }

    /// Text of `column`, `None` when NULL or absent.
    pub fn text(&self, column: &str) -> Option<&str> {
        self.0.get(column).and_then(|v| v.as_deref())
    }

    pub fn into_inner(self) -> BTreeMap<String, Option<String>> {
        self.0
    }
}

impl Deref for RowMap {
    type Target = BTreeMap<String, Option<String>>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for RowMap {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Destination for Option<RowMap> {
    fn record_table(&self) -> Option<&'static str> {
        None
    }

    fn is_single(&self) -> bool {
        true
    }

    fn plan(&self, columns: &[String]) -> ColumnPlan {
        ColumnPlan::passthrough(columns)
    }

    fn accept(&mut self, plan: &ColumnPlan, row: Vec<Value>) -> OrmResult<()> {
        *self = Some(RowMap::from_row(plan, row));
        Ok(())
    }
}

impl Destination for Vec<RowMap> {
    fn record_table(&self) -> Option<&'static str> {
        None
    }

    fn plan(&self, columns: &[String]) -> ColumnPlan {
        ColumnPlan::passthrough(columns)
    }

    fn accept(&mut self, plan: &ColumnPlan, row: Vec<Value>) -> OrmResult<()> {
        self.push(RowMap::from_row(plan, row));
        Ok(())
    }
}

/// Drain `cursor` into `dest`, returning the number of rows consumed.
///
/// Only planned columns are decoded, so an unmapped column of a type with no
/// [`Value`] form never fails the scan. Single destinations stop after the first
/// row; the cursor is dropped by the caller on every path.
pub async fn materialize<D>(cursor: &mut RowCursor, dest: &mut D) -> OrmResult<usize>
where
    D: Destination + ?Sized,
{
    let plan = dest.plan(cursor.columns());
    let wanted = plan.wanted();
    let mut consumed = 0;
    while let Some(row) = cursor.next_row_projected(&wanted).await? {
        dest.accept(&plan, row)?;
        consumed += 1;
        if dest.is_single() {
            break;
        }
    }
    Ok(consumed)
}
