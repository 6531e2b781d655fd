//! Destination record metadata and the process-wide field-map cache.
//!
//! A record type declares its table and an ordered field-descriptor table once
//! (usually through `#[derive(Record)]`). [`FieldMap`] indexes that table by
//! normalized column name and is memoized per type in a [`FieldMapCache`].

use crate::decode::{FieldKind, FromValue};
use crate::error::{DecodeError, OrmResult};
use crate::validate::validate_column_name;
use crate::value::Value;
use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock, RwLock};

/// Static metadata for one record field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Logical (Rust) field name.
    pub name: &'static str,
    /// Physical column name.
    pub column: &'static str,
    pub primary_key: bool,
    pub kind: FieldKind,
    pub nullable: bool,
}

impl FieldDescriptor {
    /// Describe a field of type `T`.
    pub fn of<T: FromValue>(name: &'static str, column: &'static str) -> Self {
        Self {
            name,
            column,
            primary_key: false,
            kind: T::KIND,
            nullable: T::NULLABLE,
        }
    }

    /// Mark the field as the primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }
}

/// A statically described destination record.
///
/// Field indices passed to [`Record::assign`] and [`Record::value_at`] are
/// positions in the vector returned by [`Record::fields`].
pub trait Record: Default + Send + Sync + 'static {
    /// Physical table name.
    fn table_name() -> &'static str;

    /// Ordered field-descriptor table. Ignored fields are not listed.
    fn fields() -> Vec<FieldDescriptor>;

    /// Coerce `raw` into the field at `index`.
    fn assign(&mut self, index: usize, raw: &Value) -> Result<(), DecodeError>;

    /// Current value of the field at `index`, for binding into a statement.
    fn value_at(&self, index: usize) -> OrmResult<Value>;
}

/// Strip quotes, drop any `table.` qualifier, lower-case.
pub fn normalize_column(name: &str) -> String {
    let trimmed = name.trim().trim_matches(|c| c == '"' || c == '`');
    let unqualified = match trimmed.rfind('.') {
        Some(pos) => &trimmed[pos + 1..],
        None => trimmed,
    };
    unqualified
        .trim_matches(|c| c == '"' || c == '`')
        .to_lowercase()
}

/// Column index for one record type.
#[derive(Debug, Clone)]
pub struct FieldMap {
    type_name: &'static str,
    table: &'static str,
    fields: Vec<FieldDescriptor>,
    by_column: HashMap<String, usize>,
    primary_key: Option<usize>,
}

impl FieldMap {
    /// Derive the map for `R` without consulting the cache.
    pub fn build<R: Record>() -> Self {
        let fields = R::fields();
        let by_column = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (normalize_column(f.column), i))
            .collect();
        let primary_key = fields.iter().position(|f| f.primary_key);
        Self {
            type_name: std::any::type_name::<R>(),
            table: R::table_name(),
            fields,
            by_column,
            primary_key,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Field index for a result column (normalized before lookup).
    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.by_column.get(&normalize_column(column)).copied()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.index_of(column).is_some()
    }

    pub fn primary_key_index(&self) -> Option<usize> {
        self.primary_key
    }

    pub fn primary_key_column(&self) -> Option<&'static str> {
        self.primary_key.map(|i| self.fields[i].column)
    }

    /// Field indices in declaration order, primary key excluded.
    pub fn non_key_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.fields.len()).filter(move |i| Some(*i) != self.primary_key)
    }

    /// Logical field name to column, for columns passing [`validate_column_name`].
    ///
    /// Suitable as an allow-list when mapping user-facing sort/filter keys to columns.
    pub fn allowed_fields(&self) -> BTreeMap<String, String> {
        self.fields
            .iter()
            .filter(|f| validate_column_name(f.column).is_ok())
            .map(|f| (f.name.to_string(), f.column.to_string()))
            .collect()
    }
}

/// Memoized [`FieldMap`]s keyed by record type identity.
#[derive(Debug, Default)]
pub struct FieldMapCache {
    maps: RwLock<HashMap<TypeId, Arc<FieldMap>>>,
}

impl FieldMapCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache.
    pub fn global() -> &'static FieldMapCache {
        static CACHE: OnceLock<FieldMapCache> = OnceLock::new();
        CACHE.get_or_init(FieldMapCache::new)
    }

    /// Cached map for `R`, derived on first use.
    pub fn get<R: Record>(&self) -> Arc<FieldMap> {
        let key = TypeId::of::<R>();
        if let Some(found) = self
            .maps
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            return Arc::clone(found);
        }

        let built = Arc::new(FieldMap::build::<R>());
        let mut maps = self.maps.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(maps.entry(key).or_insert(built))
    }

    pub fn contains<R: Record>(&self) -> bool {
        self.maps
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&TypeId::of::<R>())
    }

    pub fn len(&self) -> usize {
        self.maps.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached map. In-flight holders keep their `Arc`.
    pub fn clear(&self) {
        self.maps.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Cached field map for `R` from the process-wide cache.
pub fn field_map<R: Record>() -> Arc<FieldMap> {
    FieldMapCache::global().get::<R>()
}

/// Clear the process-wide field-map cache.
pub fn clear_field_map_cache() {
    FieldMapCache::global().clear();
}

/// Object-safe view of a [`Record`], used where records of one type are handled
/// behind `dyn` (bulk insert).
pub trait AnyRecord: Send + Sync {
    fn record_type(&self) -> TypeId;
    fn record_type_name(&self) -> &'static str;
    fn record_field_map(&self) -> Arc<FieldMap>;
    fn record_value(&self, index: usize) -> OrmResult<Value>;
}

impl<R: Record> AnyRecord for R {
    fn record_type(&self) -> TypeId {
        TypeId::of::<R>()
    }

    fn record_type_name(&self) -> &'static str {
        std::any::type_name::<R>()
    }

    fn record_field_map(&self) -> Arc<FieldMap> {
        field_map::<R>()
    }

    fn record_value(&self, index: usize) -> OrmResult<Value> {
        self.value_at(index)
    }
}
