use indexmap::IndexMap;

use crate::{Result, Value, ValueType};

/// Metadata for one column of a prepared statement's result set.
pub struct Column<'stmt> {
    pub name: &'stmt str,
    pub decl_type: Option<&'stmt str>,
}

impl Column<'_> {
    /// Returns the name assigned to the column in the result set.
    pub fn name(&self) -> &str {
        self.name
    }

    /// Returns the declared type of the column (`None` for expressions).
    pub fn decl_type(&self) -> Option<&str> {
        self.decl_type
    }
}

pub(crate) trait RowsInner {
    fn next(&mut self) -> Result<Option<Row>>;

    fn column_count(&self) -> i32;

    fn column_name(&self, idx: i32) -> Option<&str>;

    fn column_type(&self, idx: i32) -> Result<ValueType>;
}

/// A lazy, finite, non-restartable stream of rows.
///
/// The stream holds its statement's cursor until it is drained or
/// dropped; starting a second traversal first fails with
/// [`crate::Error::StatementBusy`].
pub struct Rows {
    pub(crate) inner: Box<dyn RowsInner + Send + Sync>,
}

impl std::fmt::Debug for Rows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rows").finish_non_exhaustive()
    }
}

impl Rows {
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<Row>> {
        self.inner.next()
    }

    pub fn column_count(&self) -> i32 {
        self.inner.column_count()
    }

    pub fn column_name(&self, idx: i32) -> Option<&str> {
        self.inner.column_name(idx)
    }

    pub fn column_type(&self, idx: i32) -> Result<ValueType> {
        self.inner.column_type(idx)
    }
}

/// A single result row.
///
/// A row serves both shapes the driver offers: positional access via
/// [`get`](Row::get)/[`into_values`](Row::into_values) and name-keyed
/// access via [`get_named`](Row::get_named)/[`into_map`](Row::into_map).
pub struct Row {
    pub(crate) inner: Box<dyn RowInner + Send + Sync>,
}

impl Row {
    pub fn get<T>(&self, idx: i32) -> Result<T>
    where
        T: FromValue,
    {
        let val = self.inner.column_value(idx)?;
        T::from_sql(val)
    }

    pub fn get_value(&self, idx: i32) -> Result<Value> {
        self.inner.column_value(idx)
    }

    /// Cell for the given result-set column name. When several columns
    /// share a name the last occurrence wins.
    pub fn get_named(&self, name: &str) -> Result<Value> {
        let mut found = None;
        for idx in 0..self.column_count() {
            if self.column_name(idx) == Some(name) {
                found = Some(idx);
            }
        }
        match found {
            Some(idx) => self.get_value(idx),
            None => Err(crate::Error::InvalidColumnName(name.to_string())),
        }
    }

    pub fn column_count(&self) -> i32 {
        self.inner.column_count()
    }

    pub fn column_name(&self, idx: i32) -> Option<&str> {
        self.inner.column_name(idx)
    }

    pub fn column_type(&self, idx: i32) -> Result<ValueType> {
        self.inner.column_type(idx)
    }

    /// The positional shape: cells in column order.
    pub fn into_values(self) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(self.column_count() as usize);
        for idx in 0..self.column_count() {
            values.push(self.get_value(idx)?);
        }
        Ok(values)
    }

    /// The name-keyed shape, preserving column order in iteration.
    ///
    /// A duplicated column name keeps its first position but the later
    /// occurrence overwrites the earlier cell.
    pub fn into_map(self) -> Result<IndexMap<String, Value>> {
        let mut map = IndexMap::with_capacity(self.column_count() as usize);
        for idx in 0..self.column_count() {
            let name = self
                .column_name(idx)
                .ok_or(crate::Error::InvalidColumnIndex)?
                .to_string();
            map.insert(name, self.get_value(idx)?);
        }
        Ok(map)
    }
}

impl std::fmt::Debug for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut dbg_map = f.debug_map();
        for idx in 0..self.column_count() {
            dbg_map.key(&self.column_name(idx));
            dbg_map.value(&self.get_value(idx));
        }
        dbg_map.finish()
    }
}

/// Conversion of a dynamically typed cell into a concrete host type.
pub trait FromValue {
    fn from_sql(val: Value) -> Result<Self>
    where
        Self: Sized;
}

impl FromValue for Value {
    fn from_sql(val: Value) -> Result<Self> {
        Ok(val)
    }
}

impl FromValue for i32 {
    fn from_sql(val: Value) -> Result<Self> {
        match val {
            Value::Null => Err(crate::Error::NullValue),
            Value::Integer(i) => Ok(i as i32),
            _ => Err(crate::Error::InvalidColumnType),
        }
    }
}

impl FromValue for u32 {
    fn from_sql(val: Value) -> Result<Self> {
        match val {
            Value::Null => Err(crate::Error::NullValue),
            Value::Integer(i) => Ok(i as u32),
            _ => Err(crate::Error::InvalidColumnType),
        }
    }
}

impl FromValue for i64 {
    fn from_sql(val: Value) -> Result<Self> {
        match val {
            Value::Null => Err(crate::Error::NullValue),
            Value::Integer(i) => Ok(i),
            _ => Err(crate::Error::InvalidColumnType),
        }
    }
}

impl FromValue for u64 {
    fn from_sql(val: Value) -> Result<Self> {
        match val {
            Value::Null => Err(crate::Error::NullValue),
            Value::Integer(i) => Ok(i as u64),
            _ => Err(crate::Error::InvalidColumnType),
        }
    }
}

impl FromValue for f64 {
    fn from_sql(val: Value) -> Result<Self> {
        match val {
            Value::Null => Err(crate::Error::NullValue),
            Value::Real(f) => Ok(f),
            Value::Integer(i) => Ok(i as f64),
            _ => Err(crate::Error::InvalidColumnType),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_sql(val: Value) -> Result<Self> {
        match val {
            Value::Null => Err(crate::Error::NullValue),
            Value::Blob(blob) => Ok(blob),
            _ => Err(crate::Error::InvalidColumnType),
        }
    }
}

impl FromValue for String {
    fn from_sql(val: Value) -> Result<Self> {
        match val {
            Value::Null => Err(crate::Error::NullValue),
            Value::Text(s) => Ok(s),
            _ => Err(crate::Error::InvalidColumnType),
        }
    }
}

impl FromValue for bool {
    fn from_sql(val: Value) -> Result<Self> {
        match val {
            Value::Null => Err(crate::Error::NullValue),
            Value::Integer(0) => Ok(false),
            Value::Integer(1) => Ok(true),
            Value::Integer(_) => Err(crate::Error::InvalidColumnType),
            _ => Err(crate::Error::InvalidColumnType),
        }
    }
}

impl<T> FromValue for Option<T>
where
    T: FromValue,
{
    fn from_sql(val: Value) -> Result<Self> {
        match val {
            Value::Null => Ok(None),
            _ => T::from_sql(val).map(Some),
        }
    }
}

pub(crate) trait RowInner {
    fn column_value(&self, idx: i32) -> Result<Value>;
    fn column_name(&self, idx: i32) -> Option<&str>;
    fn column_type(&self, idx: i32) -> Result<ValueType>;
    fn column_count(&self) -> i32;
}
