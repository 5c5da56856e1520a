use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use litesql_sys::ffi;

use crate::local::Statement;
use crate::rows::FromValue;
use crate::value::read_value;
use crate::{errors, Error, Result, Value, ValueType};

/// A lazy stream over a statement's result rows.
///
/// The stream is finite and not restartable; it owns its statement's
/// cursor until it is drained or dropped, at which point the statement
/// is reset and may be queried again.
#[derive(Debug)]
pub struct Rows {
    stmt: Statement,
    done: AtomicBool,
}

impl Rows {
    pub(crate) fn new(stmt: Statement) -> Rows {
        Rows {
            stmt,
            done: AtomicBool::new(false),
        }
    }

    pub fn next(&self) -> Result<Option<Row>> {
        if self.done.load(Ordering::SeqCst) {
            return Ok(None);
        }
        match self.stmt.inner.step() {
            ffi::SQLITE_ROW => Ok(Some(Row {
                stmt: self.stmt.clone(),
            })),
            ffi::SQLITE_OK | ffi::SQLITE_DONE => {
                self.finish();
                Ok(None)
            }
            _ => {
                let err = errors::last_error(self.stmt.conn.raw);
                self.finish();
                Err(err)
            }
        }
    }

    fn finish(&self) {
        if !self.done.swap(true, Ordering::SeqCst) {
            self.stmt.end_stream();
        }
    }

    pub fn column_count(&self) -> i32 {
        self.stmt.column_count() as i32
    }

    pub fn column_name(&self, idx: i32) -> Option<&str> {
        self.stmt.column_name(idx as usize)
    }

    pub fn column_type(&self, idx: i32) -> Result<ValueType> {
        ValueType::try_from(self.stmt.inner.column_type(idx))
            .map_err(|_| Error::InvalidColumnIndex)
    }
}

impl Drop for Rows {
    fn drop(&mut self) {
        self.finish();
    }
}

impl AsRef<Statement> for Rows {
    fn as_ref(&self) -> &Statement {
        &self.stmt
    }
}

/// A row positioned under the statement's cursor; its cells are only
/// readable until the stream advances.
pub struct Row {
    pub(crate) stmt: Statement,
}

impl Row {
    pub fn get<T>(&self, idx: i32) -> Result<T>
    where
        T: FromValue,
    {
        T::from_sql(self.get_value(idx)?)
    }

    pub fn get_value(&self, idx: i32) -> Result<Value> {
        if idx < 0 || idx as usize >= self.stmt.column_count() {
            return Err(Error::InvalidColumnIndex);
        }
        let raw = self.stmt.inner.column_value(idx);
        Ok(unsafe { read_value(raw, self.stmt.int64) })
    }

    pub fn column_count(&self) -> i32 {
        self.stmt.column_count() as i32
    }

    pub fn column_name(&self, idx: i32) -> Option<&str> {
        self.stmt.column_name(idx as usize)
    }

    pub fn column_type(&self, idx: i32) -> Result<ValueType> {
        ValueType::try_from(self.stmt.inner.column_type(idx))
            .map_err(|_| Error::InvalidColumnIndex)
    }

    /// Copy the cursor row into an owned row that outlives the stream.
    pub fn materialize(&self) -> Result<MaterializedRow> {
        let n = self.column_count();
        let mut cols = Vec::with_capacity(n as usize);
        let mut values = Vec::with_capacity(n as usize);
        for idx in 0..n {
            cols.push(
                self.column_name(idx)
                    .ok_or(Error::InvalidColumnIndex)?
                    .to_string(),
            );
            values.push(self.get_value(idx)?);
        }
        Ok(MaterializedRow {
            cols: Arc::new(cols),
            values,
        })
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> std::result::Result<(), fmt::Error> {
        let mut dbg_map = f.debug_map();
        for column in 0..self.column_count() {
            dbg_map.key(&self.column_name(column));
            dbg_map.value(&self.get_value(column));
        }
        dbg_map.finish()
    }
}

/// An owned row: column names plus cells, detached from the statement.
#[derive(Debug, Clone)]
pub struct MaterializedRow {
    cols: Arc<Vec<String>>,
    values: Vec<Value>,
}

impl MaterializedRow {
    pub fn column_count(&self) -> i32 {
        self.cols.len() as i32
    }

    pub fn column_name(&self, idx: i32) -> Option<&str> {
        self.cols.get(idx as usize).map(String::as_str)
    }

    pub fn get_value(&self, idx: i32) -> Result<Value> {
        self.values
            .get(idx as usize)
            .cloned()
            .ok_or(Error::InvalidColumnIndex)
    }

    pub fn column_type(&self, idx: i32) -> Result<ValueType> {
        self.values
            .get(idx as usize)
            .map(Value::value_type)
            .ok_or(Error::InvalidColumnIndex)
    }
}
