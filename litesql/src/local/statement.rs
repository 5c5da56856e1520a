use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use litesql_sys::ffi;

use crate::local::rows::{MaterializedRow, Row};
use crate::local::{Connection, Rows};
use crate::params::Params;
use crate::value::MAX_SAFE_INTEGER;
use crate::{errors, Column, Error, Result, ValueRef};

/// A prepared statement.
#[derive(Debug, Clone)]
pub struct Statement {
    pub(crate) conn: Connection,
    pub(crate) inner: Arc<litesql_sys::Statement>,
    sql: String,
    pub(crate) int64: bool,

    /// Held while a row stream is in flight; a second traversal before
    /// the first drains is rejected with `StatementBusy`.
    streaming: Arc<AtomicBool>,
}

impl Statement {
    pub(crate) fn prepare(
        conn: Connection,
        raw: *mut ffi::sqlite3,
        sql: &str,
        int64: bool,
        readonly: bool,
    ) -> Result<Statement> {
        match unsafe { litesql_sys::prepare_stmt(raw, sql) } {
            Ok(stmt) => {
                if stmt.raw_stmt.is_null() {
                    return Err(Error::Misuse(format!("no SQL statement in `{sql}`")));
                }
                if readonly && !stmt.readonly() {
                    return Err(Error::Misuse(format!(
                        "statement writes to the database: `{sql}`"
                    )));
                }
                let inner = Arc::new(stmt);
                conn.register_stmt(Arc::downgrade(&inner));
                Ok(Statement {
                    conn,
                    inner,
                    sql: sql.to_string(),
                    int64,
                    streaming: Arc::new(AtomicBool::new(false)),
                })
            }
            Err(litesql_sys::Error::Code(_)) => Err(errors::last_error(raw)),
            Err(err) => Err(errors::sqlite_error(err.code(), err.to_string())),
        }
    }

    /// The source text this statement was compiled from.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    fn check_usable(&self) -> Result<()> {
        self.conn.check_open()?;
        if self.inner.is_finalized() {
            return Err(Error::Misuse("statement has been finalized".into()));
        }
        Ok(())
    }

    /// Fill parameter slots. `Params::None` leaves existing bindings in
    /// place; otherwise bindings are cleared first, so unsupplied
    /// trailing slots read as NULL.
    pub fn bind(&self, params: &Params) -> Result<()> {
        self.check_usable()?;
        match params {
            Params::None => Ok(()),
            Params::Positional(values) => {
                let expected = self.inner.bind_parameter_count();
                if values.len() > expected {
                    return Err(Error::TooManyParameters {
                        expected,
                        given: values.len(),
                    });
                }
                self.inner.clear_bindings();
                for (i, param) in values.iter().enumerate() {
                    self.bind_value(i as i32 + 1, param.into())?;
                }
                Ok(())
            }
            Params::Named(values) => {
                self.inner.clear_bindings();
                let mut bound: Vec<(i32, &str)> = Vec::with_capacity(values.len());
                for (name, param) in values {
                    let i = self.resolve_parameter_index(name)?;
                    if let Some((_, earlier)) = bound.iter().find(|(idx, _)| *idx == i) {
                        return Err(Error::DuplicateParameter(
                            earlier.to_string(),
                            name.clone(),
                        ));
                    }
                    bound.push((i, name.as_str()));
                    self.bind_value(i, param.into())?;
                }
                Ok(())
            }
        }
    }

    /// Accepts `:name`, `@name`, `$name` and `?NNN` forms; a bare name
    /// is tried under each prefix.
    fn resolve_parameter_index(&self, name: &str) -> Result<i32> {
        if matches!(name.chars().next(), Some(':' | '@' | '$' | '?')) {
            let i = self.inner.bind_parameter_index(name);
            if i > 0 {
                return Ok(i);
            }
        } else {
            for prefix in [':', '@', '$'] {
                let i = self.inner.bind_parameter_index(&format!("{prefix}{name}"));
                if i > 0 {
                    return Ok(i);
                }
            }
        }
        Err(Error::UnknownParameter(name.to_string()))
    }

    pub(crate) fn bind_value(&self, i: i32, param: ValueRef<'_>) -> Result<()> {
        let rc = match param {
            ValueRef::Null => self.inner.bind_null(i),
            ValueRef::Integer(value) => {
                if !self.int64 && value.unsigned_abs() > MAX_SAFE_INTEGER as u64 {
                    return Err(Error::IntegerOutOfRange(value));
                }
                self.inner.bind_int64(i, value)
            }
            ValueRef::Real(value) => self.inner.bind_double(i, value),
            ValueRef::Text(value) => self.inner.bind_text(i, value),
            ValueRef::Blob(value) => self.inner.bind_blob(i, value),
        };
        match rc {
            ffi::SQLITE_OK => Ok(()),
            _ => Err(errors::last_error(self.conn.raw)),
        }
    }

    /// Bind, step to completion and return the connection's change
    /// count. The statement is reset afterwards, preserving bindings.
    pub fn execute(&self, params: &Params) -> Result<u64> {
        if self.streaming.load(Ordering::SeqCst) {
            return Err(Error::StatementBusy);
        }
        self.bind(params)?;
        let rc = self.inner.step();
        let out = match rc {
            ffi::SQLITE_DONE => self.conn.changes(),
            ffi::SQLITE_ROW => Err(Error::ExecuteReturnedRows),
            _ => Err(errors::last_error(self.conn.raw)),
        };
        self.inner.reset();
        out
    }

    /// Bind and return a lazy row stream. The stream holds this
    /// statement's cursor until drained, reset or dropped.
    pub fn query(&self, params: &Params) -> Result<Rows> {
        self.check_usable()?;
        if self.streaming.swap(true, Ordering::SeqCst) {
            return Err(Error::StatementBusy);
        }
        if let Err(err) = self.bind(params) {
            self.streaming.store(false, Ordering::SeqCst);
            return Err(err);
        }
        Ok(Rows::new(self.clone()))
    }

    /// First row, materialized, or `None`; the statement is implicitly
    /// reset.
    pub fn query_one(&self, params: &Params) -> Result<Option<MaterializedRow>> {
        let rows = self.query(params)?;
        let row = match rows.next()? {
            Some(row) => Some(row.materialize()?),
            None => None,
        };
        Ok(row)
    }

    /// All rows, materialized in order; the statement is reset.
    pub fn query_all(&self, params: &Params) -> Result<Vec<MaterializedRow>> {
        let rows = self.query(params)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row.materialize()?);
        }
        Ok(out)
    }

    /// First row or `QueryReturnedNoRows`.
    pub fn query_row(&self, params: &Params) -> Result<MaterializedRow> {
        self.query_one(params)?.ok_or(Error::QueryReturnedNoRows)
    }

    /// Execute the query and map each row through `f`.
    pub fn query_map<F, T>(&self, params: &Params, f: F) -> Result<MappedRows<F>>
    where
        F: FnMut(Row) -> Result<T>,
    {
        let rows = self.query(params)?;

        Ok(MappedRows::new(rows, f))
    }

    /// Reset the prepared statement to its initial state, preserving
    /// bindings, and release any in-flight row stream.
    pub fn reset(&self) {
        self.inner.reset();
        self.streaming.store(false, Ordering::SeqCst);
    }

    pub(crate) fn end_stream(&self) {
        self.reset();
    }

    /// Release the compiled handle. Further use of this statement is an
    /// error, as is a second finalize.
    pub fn finalize(&self) -> Result<()> {
        if self.inner.is_finalized() {
            return Err(Error::Misuse("statement has been finalized".into()));
        }
        self.inner.finalize();
        Ok(())
    }

    pub fn parameter_count(&self) -> usize {
        self.inner.bind_parameter_count()
    }

    pub fn parameter_name(&self, index: i32) -> Option<&str> {
        self.inner.bind_parameter_name(index)
    }

    pub fn readonly(&self) -> bool {
        self.inner.readonly()
    }
}

impl Statement {
    /// Get all the column names in the result set of the prepared
    /// statement.
    pub fn column_names(&self) -> Vec<&str> {
        let n = self.column_count();
        let mut cols = Vec::with_capacity(n);
        for i in 0..n {
            if let Some(s) = self.column_name(i) {
                cols.push(s);
            }
        }
        cols
    }

    /// Return the number of columns in the result set returned by the
    /// prepared statement.
    pub fn column_count(&self) -> usize {
        self.inner.column_count() as usize
    }

    /// Returns the name assigned to a particular column in the result
    /// set, or `None` if there is no column at the provided index.
    pub fn column_name(&self, col: usize) -> Option<&str> {
        self.inner.column_name(col as i32)
    }

    pub fn column_decltype(&self, col: usize) -> Option<&str> {
        self.inner.column_decltype(col as i32)
    }

    /// Returns the column index in the result set for a given column
    /// name, matching case-insensitively.
    ///
    /// # Failure
    ///
    /// Will return an `Error::InvalidColumnName` when there is no
    /// column with the specified `name`.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        let bytes = name.as_bytes();
        let n = self.column_count();
        for i in 0..n {
            let col_name = self
                .column_name(i)
                .ok_or_else(|| Error::InvalidColumnName(name.to_string()))?;
            if bytes.eq_ignore_ascii_case(col_name.as_bytes()) {
                return Ok(i);
            }
        }
        Err(Error::InvalidColumnName(name.to_string()))
    }

    /// Returns a slice describing the columns of the result of the
    /// query.
    pub fn columns(&self) -> Vec<Column<'_>> {
        let n = self.column_count();
        let mut cols = Vec::with_capacity(n);
        for i in 0..n {
            let name = self.column_name(i).expect("column idx should be valid");
            let decl_type = self.column_decltype(i);
            cols.push(Column { name, decl_type });
        }
        cols
    }
}

/// An iterator mapping each streamed row through a caller-supplied
/// closure.
pub struct MappedRows<F> {
    rows: Rows,
    map: F,
}

impl<F> MappedRows<F> {
    pub fn new(rows: Rows, map: F) -> Self {
        Self { rows, map }
    }
}

impl<F, T> Iterator for MappedRows<F>
where
    F: FnMut(Row) -> Result<T>,
{
    type Item = Result<T>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let map = &mut self.map;
        self.rows
            .next()
            .transpose()
            .map(|row_result| row_result.and_then(map))
    }
}
