//! Bridges between the local (FFI-backed) implementation and the
//! object-safe façade contracts.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::database::DatabaseName;
use crate::local::functions::{Aggregate, FunctionFlags, ScalarFunction};
use crate::local::rows::MaterializedRow;
use crate::local::Blob;
use crate::params::Params;
use crate::rows::{RowInner, RowsInner};
use crate::statement::PrepareOptions;
use crate::{
    connection::Conn, statement::Stmt, transaction::Tx, Column, Connection, Error, Result, Row,
    Rows, Statement, Transaction, TransactionBehavior, Value, ValueType,
};

#[derive(Clone)]
pub(crate) struct LocalConnection {
    pub(crate) conn: super::Connection,
}

#[async_trait::async_trait]
impl Conn for LocalConnection {
    async fn execute(&self, sql: &str, params: Params) -> Result<u64> {
        self.conn.execute(sql, params)
    }

    async fn prepare(&self, sql: &str, opts: PrepareOptions) -> Result<Statement> {
        let stmt = self.conn.prepare_with(sql, opts)?;

        Ok(Statement {
            inner: Box::new(LocalStmt(stmt)),
        })
    }

    async fn transaction(&self, tx_behavior: TransactionBehavior) -> Result<Transaction> {
        let tx = crate::local::Transaction::begin(self.conn.clone(), tx_behavior)?;
        Ok(Transaction {
            inner: Box::new(LocalTx(Some(tx))),
            conn: Connection {
                conn: Arc::new(self.clone()),
            },
        })
    }

    fn is_autocommit(&self) -> bool {
        self.conn.is_autocommit()
    }

    fn in_transaction(&self) -> bool {
        self.conn.in_transaction()
    }

    fn is_open(&self) -> bool {
        self.conn.is_open()
    }

    fn changes(&self) -> Result<u64> {
        self.conn.changes()
    }

    fn total_changes(&self) -> Result<u64> {
        self.conn.total_changes()
    }

    fn last_insert_rowid(&self) -> Result<i64> {
        self.conn.last_insert_rowid()
    }

    fn busy_timeout(&self, timeout: Duration) -> Result<()> {
        self.conn.busy_timeout(timeout)
    }

    fn interrupt(&self) -> Result<()> {
        self.conn.interrupt()
    }

    fn close(&self) -> Result<()> {
        self.conn.close()
    }

    fn create_scalar_function(
        &self,
        name: &str,
        n_args: Option<usize>,
        flags: FunctionFlags,
        f: ScalarFunction,
    ) -> Result<()> {
        self.conn.create_scalar_function(name, n_args, flags, f)
    }

    fn create_aggregate_function(
        &self,
        name: &str,
        n_args: Option<usize>,
        flags: FunctionFlags,
        agg: Box<dyn Aggregate>,
    ) -> Result<()> {
        self.conn.create_aggregate_function(name, n_args, flags, agg)
    }

    fn blob_open(
        &self,
        db: DatabaseName<'_>,
        table: &str,
        column: &str,
        row: i64,
        read_only: bool,
    ) -> Result<Blob> {
        self.conn.blob_open(db, table, column, row, read_only)
    }

    fn backup(&self, name: DatabaseName<'_>, dest_path: &Path, pages: i32) -> Result<()> {
        self.conn.backup(name, dest_path, pages)
    }

    fn load_extension(&self, dylib_path: &Path, entry_point: Option<&str>) -> Result<()> {
        self.conn.load_extension(dylib_path, entry_point)
    }
}

impl Drop for LocalConnection {
    fn drop(&mut self) {
        self.conn.disconnect()
    }
}

pub(crate) struct LocalStmt(pub(super) crate::local::Statement);

#[async_trait::async_trait]
impl Stmt for LocalStmt {
    fn finalize(&mut self) -> Result<()> {
        self.0.finalize()
    }

    async fn execute(&mut self, params: &Params) -> Result<u64> {
        self.0.execute(params)
    }

    async fn query(&mut self, params: &Params) -> Result<Rows> {
        self.0.query(params).map(LocalRows).map(|inner| Rows {
            inner: Box::new(inner),
        })
    }

    async fn query_one(&mut self, params: &Params) -> Result<Option<Row>> {
        Ok(self.0.query_one(params)?.map(|row| Row {
            inner: Box::new(LocalMaterializedRow(row)),
        }))
    }

    async fn query_all(&mut self, params: &Params) -> Result<Vec<Row>> {
        Ok(self
            .0
            .query_all(params)?
            .into_iter()
            .map(|row| Row {
                inner: Box::new(LocalMaterializedRow(row)),
            })
            .collect())
    }

    fn bind(&mut self, params: &Params) -> Result<()> {
        self.0.bind(params)
    }

    fn reset(&mut self) {
        self.0.reset();
    }

    fn parameter_count(&self) -> usize {
        self.0.parameter_count()
    }

    fn parameter_name(&self, idx: i32) -> Option<&str> {
        self.0.parameter_name(idx)
    }

    fn columns(&self) -> Vec<Column<'_>> {
        self.0.columns()
    }
}

pub(super) struct LocalTx(pub(super) Option<crate::local::Transaction>);

#[async_trait::async_trait]
impl Tx for LocalTx {
    async fn commit(&mut self) -> Result<()> {
        let tx = self.0.take().ok_or(Error::TransactionInactive)?;
        tx.commit()
    }

    async fn rollback(&mut self) -> Result<()> {
        let tx = self.0.take().ok_or(Error::TransactionInactive)?;
        tx.rollback()
    }

    async fn savepoint(&mut self, name: &str) -> Result<()> {
        let tx = self.0.as_ref().ok_or(Error::TransactionInactive)?;
        tx.execute_simple(&format!("SAVEPOINT {name}"))
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        let tx = self.0.as_ref().ok_or(Error::TransactionInactive)?;
        tx.execute_simple(&format!("RELEASE {name}"))
    }

    async fn rollback_to(&mut self, name: &str) -> Result<()> {
        let tx = self.0.as_ref().ok_or(Error::TransactionInactive)?;
        tx.execute_simple(&format!("ROLLBACK TO {name}"))
    }
}

pub(crate) struct LocalRows(pub(crate) crate::local::Rows);

impl RowsInner for LocalRows {
    fn next(&mut self) -> Result<Option<Row>> {
        let row = self.0.next()?.map(|r| Row {
            inner: Box::new(LocalRow(r)),
        });

        Ok(row)
    }

    fn column_count(&self) -> i32 {
        self.0.column_count()
    }

    fn column_name(&self, idx: i32) -> Option<&str> {
        self.0.column_name(idx)
    }

    fn column_type(&self, idx: i32) -> Result<ValueType> {
        self.0.column_type(idx)
    }
}

struct LocalRow(crate::local::Row);

impl RowInner for LocalRow {
    fn column_value(&self, idx: i32) -> Result<Value> {
        self.0.get_value(idx)
    }

    fn column_name(&self, idx: i32) -> Option<&str> {
        self.0.column_name(idx)
    }

    fn column_type(&self, idx: i32) -> Result<ValueType> {
        self.0.column_type(idx)
    }

    fn column_count(&self) -> i32 {
        self.0.column_count()
    }
}

impl fmt::Debug for LocalRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> std::result::Result<(), fmt::Error> {
        self.0.fmt(f)
    }
}

pub(crate) struct LocalMaterializedRow(pub(crate) MaterializedRow);

impl RowInner for LocalMaterializedRow {
    fn column_value(&self, idx: i32) -> Result<Value> {
        self.0.get_value(idx)
    }

    fn column_name(&self, idx: i32) -> Option<&str> {
        self.0.column_name(idx)
    }

    fn column_type(&self, idx: i32) -> Result<ValueType> {
        self.0.column_type(idx)
    }

    fn column_count(&self) -> i32 {
        self.0.column_count()
    }
}
