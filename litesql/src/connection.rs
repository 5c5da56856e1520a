use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::database::DatabaseName;
use crate::local::functions::{Aggregate, FunctionFlags, ScalarFunction};
use crate::local::Blob;
use crate::params::{IntoParams, Params};
use crate::rows::{Row, Rows};
use crate::statement::{PrepareOptions, Statement};
use crate::transaction::Transaction;
use crate::{Error, Result, TransactionBehavior, Value};

/// The contract a connection backend fulfils: queriable,
/// transactionable, preparable, plus the handle-scoped extras.
#[async_trait::async_trait]
pub(crate) trait Conn {
    async fn execute(&self, sql: &str, params: Params) -> Result<u64>;

    async fn prepare(&self, sql: &str, opts: PrepareOptions) -> Result<Statement>;

    async fn transaction(&self, tx_behavior: TransactionBehavior) -> Result<Transaction>;

    fn is_autocommit(&self) -> bool;

    fn in_transaction(&self) -> bool;

    fn is_open(&self) -> bool;

    fn changes(&self) -> Result<u64>;

    fn total_changes(&self) -> Result<u64>;

    fn last_insert_rowid(&self) -> Result<i64>;

    fn busy_timeout(&self, timeout: Duration) -> Result<()>;

    fn interrupt(&self) -> Result<()>;

    fn close(&self) -> Result<()>;

    fn create_scalar_function(
        &self,
        name: &str,
        n_args: Option<usize>,
        flags: FunctionFlags,
        f: ScalarFunction,
    ) -> Result<()>;

    fn create_aggregate_function(
        &self,
        name: &str,
        n_args: Option<usize>,
        flags: FunctionFlags,
        agg: Box<dyn Aggregate>,
    ) -> Result<()>;

    fn blob_open(
        &self,
        db: DatabaseName<'_>,
        table: &str,
        column: &str,
        row: i64,
        read_only: bool,
    ) -> Result<Blob>;

    fn backup(&self, name: DatabaseName<'_>, dest_path: &Path, pages: i32) -> Result<()>;

    fn load_extension(&self, dylib_path: &Path, entry_point: Option<&str>) -> Result<()>;
}

/// A connection to a litesql database.
#[derive(Clone)]
pub struct Connection {
    pub(crate) conn: Arc<dyn Conn + Send + Sync>,
}

impl Connection {
    /// Execute a SQL statement provided some type that implements
    /// [`IntoParams`], returning on success the number of rows that
    /// were changed.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # async fn run(conn: &litesql::Connection) {
    /// # use litesql::params;
    /// conn.execute("INSERT INTO foo (id) VALUES (?1)", [42]).await.unwrap();
    /// conn.execute("INSERT INTO foo (id, name) VALUES (?1, ?2)", params![42, "baz"]).await.unwrap();
    /// # }
    /// ```
    ///
    /// For more info on how to pass params check [`IntoParams`]'s docs.
    pub async fn execute(&self, sql: &str, params: impl IntoParams) -> Result<u64> {
        tracing::trace!("executing `{}`", sql);
        self.conn.execute(sql, params.into_params()?).await
    }

    /// Execute a SQL query, returning its [`Rows`] on success.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # async fn run(conn: &litesql::Connection) {
    /// # use litesql::params;
    /// conn.query("SELECT foo FROM bar WHERE id = ?1", [42]).await.unwrap();
    /// # }
    /// ```
    pub async fn query(&self, sql: &str, params: impl IntoParams) -> Result<Rows> {
        let mut stmt = self.prepare(sql).await?;

        stmt.query(params).await
    }

    /// Execute a SQL query and return its first row, if any.
    pub async fn query_one(&self, sql: &str, params: impl IntoParams) -> Result<Option<Row>> {
        let mut stmt = self.prepare(sql).await?;

        stmt.query_one(params).await
    }

    /// Execute a SQL query and return its first row.
    ///
    /// # Errors
    ///
    /// - Returns `QueryReturnedNoRows` if no rows were returned.
    pub async fn query_row(&self, sql: &str, params: impl IntoParams) -> Result<Row> {
        self.query_one(sql, params)
            .await?
            .ok_or(Error::QueryReturnedNoRows)
    }

    /// Execute a SQL query and eagerly collect every row.
    pub async fn query_all(&self, sql: &str, params: impl IntoParams) -> Result<Vec<Row>> {
        let mut stmt = self.prepare(sql).await?;

        stmt.query_all(params).await
    }

    /// Run a query assembled from literal SQL fragments joined with `?`
    /// placeholders, binding the supplied values positionally.
    ///
    /// This is the injection-safe template shortcut: interpolated values
    /// never become SQL text.
    ///
    /// ```rust,no_run
    /// # async fn run(conn: &litesql::Connection) {
    /// let rows = conn
    ///     .query_template(&["SELECT ", " a, ", " b"], (1, 3.14))
    ///     .await
    ///     .unwrap();
    /// # }
    /// ```
    pub async fn query_template(
        &self,
        fragments: &[&str],
        params: impl IntoParams,
    ) -> Result<Rows> {
        let sql = fragments.join("?");
        self.query(&sql, params).await
    }

    /// Prepare a statement.
    pub async fn prepare(&self, sql: &str) -> Result<Statement> {
        tracing::trace!("preparing `{}`", sql);
        self.conn.prepare(sql, PrepareOptions::default()).await
    }

    /// Prepare a statement with explicit [`PrepareOptions`].
    pub async fn prepare_with(&self, sql: &str, opts: PrepareOptions) -> Result<Statement> {
        tracing::trace!("preparing `{}` with {:?}", sql, opts);
        self.conn.prepare(sql, opts).await
    }

    /// Begin a new transaction in `DEFERRED` mode, which is the default.
    pub async fn transaction(&self) -> Result<Transaction> {
        tracing::trace!("starting deferred transaction");
        self.transaction_with_behavior(TransactionBehavior::Deferred)
            .await
    }

    /// Begin a new transaction in the given [`TransactionBehavior`].
    pub async fn transaction_with_behavior(
        &self,
        tx_behavior: TransactionBehavior,
    ) -> Result<Transaction> {
        tracing::trace!("starting {:?} transaction", tx_behavior);
        self.conn.transaction(tx_behavior).await
    }

    /// Register a scalar SQL function backed by a host closure.
    ///
    /// `n_args` of `None` registers a variadic function. A closure
    /// error completes the SQL call with that error's message.
    pub fn create_scalar_function<F>(
        &self,
        name: &str,
        n_args: Option<usize>,
        flags: FunctionFlags,
        f: F,
    ) -> Result<()>
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.conn
            .create_scalar_function(name, n_args, flags, Box::new(f))
    }

    /// Register an aggregate SQL function.
    pub fn create_aggregate_function<A>(
        &self,
        name: &str,
        n_args: Option<usize>,
        flags: FunctionFlags,
        agg: A,
    ) -> Result<()>
    where
        A: Aggregate + 'static,
    {
        self.conn
            .create_aggregate_function(name, n_args, flags, Box::new(agg))
    }

    /// Open an incremental BLOB handle on `table.column` at `row`.
    pub fn blob_open(
        &self,
        db: DatabaseName<'_>,
        table: &str,
        column: &str,
        row: i64,
        read_only: bool,
    ) -> Result<Blob> {
        self.conn.blob_open(db, table, column, row, read_only)
    }

    /// Copy the `name` database into the file at `dest_path` using the
    /// online backup API.
    pub fn backup(&self, name: DatabaseName<'_>, dest_path: impl AsRef<Path>) -> Result<()> {
        self.conn.backup(name, dest_path.as_ref(), -1)
    }

    /// As [`backup`](Connection::backup), copying `pages` pages in the
    /// single backup step (`-1` copies everything).
    pub fn backup_with_pages(
        &self,
        name: DatabaseName<'_>,
        dest_path: impl AsRef<Path>,
        pages: i32,
    ) -> Result<()> {
        self.conn.backup(name, dest_path.as_ref(), pages)
    }

    /// Load a SQLite extension from a dynamic library at `dylib_path`.
    ///
    /// Requires the connection to have been opened with
    /// `enable_load_extension`; only load extensions that you trust.
    pub fn load_extension<P: AsRef<Path>>(
        &self,
        dylib_path: P,
        entry_point: Option<&str>,
    ) -> Result<()> {
        self.conn.load_extension(dylib_path.as_ref(), entry_point)
    }

    /// Whether the connection is in autocommit mode.
    pub fn is_autocommit(&self) -> bool {
        self.conn.is_autocommit()
    }

    /// Whether an explicit transaction is open (open and not
    /// autocommit).
    pub fn in_transaction(&self) -> bool {
        self.conn.in_transaction()
    }

    /// Whether the native handle is still open.
    pub fn is_open(&self) -> bool {
        self.conn.is_open()
    }

    /// The number of rows changed by the most recent statement.
    pub fn changes(&self) -> Result<u64> {
        self.conn.changes()
    }

    /// The total number of rows changed over the connection's lifetime.
    pub fn total_changes(&self) -> Result<u64> {
        self.conn.total_changes()
    }

    /// The rowid of the most recent successful INSERT.
    pub fn last_insert_rowid(&self) -> Result<i64> {
        self.conn.last_insert_rowid()
    }

    /// Set the busy handler timeout.
    pub fn busy_timeout(&self, timeout: Duration) -> Result<()> {
        self.conn.busy_timeout(timeout)
    }

    /// Interrupt any long-running statement on this connection.
    pub fn interrupt(&self) -> Result<()> {
        self.conn.interrupt()
    }

    /// Close the connection, finalizing its statements and releasing
    /// its registered callbacks first. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        self.conn.close()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish()
    }
}
