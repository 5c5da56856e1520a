use crate::params::IntoParams;
use crate::params::Params;
pub use crate::Column;
use crate::{Error, Result};

use crate::{Row, Rows};

/// Options applied when compiling a statement.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrepareOptions {
    /// Keep the full 64 bits of INTEGER cells instead of demoting
    /// values beyond the safe integer range to doubles, and accept such
    /// values as parameters.
    pub int64: bool,
    /// Reject the statement at prepare time unless it is read-only.
    pub readonly: bool,
}

#[async_trait::async_trait]
pub(crate) trait Stmt {
    fn finalize(&mut self) -> Result<()>;

    async fn execute(&mut self, params: &Params) -> Result<u64>;

    async fn query(&mut self, params: &Params) -> Result<Rows>;

    async fn query_one(&mut self, params: &Params) -> Result<Option<Row>>;

    async fn query_all(&mut self, params: &Params) -> Result<Vec<Row>>;

    fn bind(&mut self, params: &Params) -> Result<()>;

    fn reset(&mut self);

    fn parameter_count(&self) -> usize;

    fn parameter_name(&self, idx: i32) -> Option<&str>;

    fn columns(&self) -> Vec<Column<'_>>;
}

/// A prepared statement.
pub struct Statement {
    pub(crate) inner: Box<dyn Stmt + Send + Sync>,
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement").finish_non_exhaustive()
    }
}

impl Statement {
    /// Release the compiled statement handle. Further operations on
    /// this statement error.
    pub fn finalize(&mut self) -> Result<()> {
        self.inner.finalize()
    }

    /// Bind parameters, run the statement to completion and return the
    /// number of rows changed.
    pub async fn execute(&mut self, params: impl IntoParams) -> Result<u64> {
        tracing::trace!("execute for prepared statement");
        self.inner.execute(&params.into_params()?).await
    }

    /// Run the query and stream its rows lazily.
    ///
    /// The returned [`Rows`] is not restartable and holds the
    /// statement's cursor until drained or dropped.
    pub async fn query(&mut self, params: impl IntoParams) -> Result<Rows> {
        tracing::trace!("query for prepared statement");
        self.inner.query(&params.into_params()?).await
    }

    /// Run the query and return the first row, if any. The statement is
    /// implicitly reset.
    pub async fn query_one(&mut self, params: impl IntoParams) -> Result<Option<Row>> {
        self.inner.query_one(&params.into_params()?).await
    }

    /// Run the query and eagerly collect every row, then reset.
    pub async fn query_all(&mut self, params: impl IntoParams) -> Result<Vec<Row>> {
        self.inner.query_all(&params.into_params()?).await
    }

    /// Execute a query on the statement and return a mapped iterator.
    pub async fn query_map<F>(&mut self, params: impl IntoParams, map: F) -> Result<MappedRows<F>> {
        let rows = self.query(params).await?;

        Ok(MappedRows { rows, map })
    }

    /// Execute a query that returns the first [`Row`].
    ///
    /// # Errors
    ///
    /// - Returns `QueryReturnedNoRows` if no rows were returned.
    pub async fn query_row(&mut self, params: impl IntoParams) -> Result<Row> {
        self.query_one(params)
            .await?
            .ok_or(Error::QueryReturnedNoRows)
    }

    /// Bind parameters without stepping, for chained reuse.
    pub fn bind(&mut self, params: impl IntoParams) -> Result<&mut Self> {
        self.inner.bind(&params.into_params()?)?;
        Ok(self)
    }

    /// Reset the statement's cursor, preserving its bindings.
    pub fn reset(&mut self) {
        self.inner.reset();
    }

    /// Fetch the amount of parameters in the prepared statement.
    pub fn parameter_count(&self) -> usize {
        self.inner.parameter_count()
    }

    /// Fetch the parameter name at the provided index.
    pub fn parameter_name(&self, idx: i32) -> Option<&str> {
        self.inner.parameter_name(idx)
    }

    /// Fetch the list of columns for the prepared statement.
    pub fn columns(&self) -> Vec<Column<'_>> {
        self.inner.columns()
    }
}

/// An iterator that maps over all the rows.
pub struct MappedRows<F> {
    rows: Rows,
    map: F,
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
