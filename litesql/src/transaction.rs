use std::ops::Deref;

use crate::Result;

use super::Connection;

/// How a `BEGIN` acquires its locks.
#[derive(Debug, Clone, Copy)]
pub enum TransactionBehavior {
    Deferred,
    Immediate,
    Exclusive,
}

/// What happens to a transaction guard that is dropped without an
/// explicit commit or rollback.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum DropBehavior {
    /// Roll back the changes. This is the default.
    Rollback,

    /// Commit the changes.
    Commit,

    /// Leave the transaction open. Use with care.
    Ignore,

    /// Panic, to enforce intentional handling during development.
    Panic,
}

#[async_trait::async_trait]
pub(crate) trait Tx {
    async fn commit(&mut self) -> Result<()>;
    async fn rollback(&mut self) -> Result<()>;
    async fn savepoint(&mut self, name: &str) -> Result<()>;
    async fn release_savepoint(&mut self, name: &str) -> Result<()>;
    async fn rollback_to(&mut self, name: &str) -> Result<()>;
}

/// An open transaction over a [`Connection`].
///
/// The transaction is itself queriable: it derefs to the connection it
/// was started on. Dropping the guard without committing rolls the
/// transaction back.
pub struct Transaction {
    pub(crate) inner: Box<dyn Tx + Send + Sync>,
    pub(crate) conn: Connection,
}

impl Transaction {
    /// Commit the transaction, consuming the guard.
    ///
    /// The transaction reaches a terminal state even if the `COMMIT`
    /// statement fails; inspect [`Connection::in_transaction`] to learn
    /// what SQLite left behind.
    pub async fn commit(mut self) -> Result<()> {
        self.inner.commit().await
    }

    /// Roll the transaction back, consuming the guard.
    pub async fn rollback(mut self) -> Result<()> {
        self.inner.rollback().await
    }

    /// Run `SAVEPOINT name`.
    pub async fn savepoint(&mut self, name: &str) -> Result<()> {
        self.inner.savepoint(name).await
    }

    /// Run `RELEASE name`.
    pub async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        self.inner.release_savepoint(name).await
    }

    /// Run `ROLLBACK TO name`, rewinding to the savepoint while leaving
    /// the transaction active.
    pub async fn rollback_to(&mut self, name: &str) -> Result<()> {
        self.inner.rollback_to(name).await
    }
}

impl Deref for Transaction {
    type Target = Connection;

    #[inline]
    fn deref(&self) -> &Connection {
        &self.conn
    }
}
