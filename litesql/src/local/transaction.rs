use std::ops::Deref;

use crate::{DropBehavior, Result, TransactionBehavior};

use super::Connection;

/// An open transaction, scoped as a guard.
///
/// The guard rolls back when dropped unless it was committed or its
/// [`DropBehavior`] says otherwise. `commit` and `rollback` consume the
/// guard; either outcome is terminal even when the underlying statement
/// fails, so a failed commit can never be retried against a
/// spuriously-active transaction.
pub struct Transaction {
    conn: Connection,
    drop_behavior: DropBehavior,
    finished: bool,
}

impl Transaction {
    pub(crate) fn begin(conn: Connection, behavior: TransactionBehavior) -> Result<Transaction> {
        let sql = match behavior {
            TransactionBehavior::Deferred => "BEGIN DEFERRED",
            TransactionBehavior::Immediate => "BEGIN IMMEDIATE",
            TransactionBehavior::Exclusive => "BEGIN EXCLUSIVE",
        };
        conn.execute_simple(sql).map(move |_| Transaction {
            conn,
            drop_behavior: DropBehavior::Rollback,
            finished: false,
        })
    }

    /// Starts a new savepoint, allowing nested rollback scopes.
    pub fn savepoint(&mut self) -> Result<Savepoint<'_>> {
        Savepoint::with_depth(&self.conn, 1)
    }

    /// Starts a new savepoint with a caller-chosen name.
    pub fn savepoint_with_name<T: Into<String>>(&mut self, name: T) -> Result<Savepoint<'_>> {
        Savepoint::with_depth_and_name(&self.conn, 1, name)
    }

    /// Get the current setting for what happens to the transaction when
    /// it is dropped.
    pub fn drop_behavior(&self) -> DropBehavior {
        self.drop_behavior
    }

    /// Configure what happens to the transaction when it is dropped.
    pub fn set_drop_behavior(&mut self, drop_behavior: DropBehavior) {
        self.drop_behavior = drop_behavior;
    }

    /// Consume and commit the transaction.
    pub fn commit(mut self) -> Result<()> {
        self.commit_()
    }

    fn commit_(&mut self) -> Result<()> {
        self.finished = true;
        self.conn.execute_simple("COMMIT")
    }

    /// Consume and roll back the transaction.
    pub fn rollback(mut self) -> Result<()> {
        self.rollback_()
    }

    fn rollback_(&mut self) -> Result<()> {
        self.finished = true;
        self.conn.execute_simple("ROLLBACK")
    }

    /// Consume the transaction, committing or rolling back according to
    /// the current drop behavior. Functionally equivalent to the `Drop`
    /// implementation, but lets callers see errors.
    pub fn finish(mut self) -> Result<()> {
        self.finish_()
    }

    fn finish_(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        if self.conn.is_open() && self.conn.is_autocommit() {
            // SQLite already unwound the transaction (e.g. on certain
            // errors); nothing left to do.
            self.finished = true;
            return Ok(());
        }
        match self.drop_behavior {
            DropBehavior::Commit => self.commit_().or_else(|_| self.rollback_()),
            DropBehavior::Rollback => self.rollback_(),
            DropBehavior::Ignore => Ok(()),
            DropBehavior::Panic => panic!("Transaction dropped unexpectedly."),
        }
    }
}

impl Deref for Transaction {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

#[allow(unused_must_use)]
impl Drop for Transaction {
    fn drop(&mut self) {
        self.finish_();
    }
}

/// A named point within a transaction to which a partial rollback may
/// be issued. Nestable; rolls back when dropped uncommitted.
pub struct Savepoint<'conn> {
    conn: &'conn Connection,
    name: String,
    depth: u32,
    drop_behavior: DropBehavior,
    committed: bool,
}

impl Savepoint<'_> {
    fn with_depth_and_name<T: Into<String>>(
        conn: &Connection,
        depth: u32,
        name: T,
    ) -> Result<Savepoint<'_>> {
        let name = name.into();
        conn.execute_simple(&format!("SAVEPOINT {name}"))
            .map(|_| Savepoint {
                conn,
                name,
                depth,
                drop_behavior: DropBehavior::Rollback,
                committed: false,
            })
    }

    fn with_depth(conn: &Connection, depth: u32) -> Result<Savepoint<'_>> {
        // Default names are plain identifiers so they stay valid
        // unquoted in every SAVEPOINT/RELEASE/ROLLBACK TO statement.
        let name = format!("_litesql_sp_{depth}");
        Savepoint::with_depth_and_name(conn, depth, name)
    }

    /// Begin a new savepoint directly on a connection.
    pub fn new(conn: &Connection) -> Result<Savepoint<'_>> {
        Savepoint::with_depth(conn, 0)
    }

    /// Begin a new savepoint with a caller-chosen name.
    pub fn with_name<T: Into<String>>(conn: &Connection, name: T) -> Result<Savepoint<'_>> {
        Savepoint::with_depth_and_name(conn, 0, name)
    }

    /// Begin a nested savepoint.
    pub fn savepoint(&mut self) -> Result<Savepoint<'_>> {
        Savepoint::with_depth(self.conn, self.depth + 1)
    }

    pub fn drop_behavior(&self) -> DropBehavior {
        self.drop_behavior
    }

    pub fn set_drop_behavior(&mut self, drop_behavior: DropBehavior) {
        self.drop_behavior = drop_behavior;
    }

    /// Consume and release (commit) the savepoint.
    pub fn commit(mut self) -> Result<()> {
        self.commit_()
    }

    fn commit_(&mut self) -> Result<()> {
        self.committed = true;
        self.conn.execute_simple(&format!("RELEASE {}", self.name))
    }

    /// Roll back to this savepoint.
    ///
    /// Unlike transactions, savepoints remain active after a rollback
    /// and can be rolled back again or committed.
    pub fn rollback(&mut self) -> Result<()> {
        self.conn
            .execute_simple(&format!("ROLLBACK TO {}", self.name))
    }

    fn finish_(&mut self) -> Result<()> {
        if self.committed {
            return Ok(());
        }
        match self.drop_behavior {
            DropBehavior::Commit => self.commit_().or_else(|_| self.rollback()),
            DropBehavior::Rollback => self.rollback(),
            DropBehavior::Ignore => Ok(()),
            DropBehavior::Panic => panic!("Savepoint dropped unexpectedly."),
        }
    }
}

impl Deref for Savepoint<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
    }
}

#[allow(unused_must_use)]
impl Drop for Savepoint<'_> {
    fn drop(&mut self) {
        self.finish_();
    }
}

#[cfg(test)]
mod tests {
    use crate::database::{ConnectOptions, OpenFlags};
    use crate::events::EventBus;
    use crate::local::{Database, Savepoint};
    use crate::params::Params;
    use crate::TransactionBehavior;

    fn setup() -> crate::local::Connection {
        let db = Database::new(
            ":memory:".to_string(),
            OpenFlags::default(),
            ConnectOptions::default(),
            EventBus::default(),
        )
        .unwrap();
        let conn = db.connect().unwrap();
        conn.execute("CREATE TABLE t (x INTEGER)", ()).unwrap();
        conn
    }

    fn count(conn: &crate::local::Connection) -> i64 {
        let stmt = conn.prepare("SELECT count(*) FROM t").unwrap();
        let row = stmt.query_row(&Params::None).unwrap();
        *row.get_value(0).unwrap().as_integer().unwrap()
    }

    #[test]
    fn commit_keeps_changes() {
        let conn = setup();
        let tx = conn.transaction().unwrap();
        tx.execute("INSERT INTO t VALUES (1)", ()).unwrap();
        assert!(tx.in_transaction());
        tx.commit().unwrap();
        assert!(!conn.in_transaction());
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn drop_rolls_back() {
        let conn = setup();
        {
            let tx = conn.transaction().unwrap();
            tx.execute("INSERT INTO t VALUES (1)", ()).unwrap();
        }
        assert_eq!(count(&conn), 0);
        assert!(!conn.in_transaction());
    }

    #[test]
    fn explicit_rollback_discards_changes() {
        let conn = setup();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .unwrap();
        tx.execute("INSERT INTO t VALUES (1)", ()).unwrap();
        tx.rollback().unwrap();
        assert_eq!(count(&conn), 0);
    }

    #[test]
    fn savepoint_rewinds_within_transaction() {
        let conn = setup();
        let mut tx = conn.transaction().unwrap();
        tx.execute("INSERT INTO t VALUES (1)", ()).unwrap();
        {
            let mut sp = tx.savepoint().unwrap();
            sp.execute("INSERT INTO t VALUES (2)", ()).unwrap();
            sp.rollback().unwrap();
            sp.commit().unwrap();
        }
        tx.commit().unwrap();
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn named_savepoint_on_connection() {
        let conn = setup();
        let sp = Savepoint::with_name(&conn, "outer").unwrap();
        sp.execute("INSERT INTO t VALUES (1)", ()).unwrap();
        sp.commit().unwrap();
        assert_eq!(count(&conn), 1);
    }
}
