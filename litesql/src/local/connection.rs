use std::ffi::{c_int, CString};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use litesql_sys::ffi;
use parking_lot::Mutex;

use crate::errors;
use crate::events::{ConnectionEvent, EventBus};
use crate::local::functions::unregister_function;
use crate::params::IntoParams;
use crate::statement::PrepareOptions;
use crate::{Error, Result, TransactionBehavior};

use super::{Database, Rows, Statement, Transaction};

/// A UDF registration remembered for release at close time. The boxed
/// callback itself is owned by SQLite until the function is deleted.
pub(crate) struct RegisteredFunction {
    pub(crate) name: String,
    pub(crate) n_arg: c_int,
}

/// A connection to a litesql database.
///
/// Clones share one native handle; the handle closes when the last
/// clone drops or [`Connection::close`] runs, whichever happens first.
#[derive(Clone)]
pub struct Connection {
    pub(crate) raw: *mut ffi::sqlite3,

    drop_ref: Arc<()>,

    closed: Arc<AtomicBool>,

    /// Live statements compiled against this handle, finalized in bulk
    /// at close so the handle never outlives a compiled program.
    stmts: Arc<Mutex<Vec<Weak<litesql_sys::Statement>>>>,

    pub(crate) funcs: Arc<Mutex<Vec<RegisteredFunction>>>,

    events: EventBus,

    path: Arc<str>,

    pub(crate) int64: bool,

    load_extension_enabled: bool,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect()
    }
}

// SAFETY: the first open configures SQLITE_CONFIG_SERIALIZED, and
// connections default to the full-mutex handle.
unsafe impl Send for Connection {}
unsafe impl Sync for Connection {}

impl Connection {
    /// Connect to the database.
    pub(crate) fn connect(db: &Database) -> Result<Connection> {
        let mut raw = std::ptr::null_mut();
        let db_path = db.db_path.clone();
        let c_path =
            CString::new(db_path.as_str()).map_err(|_| Error::InvalidUTF8Path)?;
        let rc = unsafe {
            ffi::sqlite3_open_v2(
                c_path.as_ptr(),
                &mut raw,
                db.flags.bits(),
                std::ptr::null(),
            )
        };
        if rc != ffi::SQLITE_OK {
            // Even a failed open usually allocates a handle carrying
            // the error message; read it, then release the handle.
            let err = if raw.is_null() {
                errors::sqlite_error(rc, errors::error_from_code(rc))
            } else {
                let err = errors::last_error(raw);
                unsafe { ffi::sqlite3_close_v2(raw) };
                err
            };
            return Err(err);
        }

        let conn = Connection {
            raw,
            drop_ref: Arc::new(()),
            closed: Arc::new(AtomicBool::new(false)),
            stmts: Arc::new(Mutex::new(Vec::new())),
            funcs: Arc::new(Mutex::new(Vec::new())),
            events: db.events.clone(),
            path: Arc::from(db_path.as_str()),
            int64: db.options.int64,
            load_extension_enabled: db.options.enable_load_extension,
        };

        if let Some(timeout) = db.options.busy_timeout {
            conn.busy_timeout(timeout)?;
        }
        if db.options.enable_load_extension {
            conn.set_load_extension_config(true)?;
        }

        conn.events.emit(&ConnectionEvent::Connect {
            path: conn.path.to_string(),
        });

        Ok(conn)
    }

    /// Get a raw handle to the underlying connection.
    pub fn handle(&self) -> *mut ffi::sqlite3 {
        self.raw
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Prepare the SQL statement.
    pub fn prepare<S: Into<String>>(&self, sql: S) -> Result<Statement> {
        self.prepare_with(sql, PrepareOptions::default())
    }

    /// Prepare the SQL statement with explicit options.
    pub fn prepare_with<S: Into<String>>(
        &self,
        sql: S,
        opts: PrepareOptions,
    ) -> Result<Statement> {
        self.check_open()?;
        let int64 = opts.int64 || self.int64;
        Statement::prepare(self.clone(), self.raw, sql.into().as_str(), int64, opts.readonly)
    }

    pub(crate) fn register_stmt(&self, stmt: Weak<litesql_sys::Statement>) {
        let mut stmts = self.stmts.lock();
        stmts.retain(|w| w.strong_count() > 0);
        stmts.push(stmt);
    }

    /// The number of statements still alive against this handle.
    pub fn outstanding_statements(&self) -> usize {
        self.stmts
            .lock()
            .iter()
            .filter(|w| {
                w.upgrade()
                    .map(|stmt| !stmt.is_finalized())
                    .unwrap_or(false)
            })
            .count()
    }

    /// Convenience method to run a query and stream its rows.
    pub fn query<S, P>(&self, sql: S, params: P) -> Result<Rows>
    where
        S: Into<String>,
        P: IntoParams,
    {
        let stmt = self.prepare(sql)?;
        stmt.query(&params.into_params()?)
    }

    /// Execute the SQL statement synchronously, returning the number of
    /// rows changed.
    ///
    /// This method blocks the thread until the SQL statement is
    /// executed.
    pub fn execute<S, P>(&self, sql: S, params: P) -> Result<u64>
    where
        S: Into<String>,
        P: IntoParams,
    {
        let stmt = self.prepare(sql)?;
        stmt.execute(&params.into_params()?)
    }

    pub(crate) fn execute_simple(&self, sql: &str) -> Result<()> {
        self.execute(sql, ()).map(|_| ())
    }

    /// Begin a new transaction in DEFERRED mode, which is the default.
    pub fn transaction(&self) -> Result<Transaction> {
        self.transaction_with_behavior(TransactionBehavior::Deferred)
    }

    /// Begin a new transaction in the given mode.
    pub fn transaction_with_behavior(
        &self,
        tx_behavior: TransactionBehavior,
    ) -> Result<Transaction> {
        Transaction::begin(self.clone(), tx_behavior)
    }

    pub fn interrupt(&self) -> Result<()> {
        self.check_open()?;
        unsafe { ffi::sqlite3_interrupt(self.raw) };
        Ok(())
    }

    pub fn busy_timeout(&self, timeout: Duration) -> Result<()> {
        self.check_open()?;
        let rc = unsafe { ffi::sqlite3_busy_timeout(self.raw, timeout.as_millis() as i32) };
        match rc {
            ffi::SQLITE_OK => Ok(()),
            _ => Err(errors::last_error(self.raw)),
        }
    }

    pub fn is_autocommit(&self) -> bool {
        self.is_open() && unsafe { ffi::sqlite3_get_autocommit(self.raw) != 0 }
    }

    pub fn in_transaction(&self) -> bool {
        self.is_open() && unsafe { ffi::sqlite3_get_autocommit(self.raw) == 0 }
    }

    pub fn changes(&self) -> Result<u64> {
        self.check_open()?;
        Ok(unsafe { ffi::sqlite3_changes64(self.raw) as u64 })
    }

    pub fn total_changes(&self) -> Result<u64> {
        self.check_open()?;
        Ok(unsafe { ffi::sqlite3_total_changes(self.raw) as u64 })
    }

    pub fn last_insert_rowid(&self) -> Result<i64> {
        self.check_open()?;
        Ok(unsafe { ffi::sqlite3_last_insert_rowid(self.raw) })
    }

    fn set_load_extension_config(&self, onoff: bool) -> Result<()> {
        // The verb takes an on/off flag plus an out-pointer for the new
        // state (NULL when reporting back is not needed).
        let rc = unsafe {
            ffi::sqlite3_db_config(
                self.raw,
                ffi::SQLITE_DBCONFIG_ENABLE_LOAD_EXTENSION,
                onoff as c_int,
                std::ptr::null::<c_int>(),
            )
        };
        match rc {
            ffi::SQLITE_OK => Ok(()),
            _ => Err(errors::sqlite_error(rc, errors::error_from_code(rc))),
        }
    }

    pub fn load_extension(
        &self,
        dylib_path: &std::path::Path,
        entry_point: Option<&str>,
    ) -> Result<()> {
        self.check_open()?;
        if !self.load_extension_enabled {
            return Err(Error::LoadExtensionDisabled);
        }
        let mut raw_err_msg: *mut std::ffi::c_char = std::ptr::null_mut();
        let dylib_path = match dylib_path.to_str() {
            Some(dylib_path) => CString::new(dylib_path)
                .map_err(|_| Error::InvalidUTF8Path)?,
            None => return Err(Error::InvalidUTF8Path),
        };
        let entry_point = match entry_point {
            Some(entry_point) => Some(
                CString::new(entry_point)
                    .map_err(|_| Error::Misuse("entry point contains a NUL byte".into()))?,
            ),
            None => None,
        };
        let rc = unsafe {
            ffi::sqlite3_load_extension(
                self.raw,
                dylib_path.as_ptr(),
                entry_point
                    .as_ref()
                    .map(|s| s.as_ptr())
                    .unwrap_or(std::ptr::null()),
                &mut raw_err_msg,
            )
        };
        match rc {
            ffi::SQLITE_OK => Ok(()),
            _ => {
                let err_msg = if raw_err_msg.is_null() {
                    errors::error_from_code(rc)
                } else {
                    let err_msg = unsafe { std::ffi::CStr::from_ptr(raw_err_msg) };
                    let err_msg = err_msg.to_string_lossy().to_string();
                    unsafe { ffi::sqlite3_free(raw_err_msg as *mut std::ffi::c_void) };
                    err_msg
                };
                Err(errors::sqlite_error(rc, err_msg))
            }
        }
    }

    /// Close the connection.
    ///
    /// Teardown order: finalize every live statement, release every
    /// registered callback, close the handle, emit the close event.
    /// Every step is attempted even if an earlier one failed; the first
    /// error is the one reported. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut first_err: Option<Error> = None;

        for weak in self.stmts.lock().drain(..) {
            if let Some(stmt) = weak.upgrade() {
                stmt.finalize();
            }
        }

        for reg in self.funcs.lock().drain(..) {
            if let Err(err) = unregister_function(self.raw, &reg.name, reg.n_arg) {
                tracing::error!("failed to release function `{}`: {err}", reg.name);
                first_err.get_or_insert(err);
            }
        }

        let rc = unsafe { ffi::sqlite3_close_v2(self.raw) };
        if rc != ffi::SQLITE_OK {
            first_err.get_or_insert(errors::sqlite_error(rc, errors::error_from_code(rc)));
        }

        self.events.emit(&ConnectionEvent::Close {
            path: self.path.to_string(),
        });

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Disconnect from the database when the last clone goes away.
    pub fn disconnect(&mut self) {
        if Arc::get_mut(&mut self.drop_ref).is_some() {
            if let Err(err) = self.close() {
                tracing::error!("error while closing connection: {err}");
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::database::{ConnectOptions, OpenFlags};
    use crate::events::EventBus;
    use crate::local::Database;
    use crate::Error;

    fn memory_db() -> Database {
        Database::new(
            ":memory:".to_string(),
            OpenFlags::default(),
            ConnectOptions::default(),
            EventBus::default(),
        )
        .unwrap()
    }

    #[test]
    fn close_finalizes_outstanding_statements() {
        let db = memory_db();
        let conn = db.connect().unwrap();
        let stmt = conn.prepare("SELECT 1").unwrap();
        assert_eq!(conn.outstanding_statements(), 1);

        conn.close().unwrap();
        assert_eq!(conn.outstanding_statements(), 0);
        assert!(matches!(
            stmt.execute(&crate::params::Params::None),
            Err(Error::ConnectionClosed)
        ));
    }

    #[test]
    fn close_twice_is_a_noop() {
        let db = memory_db();
        let conn = db.connect().unwrap();
        conn.close().unwrap();
        conn.close().unwrap();
    }

    #[test]
    fn properties_error_after_close() {
        let db = memory_db();
        let conn = db.connect().unwrap();
        assert_eq!(conn.changes().unwrap(), 0);
        conn.close().unwrap();
        assert!(matches!(conn.changes(), Err(Error::ConnectionClosed)));
        assert!(matches!(conn.total_changes(), Err(Error::ConnectionClosed)));
        assert!(matches!(
            conn.last_insert_rowid(),
            Err(Error::ConnectionClosed)
        ));
        assert!(!conn.in_transaction());
    }

    #[test]
    fn load_extension_requires_opt_in() {
        let db = memory_db();
        let conn = db.connect().unwrap();
        assert!(matches!(
            conn.load_extension(std::path::Path::new("./ext.so"), None),
            Err(Error::LoadExtensionDisabled)
        ));
    }
}
