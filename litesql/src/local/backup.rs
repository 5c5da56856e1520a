//! Online backup: a page-level copy of a database into a destination
//! file, permitted to run alongside other activity on the source.

use std::ffi::{c_int, CString};
use std::path::Path;

use litesql_sys::ffi;

use crate::database::DatabaseName;
use crate::{errors, Error, Result};

use super::Connection;

impl Connection {
    /// Copy the `name` database of this connection into the file at
    /// `dest_path` in a single step/finish cycle.
    ///
    /// `pages` is handed to the backup step; `-1` copies everything at
    /// once.
    pub fn backup(&self, name: DatabaseName<'_>, dest_path: &Path, pages: c_int) -> Result<()> {
        self.check_open()?;
        let c_dest = CString::new(dest_path.to_str().ok_or(Error::InvalidUTF8Path)?)
            .map_err(|_| Error::InvalidUTF8Path)?;

        let mut dest: *mut ffi::sqlite3 = std::ptr::null_mut();
        let rc = unsafe {
            ffi::sqlite3_open_v2(
                c_dest.as_ptr(),
                &mut dest,
                ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE,
                std::ptr::null(),
            )
        };
        if rc != ffi::SQLITE_OK {
            let err = if dest.is_null() {
                errors::sqlite_error(rc, errors::error_from_code(rc))
            } else {
                errors::last_error(dest)
            };
            unsafe { ffi::sqlite3_close_v2(dest) };
            return Err(err);
        }

        let result = run_backup(self.raw, name, dest, pages);
        unsafe { ffi::sqlite3_close_v2(dest) };
        result
    }
}

fn run_backup(
    src: *mut ffi::sqlite3,
    name: DatabaseName<'_>,
    dest: *mut ffi::sqlite3,
    pages: c_int,
) -> Result<()> {
    let src_name = name.as_cstring()?;
    let backup = unsafe {
        ffi::sqlite3_backup_init(
            dest,
            b"main\0".as_ptr() as *const std::ffi::c_char,
            src,
            src_name.as_ptr(),
        )
    };
    if backup.is_null() {
        // The failure is recorded on the destination handle.
        return Err(errors::last_error(dest));
    }

    let pages = if pages == 0 { -1 } else { pages };
    let rc = unsafe { ffi::sqlite3_backup_step(backup, pages) };
    let remaining = unsafe { ffi::sqlite3_backup_remaining(backup) };
    let pagecount = unsafe { ffi::sqlite3_backup_pagecount(backup) };
    tracing::trace!("backup step done: {remaining}/{pagecount} pages remaining");

    let finish_rc = unsafe { ffi::sqlite3_backup_finish(backup) };

    match rc {
        ffi::SQLITE_DONE | ffi::SQLITE_OK => {}
        _ => return Err(errors::sqlite_error(rc, errors::error_from_code(rc))),
    }
    match finish_rc {
        ffi::SQLITE_OK => Ok(()),
        _ => Err(errors::last_error(dest)),
    }
}

#[cfg(test)]
mod tests {
    use crate::database::{ConnectOptions, DatabaseName, OpenFlags};
    use crate::events::EventBus;
    use crate::local::Database;
    use crate::params::Params;

    fn open(path: &str) -> crate::local::Connection {
        Database::new(
            path.to_string(),
            OpenFlags::default(),
            ConnectOptions::default(),
            EventBus::default(),
        )
        .unwrap()
        .connect()
        .unwrap()
    }

    #[test]
    fn backup_copies_the_database() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dest_path = temp_dir.path().join("backup.db");

        let conn = open(":memory:");
        conn.execute("CREATE TABLE t (x INTEGER)", ()).unwrap();
        for x in 0..10i64 {
            conn.execute("INSERT INTO t VALUES (?1)", [x]).unwrap();
        }

        conn.backup(DatabaseName::Main, &dest_path, -1).unwrap();

        let restored = open(dest_path.to_str().unwrap());
        let stmt = restored.prepare("SELECT count(*) FROM t").unwrap();
        let row = stmt.query_row(&Params::None).unwrap();
        assert_eq!(row.get_value(0).unwrap(), crate::Value::Integer(10));
    }

    #[test]
    fn backup_to_unwritable_destination_fails() {
        let conn = open(":memory:");
        conn.execute("CREATE TABLE t (x INTEGER)", ()).unwrap();

        let err = conn
            .backup(
                DatabaseName::Main,
                std::path::Path::new("/no/such/dir/backup.db"),
                -1,
            )
            .unwrap_err();
        assert!(err.extended_code().is_some());
    }
}
