//! Incremental BLOB I/O.
//!
//! SQLite fixes a blob's length when the handle opens; this API reads
//! and writes byte ranges within that length but cannot grow it. Use
//! `zeroblob(N)` in SQL to size the cell first.
//!
//! `Blob` also implements `std::io::{Read, Write, Seek}` for positional
//! use. Watch the returned byte counts: both directions silently clamp
//! at the end of the blob.

use std::cmp::min;
use std::io;

use litesql_sys::ffi;

use crate::database::DatabaseName;
use crate::{errors, Error, Result};

use super::Connection;

/// Handle to an open BLOB.
pub struct Blob {
    conn: Connection,
    blob: *mut ffi::sqlite3_blob,
    pos: i32,
    size: i32,
}

// SAFETY: the serialized threading model protects the underlying
// handle; the pos/size fields are plain data.
unsafe impl Send for Blob {}

impl Connection {
    /// Open a handle to the BLOB located at `row` in `table.column` of
    /// database `db`.
    pub fn blob_open(
        &self,
        db: DatabaseName<'_>,
        table: &str,
        column: &str,
        row: i64,
        read_only: bool,
    ) -> Result<Blob> {
        self.check_open()?;
        let db = db.as_cstring()?;
        let table = std::ffi::CString::new(table)
            .map_err(|_| Error::Misuse("table name contains a NUL byte".into()))?;
        let column = std::ffi::CString::new(column)
            .map_err(|_| Error::Misuse("column name contains a NUL byte".into()))?;
        let mut blob = std::ptr::null_mut();
        let rc = unsafe {
            ffi::sqlite3_blob_open(
                self.raw,
                db.as_ptr(),
                table.as_ptr(),
                column.as_ptr(),
                row,
                if read_only { 0 } else { 1 },
                &mut blob,
            )
        };
        if rc != ffi::SQLITE_OK {
            return Err(errors::last_error(self.raw));
        }
        let size = unsafe { ffi::sqlite3_blob_bytes(blob) };
        Ok(Blob {
            conn: self.clone(),
            blob,
            pos: 0,
            size,
        })
    }
}

impl Blob {
    /// The blob's size in bytes, fixed when the handle was opened.
    pub fn size(&self) -> i32 {
        self.size
    }

    fn check_open(&self) -> Result<()> {
        if self.blob.is_null() {
            Err(Error::BlobClosed)
        } else {
            Ok(())
        }
    }

    /// Move the handle to the same column of a different row.
    pub fn reopen(&mut self, row: i64) -> Result<()> {
        self.check_open()?;
        let rc = unsafe { ffi::sqlite3_blob_reopen(self.blob, row) };
        if rc != ffi::SQLITE_OK {
            return Err(errors::last_error(self.conn.raw));
        }
        self.pos = 0;
        self.size = unsafe { ffi::sqlite3_blob_bytes(self.blob) };
        Ok(())
    }

    /// Read bytes starting at `offset`, clamped to the blob's end.
    /// Returns how many bytes were read.
    pub fn read_at(&self, buf: &mut [u8], offset: usize) -> Result<usize> {
        self.check_open()?;
        if offset >= self.size as usize {
            return Ok(0);
        }
        let n = min(buf.len(), self.size as usize - offset) as i32;
        if n <= 0 {
            return Ok(0);
        }
        let rc = unsafe {
            ffi::sqlite3_blob_read(
                self.blob,
                buf.as_mut_ptr() as *mut std::ffi::c_void,
                n,
                offset as i32,
            )
        };
        if rc != ffi::SQLITE_OK {
            return Err(errors::last_error(self.conn.raw));
        }
        Ok(n as usize)
    }

    /// Write bytes starting at `offset`, clamped to the blob's end.
    /// Returns how many bytes were written.
    pub fn write_at(&self, data: &[u8], offset: usize) -> Result<usize> {
        self.check_open()?;
        if offset >= self.size as usize {
            return Ok(0);
        }
        let n = min(data.len(), self.size as usize - offset) as i32;
        if n <= 0 {
            return Ok(0);
        }
        let rc = unsafe {
            ffi::sqlite3_blob_write(
                self.blob,
                data.as_ptr() as *const std::ffi::c_void,
                n,
                offset as i32,
            )
        };
        if rc != ffi::SQLITE_OK {
            return Err(errors::last_error(self.conn.raw));
        }
        Ok(n as usize)
    }

    /// Close the handle. Closing is idempotent; reads and writes after
    /// close fail with [`Error::BlobClosed`].
    pub fn close(&mut self) -> Result<()> {
        if self.blob.is_null() {
            return Ok(());
        }
        let rc = unsafe { ffi::sqlite3_blob_close(self.blob) };
        self.blob = std::ptr::null_mut();
        if rc != ffi::SQLITE_OK {
            return Err(errors::last_error(self.conn.raw));
        }
        Ok(())
    }
}

impl io::Read for Blob {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self
            .read_at(buf, self.pos as usize)
            .map_err(io::Error::other)?;
        self.pos += n as i32;
        Ok(n)
    }
}

impl io::Write for Blob {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self
            .write_at(buf, self.pos as usize)
            .map_err(io::Error::other)?;
        self.pos += n as i32;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Seek for Blob {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let target = match pos {
            io::SeekFrom::Start(offset) => offset as i64,
            io::SeekFrom::End(offset) => self.size as i64 + offset,
            io::SeekFrom::Current(offset) => self.pos as i64 + offset,
        };
        if target < 0 || target > self.size as i64 {
            Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid seek to {target}"),
            ))
        } else {
            self.pos = target as i32;
            Ok(target as u64)
        }
    }
}

impl Drop for Blob {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::error!("error closing blob handle: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Seek, SeekFrom, Write};

    use crate::database::{ConnectOptions, DatabaseName, OpenFlags};
    use crate::events::EventBus;
    use crate::local::Database;
    use crate::Error;

    fn setup() -> crate::local::Connection {
        let db = Database::new(
            ":memory:".to_string(),
            OpenFlags::default(),
            ConnectOptions::default(),
            EventBus::default(),
        )
        .unwrap();
        let conn = db.connect().unwrap();
        conn.execute("CREATE TABLE test (content BLOB)", ()).unwrap();
        conn.execute("INSERT INTO test (content) VALUES (ZEROBLOB(10))", ())
            .unwrap();
        conn
    }

    #[test]
    fn round_trip_within_fixed_length() {
        let conn = setup();
        let rowid = conn.last_insert_rowid().unwrap();
        let mut blob = conn
            .blob_open(DatabaseName::Main, "test", "content", rowid, false)
            .unwrap();

        let written = blob.write(b"01234567").unwrap();
        assert_eq!(written, 8);

        blob.seek(SeekFrom::Start(0)).unwrap();
        let mut buf = [0u8; 20];
        // Ten bytes come back: the blob's size, not the buffer's.
        let read = blob.read(&mut buf[..]).unwrap();
        assert_eq!(read, 10);
        assert_eq!(&buf[..8], b"01234567");
    }

    #[test]
    fn writes_clamp_at_the_end() {
        let conn = setup();
        let rowid = conn.last_insert_rowid().unwrap();
        let blob = conn
            .blob_open(DatabaseName::Main, "test", "content", rowid, false)
            .unwrap();

        assert_eq!(blob.write_at(b"abcdef", 8).unwrap(), 2);
        assert_eq!(blob.write_at(b"abcdef", 10).unwrap(), 0);
    }

    #[test]
    fn close_is_idempotent_and_io_after_close_errors() {
        let conn = setup();
        let rowid = conn.last_insert_rowid().unwrap();
        let mut blob = conn
            .blob_open(DatabaseName::Main, "test", "content", rowid, true)
            .unwrap();

        blob.close().unwrap();
        blob.close().unwrap();

        let mut buf = [0u8; 4];
        assert!(matches!(
            blob.read_at(&mut buf, 0),
            Err(Error::BlobClosed)
        ));
        assert!(matches!(blob.write_at(b"x", 0), Err(Error::BlobClosed)));
    }

    #[test]
    fn readonly_handle_rejects_writes() {
        let conn = setup();
        let rowid = conn.last_insert_rowid().unwrap();
        let blob = conn
            .blob_open(DatabaseName::Main, "test", "content", rowid, true)
            .unwrap();

        assert!(blob.write_at(b"abc", 0).is_err());
    }

    #[test]
    fn reopen_moves_to_another_row() {
        let conn = setup();
        conn.execute("INSERT INTO test (content) VALUES (ZEROBLOB(64))", ())
            .unwrap();
        let second = conn.last_insert_rowid().unwrap();

        let mut blob = conn
            .blob_open(DatabaseName::Main, "test", "content", 1, true)
            .unwrap();
        assert_eq!(blob.size(), 10);
        blob.reopen(second).unwrap();
        assert_eq!(blob.size(), 64);
    }
}
