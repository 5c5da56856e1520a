#![allow(clippy::missing_safety_doc)]

use std::ffi::{c_char, c_int};
use std::sync::atomic::AtomicBool;

use crate::error::{Error, Result};

/// A compiled statement handle.
///
/// Finalization is idempotent so that the owning connection can sweep
/// every outstanding statement at close time while user code may still
/// hold (and later drop) its own reference.
#[derive(Debug)]
pub struct Statement {
    pub raw_stmt: *mut crate::ffi::sqlite3_stmt,
    finalized: AtomicBool,
}

// Safety: the driver opens every connection with SQLITE_CONFIG_SERIALIZED,
// so the underlying handle tolerates cross-thread use.
unsafe impl Sync for Statement {}
unsafe impl Send for Statement {}

impl Drop for Statement {
    fn drop(&mut self) {
        self.finalize();
    }
}

impl Statement {
    pub fn finalize(&self) {
        if !self
            .finalized
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            unsafe {
                crate::ffi::sqlite3_finalize(self.raw_stmt);
            }
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn bind_null(&self, idx: i32) -> c_int {
        unsafe { crate::ffi::sqlite3_bind_null(self.raw_stmt, idx) }
    }

    pub fn bind_int(&self, idx: i32, value: i32) -> c_int {
        unsafe { crate::ffi::sqlite3_bind_int(self.raw_stmt, idx, value) }
    }

    pub fn bind_int64(&self, idx: i32, value: i64) -> c_int {
        unsafe { crate::ffi::sqlite3_bind_int64(self.raw_stmt, idx, value) }
    }

    pub fn bind_double(&self, idx: i32, value: f64) -> c_int {
        unsafe { crate::ffi::sqlite3_bind_double(self.raw_stmt, idx, value) }
    }

    pub fn bind_text(&self, idx: i32, value: &[u8]) -> c_int {
        unsafe {
            crate::ffi::sqlite3_bind_text(
                self.raw_stmt,
                idx,
                value.as_ptr() as *const c_char,
                value.len() as i32,
                crate::ffi::SQLITE_TRANSIENT(),
            )
        }
    }

    pub fn bind_blob(&self, idx: i32, value: &[u8]) -> c_int {
        if value.is_empty() {
            // A zero-length blob must stay a blob; binding a dangling
            // pointer with length 0 would produce NULL.
            return unsafe { crate::ffi::sqlite3_bind_zeroblob(self.raw_stmt, idx, 0) };
        }
        unsafe {
            crate::ffi::sqlite3_bind_blob(
                self.raw_stmt,
                idx,
                value.as_ptr() as *const std::ffi::c_void,
                value.len() as i32,
                crate::ffi::SQLITE_TRANSIENT(),
            )
        }
    }

    pub fn step(&self) -> c_int {
        unsafe { crate::ffi::sqlite3_step(self.raw_stmt) }
    }

    pub fn reset(&self) -> c_int {
        unsafe { crate::ffi::sqlite3_reset(self.raw_stmt) }
    }

    pub fn clear_bindings(&self) -> c_int {
        unsafe { crate::ffi::sqlite3_clear_bindings(self.raw_stmt) }
    }

    pub fn column_count(&self) -> i32 {
        unsafe { crate::ffi::sqlite3_column_count(self.raw_stmt) }
    }

    /// Raw value slot for a result column. Only valid while the cursor
    /// still sits on the current row.
    pub fn column_value(&self, idx: i32) -> *mut crate::ffi::sqlite3_value {
        unsafe { crate::ffi::sqlite3_column_value(self.raw_stmt, idx) }
    }

    pub fn column_type(&self, idx: i32) -> i32 {
        unsafe { crate::ffi::sqlite3_column_type(self.raw_stmt, idx) }
    }

    pub fn column_name(&self, idx: i32) -> Option<&str> {
        let raw_name = unsafe { crate::ffi::sqlite3_column_name(self.raw_stmt, idx) };
        if raw_name.is_null() {
            return None;
        }
        let raw_name = unsafe { std::ffi::CStr::from_ptr(raw_name) };
        // SQLite promises valid UTF-8 for column names.
        Some(raw_name.to_str().unwrap())
    }

    pub fn column_decltype(&self, idx: i32) -> Option<&str> {
        let raw = unsafe { crate::ffi::sqlite3_column_decltype(self.raw_stmt, idx) };
        if raw.is_null() {
            return None;
        }
        let raw = unsafe { std::ffi::CStr::from_ptr(raw) };
        Some(raw.to_str().unwrap())
    }

    pub fn bind_parameter_index(&self, name: &str) -> i32 {
        let raw_name = match std::ffi::CString::new(name) {
            Ok(name) => name,
            Err(_) => return 0,
        };
        unsafe { crate::ffi::sqlite3_bind_parameter_index(self.raw_stmt, raw_name.as_ptr()) }
    }

    pub fn bind_parameter_count(&self) -> usize {
        unsafe { crate::ffi::sqlite3_bind_parameter_count(self.raw_stmt) as usize }
    }

    pub fn bind_parameter_name(&self, index: i32) -> Option<&str> {
        unsafe {
            let name = crate::ffi::sqlite3_bind_parameter_name(self.raw_stmt, index);
            if name.is_null() {
                None
            } else {
                Some(std::ffi::CStr::from_ptr(name).to_str().unwrap())
            }
        }
    }

    pub fn readonly(&self) -> bool {
        unsafe { crate::ffi::sqlite3_stmt_readonly(self.raw_stmt) != 0 }
    }
}

// Handed to sqlite when the caller's SQL is an empty string, whose
// backing pointer may dangle.
const EMPTY_SQL: &[u8] = b"\0";

/// Compile the first statement in `sql`.
///
/// Trailing SQL after the first complete statement is ignored; this
/// driver does not execute multi-statement scripts through a single
/// prepare. Empty input (or a lone comment) yields a handle whose
/// `raw_stmt` is NULL, which callers must check before stepping.
pub unsafe fn prepare_stmt(raw: *mut crate::ffi::sqlite3, sql: &str) -> Result<Statement> {
    // The C interface takes the text length as an int; refuse what it
    // cannot represent instead of silently truncating.
    let len = c_int::try_from(sql.len()).map_err(|_| Error::SqlTooLong(sql.len()))?;

    let sql_ptr = if sql.is_empty() {
        EMPTY_SQL.as_ptr()
    } else {
        sql.as_ptr()
    };

    let mut raw_stmt = std::ptr::null_mut();
    let rc = unsafe {
        crate::ffi::sqlite3_prepare_v2(
            raw,
            sql_ptr.cast::<c_char>(),
            len,
            &mut raw_stmt,
            std::ptr::null_mut(),
        )
    };
    if rc != crate::ffi::SQLITE_OK {
        return Err(Error::Code(rc));
    }
    Ok(Statement {
        raw_stmt,
        finalized: AtomicBool::new(false),
    })
}
