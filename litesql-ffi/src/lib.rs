#![allow(non_snake_case, non_camel_case_types)]

//! Raw bindings to the system SQLite library.
//!
//! Only the symbol surface the driver actually calls is declared here.
//! The library is assumed present and ABI-compatible with SQLite 3.x.
//! This crate stays at the C level on purpose: status codes are plain
//! `c_int`s, and human-readable error text is read at runtime through
//! `sqlite3_errstr`/`sqlite3_errmsg` rather than duplicated here.

use std::mem;
use std::os::raw::{c_char, c_int, c_uchar, c_void};

/// Opaque database connection handle.
#[repr(C)]
pub struct sqlite3 {
    _unused: [u8; 0],
}

/// Opaque prepared statement handle.
#[repr(C)]
pub struct sqlite3_stmt {
    _unused: [u8; 0],
}

/// Opaque protected value slot.
#[repr(C)]
pub struct sqlite3_value {
    _unused: [u8; 0],
}

/// Opaque SQL function evaluation context.
#[repr(C)]
pub struct sqlite3_context {
    _unused: [u8; 0],
}

/// Opaque incremental BLOB handle.
#[repr(C)]
pub struct sqlite3_blob {
    _unused: [u8; 0],
}

/// Opaque online backup handle.
#[repr(C)]
pub struct sqlite3_backup {
    _unused: [u8; 0],
}

pub type sqlite3_destructor_type = Option<unsafe extern "C" fn(*mut c_void)>;

pub type sqlite3_func_callback =
    Option<unsafe extern "C" fn(*mut sqlite3_context, c_int, *mut *mut sqlite3_value)>;

pub type sqlite3_final_callback = Option<unsafe extern "C" fn(*mut sqlite3_context)>;

#[must_use]
pub fn SQLITE_STATIC() -> sqlite3_destructor_type {
    None
}

#[must_use]
pub fn SQLITE_TRANSIENT() -> sqlite3_destructor_type {
    Some(unsafe { mem::transmute(-1_isize) })
}

// Primary result codes.
pub const SQLITE_OK: c_int = 0;
pub const SQLITE_ERROR: c_int = 1;
pub const SQLITE_INTERNAL: c_int = 2;
pub const SQLITE_PERM: c_int = 3;
pub const SQLITE_ABORT: c_int = 4;
pub const SQLITE_BUSY: c_int = 5;
pub const SQLITE_LOCKED: c_int = 6;
pub const SQLITE_NOMEM: c_int = 7;
pub const SQLITE_READONLY: c_int = 8;
pub const SQLITE_INTERRUPT: c_int = 9;
pub const SQLITE_IOERR: c_int = 10;
pub const SQLITE_CORRUPT: c_int = 11;
pub const SQLITE_NOTFOUND: c_int = 12;
pub const SQLITE_FULL: c_int = 13;
pub const SQLITE_CANTOPEN: c_int = 14;
pub const SQLITE_PROTOCOL: c_int = 15;
pub const SQLITE_EMPTY: c_int = 16;
pub const SQLITE_SCHEMA: c_int = 17;
pub const SQLITE_TOOBIG: c_int = 18;
pub const SQLITE_CONSTRAINT: c_int = 19;
pub const SQLITE_MISMATCH: c_int = 20;
pub const SQLITE_MISUSE: c_int = 21;
pub const SQLITE_NOLFS: c_int = 22;
pub const SQLITE_AUTH: c_int = 23;
pub const SQLITE_FORMAT: c_int = 24;
pub const SQLITE_RANGE: c_int = 25;
pub const SQLITE_NOTADB: c_int = 26;
pub const SQLITE_NOTICE: c_int = 27;
pub const SQLITE_WARNING: c_int = 28;
pub const SQLITE_ROW: c_int = 100;
pub const SQLITE_DONE: c_int = 101;

// Extended result codes the driver distinguishes.
pub const SQLITE_BUSY_RECOVERY: c_int = SQLITE_BUSY | (1 << 8);
pub const SQLITE_BUSY_SNAPSHOT: c_int = SQLITE_BUSY | (2 << 8);
pub const SQLITE_BUSY_TIMEOUT: c_int = SQLITE_BUSY | (3 << 8);
pub const SQLITE_LOCKED_SHAREDCACHE: c_int = SQLITE_LOCKED | (1 << 8);
pub const SQLITE_ABORT_ROLLBACK: c_int = SQLITE_ABORT | (2 << 8);
pub const SQLITE_CONSTRAINT_CHECK: c_int = SQLITE_CONSTRAINT | (1 << 8);
pub const SQLITE_CONSTRAINT_COMMITHOOK: c_int = SQLITE_CONSTRAINT | (2 << 8);
pub const SQLITE_CONSTRAINT_FOREIGNKEY: c_int = SQLITE_CONSTRAINT | (3 << 8);
pub const SQLITE_CONSTRAINT_FUNCTION: c_int = SQLITE_CONSTRAINT | (4 << 8);
pub const SQLITE_CONSTRAINT_NOTNULL: c_int = SQLITE_CONSTRAINT | (5 << 8);
pub const SQLITE_CONSTRAINT_PRIMARYKEY: c_int = SQLITE_CONSTRAINT | (6 << 8);
pub const SQLITE_CONSTRAINT_TRIGGER: c_int = SQLITE_CONSTRAINT | (7 << 8);
pub const SQLITE_CONSTRAINT_UNIQUE: c_int = SQLITE_CONSTRAINT | (8 << 8);
pub const SQLITE_CONSTRAINT_ROWID: c_int = SQLITE_CONSTRAINT | (10 << 8);
pub const SQLITE_CANTOPEN_ISDIR: c_int = SQLITE_CANTOPEN | (2 << 8);
pub const SQLITE_CANTOPEN_FULLPATH: c_int = SQLITE_CANTOPEN | (3 << 8);
pub const SQLITE_READONLY_RECOVERY: c_int = SQLITE_READONLY | (1 << 8);
pub const SQLITE_READONLY_CANTLOCK: c_int = SQLITE_READONLY | (2 << 8);
pub const SQLITE_IOERR_READ: c_int = SQLITE_IOERR | (1 << 8);
pub const SQLITE_IOERR_SHORT_READ: c_int = SQLITE_IOERR | (2 << 8);
pub const SQLITE_IOERR_WRITE: c_int = SQLITE_IOERR | (3 << 8);
pub const SQLITE_IOERR_FSYNC: c_int = SQLITE_IOERR | (4 << 8);

// Open flags.
pub const SQLITE_OPEN_READONLY: c_int = 0x0000_0001;
pub const SQLITE_OPEN_READWRITE: c_int = 0x0000_0002;
pub const SQLITE_OPEN_CREATE: c_int = 0x0000_0004;
pub const SQLITE_OPEN_URI: c_int = 0x0000_0040;
pub const SQLITE_OPEN_MEMORY: c_int = 0x0000_0080;
pub const SQLITE_OPEN_NOMUTEX: c_int = 0x0000_8000;
pub const SQLITE_OPEN_FULLMUTEX: c_int = 0x0001_0000;

// Fundamental column/value type codes.
pub const SQLITE_INTEGER: c_int = 1;
pub const SQLITE_FLOAT: c_int = 2;
pub const SQLITE_TEXT: c_int = 3;
pub const SQLITE_BLOB: c_int = 4;
pub const SQLITE_NULL: c_int = 5;

// Text encodings and function flags for sqlite3_create_function_v2.
pub const SQLITE_UTF8: c_int = 1;
pub const SQLITE_DETERMINISTIC: c_int = 0x0000_0800;
pub const SQLITE_DIRECTONLY: c_int = 0x0008_0000;
pub const SQLITE_SUBTYPE: c_int = 0x0010_0000;
pub const SQLITE_INNOCUOUS: c_int = 0x0020_0000;

// sqlite3_config / sqlite3_db_config verbs.
pub const SQLITE_CONFIG_SERIALIZED: c_int = 3;
pub const SQLITE_DBCONFIG_ENABLE_LOAD_EXTENSION: c_int = 1005;

extern "C" {
    pub fn sqlite3_open_v2(
        filename: *const c_char,
        db: *mut *mut sqlite3,
        flags: c_int,
        vfs: *const c_char,
    ) -> c_int;

    pub fn sqlite3_close_v2(db: *mut sqlite3) -> c_int;

    pub fn sqlite3_errcode(db: *mut sqlite3) -> c_int;
    pub fn sqlite3_extended_errcode(db: *mut sqlite3) -> c_int;
    pub fn sqlite3_errmsg(db: *mut sqlite3) -> *const c_char;
    pub fn sqlite3_errstr(code: c_int) -> *const c_char;
    pub fn sqlite3_extended_result_codes(db: *mut sqlite3, onoff: c_int) -> c_int;

    pub fn sqlite3_prepare_v2(
        db: *mut sqlite3,
        sql: *const c_char,
        n_byte: c_int,
        stmt: *mut *mut sqlite3_stmt,
        tail: *mut *const c_char,
    ) -> c_int;

    pub fn sqlite3_step(stmt: *mut sqlite3_stmt) -> c_int;
    pub fn sqlite3_reset(stmt: *mut sqlite3_stmt) -> c_int;
    pub fn sqlite3_clear_bindings(stmt: *mut sqlite3_stmt) -> c_int;
    pub fn sqlite3_finalize(stmt: *mut sqlite3_stmt) -> c_int;
    pub fn sqlite3_stmt_readonly(stmt: *mut sqlite3_stmt) -> c_int;

    pub fn sqlite3_bind_null(stmt: *mut sqlite3_stmt, idx: c_int) -> c_int;
    pub fn sqlite3_bind_int(stmt: *mut sqlite3_stmt, idx: c_int, value: c_int) -> c_int;
    pub fn sqlite3_bind_int64(stmt: *mut sqlite3_stmt, idx: c_int, value: i64) -> c_int;
    pub fn sqlite3_bind_double(stmt: *mut sqlite3_stmt, idx: c_int, value: f64) -> c_int;
    pub fn sqlite3_bind_text(
        stmt: *mut sqlite3_stmt,
        idx: c_int,
        value: *const c_char,
        n_byte: c_int,
        destructor: sqlite3_destructor_type,
    ) -> c_int;
    pub fn sqlite3_bind_blob(
        stmt: *mut sqlite3_stmt,
        idx: c_int,
        value: *const c_void,
        n_byte: c_int,
        destructor: sqlite3_destructor_type,
    ) -> c_int;
    pub fn sqlite3_bind_zeroblob(stmt: *mut sqlite3_stmt, idx: c_int, n_byte: c_int) -> c_int;
    pub fn sqlite3_bind_parameter_count(stmt: *mut sqlite3_stmt) -> c_int;
    pub fn sqlite3_bind_parameter_index(stmt: *mut sqlite3_stmt, name: *const c_char) -> c_int;
    pub fn sqlite3_bind_parameter_name(stmt: *mut sqlite3_stmt, idx: c_int) -> *const c_char;

    pub fn sqlite3_column_count(stmt: *mut sqlite3_stmt) -> c_int;
    pub fn sqlite3_column_name(stmt: *mut sqlite3_stmt, idx: c_int) -> *const c_char;
    pub fn sqlite3_column_decltype(stmt: *mut sqlite3_stmt, idx: c_int) -> *const c_char;
    pub fn sqlite3_column_type(stmt: *mut sqlite3_stmt, idx: c_int) -> c_int;
    pub fn sqlite3_column_value(stmt: *mut sqlite3_stmt, idx: c_int) -> *mut sqlite3_value;
    pub fn sqlite3_column_int64(stmt: *mut sqlite3_stmt, idx: c_int) -> i64;
    pub fn sqlite3_column_double(stmt: *mut sqlite3_stmt, idx: c_int) -> f64;
    pub fn sqlite3_column_text(stmt: *mut sqlite3_stmt, idx: c_int) -> *const c_uchar;
    pub fn sqlite3_column_blob(stmt: *mut sqlite3_stmt, idx: c_int) -> *const c_void;
    pub fn sqlite3_column_bytes(stmt: *mut sqlite3_stmt, idx: c_int) -> c_int;

    pub fn sqlite3_value_type(value: *mut sqlite3_value) -> c_int;
    pub fn sqlite3_value_numeric_type(value: *mut sqlite3_value) -> c_int;
    pub fn sqlite3_value_int(value: *mut sqlite3_value) -> c_int;
    pub fn sqlite3_value_int64(value: *mut sqlite3_value) -> i64;
    pub fn sqlite3_value_double(value: *mut sqlite3_value) -> f64;
    pub fn sqlite3_value_text(value: *mut sqlite3_value) -> *const c_uchar;
    pub fn sqlite3_value_blob(value: *mut sqlite3_value) -> *const c_void;
    pub fn sqlite3_value_bytes(value: *mut sqlite3_value) -> c_int;

    pub fn sqlite3_result_null(ctx: *mut sqlite3_context);
    pub fn sqlite3_result_int(ctx: *mut sqlite3_context, value: c_int);
    pub fn sqlite3_result_int64(ctx: *mut sqlite3_context, value: i64);
    pub fn sqlite3_result_double(ctx: *mut sqlite3_context, value: f64);
    pub fn sqlite3_result_text(
        ctx: *mut sqlite3_context,
        value: *const c_char,
        n_byte: c_int,
        destructor: sqlite3_destructor_type,
    );
    pub fn sqlite3_result_blob(
        ctx: *mut sqlite3_context,
        value: *const c_void,
        n_byte: c_int,
        destructor: sqlite3_destructor_type,
    );
    pub fn sqlite3_result_error(ctx: *mut sqlite3_context, msg: *const c_char, n_byte: c_int);
    pub fn sqlite3_result_error_code(ctx: *mut sqlite3_context, code: c_int);
    pub fn sqlite3_result_error_toobig(ctx: *mut sqlite3_context);

    pub fn sqlite3_create_function_v2(
        db: *mut sqlite3,
        name: *const c_char,
        n_arg: c_int,
        flags: c_int,
        app: *mut c_void,
        x_func: sqlite3_func_callback,
        x_step: sqlite3_func_callback,
        x_final: sqlite3_final_callback,
        x_destroy: sqlite3_destructor_type,
    ) -> c_int;
    pub fn sqlite3_aggregate_context(ctx: *mut sqlite3_context, n_bytes: c_int) -> *mut c_void;
    pub fn sqlite3_user_data(ctx: *mut sqlite3_context) -> *mut c_void;

    pub fn sqlite3_blob_open(
        db: *mut sqlite3,
        database: *const c_char,
        table: *const c_char,
        column: *const c_char,
        row: i64,
        flags: c_int,
        blob: *mut *mut sqlite3_blob,
    ) -> c_int;
    pub fn sqlite3_blob_reopen(blob: *mut sqlite3_blob, row: i64) -> c_int;
    pub fn sqlite3_blob_bytes(blob: *mut sqlite3_blob) -> c_int;
    pub fn sqlite3_blob_read(
        blob: *mut sqlite3_blob,
        buf: *mut c_void,
        n: c_int,
        offset: c_int,
    ) -> c_int;
    pub fn sqlite3_blob_write(
        blob: *mut sqlite3_blob,
        buf: *const c_void,
        n: c_int,
        offset: c_int,
    ) -> c_int;
    pub fn sqlite3_blob_close(blob: *mut sqlite3_blob) -> c_int;

    pub fn sqlite3_backup_init(
        dest: *mut sqlite3,
        dest_name: *const c_char,
        source: *mut sqlite3,
        source_name: *const c_char,
    ) -> *mut sqlite3_backup;
    pub fn sqlite3_backup_step(backup: *mut sqlite3_backup, n_page: c_int) -> c_int;
    pub fn sqlite3_backup_finish(backup: *mut sqlite3_backup) -> c_int;
    pub fn sqlite3_backup_remaining(backup: *mut sqlite3_backup) -> c_int;
    pub fn sqlite3_backup_pagecount(backup: *mut sqlite3_backup) -> c_int;

    pub fn sqlite3_changes64(db: *mut sqlite3) -> i64;
    pub fn sqlite3_total_changes(db: *mut sqlite3) -> c_int;
    pub fn sqlite3_last_insert_rowid(db: *mut sqlite3) -> i64;
    pub fn sqlite3_get_autocommit(db: *mut sqlite3) -> c_int;
    pub fn sqlite3_busy_timeout(db: *mut sqlite3, ms: c_int) -> c_int;
    pub fn sqlite3_interrupt(db: *mut sqlite3);

    pub fn sqlite3_db_config(db: *mut sqlite3, op: c_int, ...) -> c_int;
    pub fn sqlite3_load_extension(
        db: *mut sqlite3,
        file: *const c_char,
        entry_point: *const c_char,
        errmsg: *mut *mut c_char,
    ) -> c_int;

    pub fn sqlite3_libversion() -> *const c_char;
    pub fn sqlite3_libversion_number() -> c_int;
    pub fn sqlite3_config(op: c_int, ...) -> c_int;
    pub fn sqlite3_initialize() -> c_int;
    pub fn sqlite3_free(ptr: *mut c_void);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_codes_carry_their_primary_code_in_the_low_byte() {
        for (extended, primary) in [
            (SQLITE_BUSY_SNAPSHOT, SQLITE_BUSY),
            (SQLITE_CONSTRAINT_UNIQUE, SQLITE_CONSTRAINT),
            (SQLITE_IOERR_FSYNC, SQLITE_IOERR),
        ] {
            assert_eq!(extended & 0xff, primary);
        }
    }
}
