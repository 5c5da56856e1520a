use std::ffi::c_int;

use litesql_sys::ffi;

/// The error surface of the driver.
///
/// Native failures are decoded through [`sqlite_error`], which keeps the
/// extended result code alongside the connection's error message. The
/// remaining variants are driver-level misuse that never reaches SQLite.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Failed to connect to database: `{0}`")]
    ConnectionFailed(String),
    #[error("SQLite failure: `{1}`")]
    SqliteFailure(c_int, String),
    #[error("database is busy: `{1}`")]
    Busy(c_int, String),
    #[error("database is locked: `{1}`")]
    Locked(c_int, String),
    #[error("constraint violation: `{1}`")]
    Constraint(c_int, String),
    #[error("I/O error: `{1}`")]
    Io(c_int, String),
    #[error("unable to open database: `{1}`")]
    DatabaseNotFound(c_int, String),
    #[error("API misuse: `{0}`")]
    Misuse(String),
    #[error("connection is closed")]
    ConnectionClosed,
    #[error("integer {0} exceeds the safe integer range; prepare with `int64` to keep full precision")]
    IntegerOutOfRange(i64),
    #[error("statement is streaming rows; drain or reset it before starting another traversal")]
    StatementBusy,
    #[error("blob handle is closed")]
    BlobClosed,
    #[error("transaction is no longer active")]
    TransactionInactive,
    #[error("statement takes {expected} parameters but {given} were supplied")]
    TooManyParameters { expected: usize, given: usize },
    #[error("parameters `{0}` and `{1}` resolve to the same slot")]
    DuplicateParameter(String, String),
    #[error("no such parameter: `{0}`")]
    UnknownParameter(String),
    #[error("Execute returned rows")]
    ExecuteReturnedRows,
    #[error("Query returned no rows")]
    QueryReturnedNoRows,
    #[error("Invalid column name: `{0}`")]
    InvalidColumnName(String),
    #[error("invalid column index")]
    InvalidColumnIndex,
    #[error("invalid column type")]
    InvalidColumnType,
    #[error("Null value")]
    NullValue,
    #[error("SQL conversion failure: `{0}`")]
    ToSqlConversionFailure(crate::BoxError),
    #[error("loading extensions is disabled for this connection")]
    LoadExtensionDisabled,
    #[error("path has invalid UTF-8")]
    InvalidUTF8Path,
}

impl Error {
    /// The SQLite extended result code behind this error, when there is
    /// one.
    pub fn extended_code(&self) -> Option<c_int> {
        match self {
            Error::SqliteFailure(code, _)
            | Error::Busy(code, _)
            | Error::Locked(code, _)
            | Error::Constraint(code, _)
            | Error::Io(code, _)
            | Error::DatabaseNotFound(code, _) => Some(*code),
            _ => None,
        }
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(_: std::convert::Infallible) -> Self {
        unreachable!()
    }
}

/// Central decode point: every non-OK native return funnels through
/// here so the primary code picks the typed variant and the extended
/// code rides along.
pub(crate) fn sqlite_error(code: c_int, message: String) -> Error {
    match code & 0xff {
        ffi::SQLITE_BUSY => Error::Busy(code, message),
        ffi::SQLITE_LOCKED => Error::Locked(code, message),
        ffi::SQLITE_CONSTRAINT => Error::Constraint(code, message),
        ffi::SQLITE_IOERR => Error::Io(code, message),
        ffi::SQLITE_CANTOPEN => Error::DatabaseNotFound(code, message),
        ffi::SQLITE_MISUSE => Error::Misuse(message),
        _ => Error::SqliteFailure(code, message),
    }
}

pub(crate) fn error_from_handle(raw: *mut ffi::sqlite3) -> String {
    let errmsg = unsafe { ffi::sqlite3_errmsg(raw) };
    sqlite_errmsg_to_string(errmsg)
}

pub(crate) fn extended_error_code(raw: *mut ffi::sqlite3) -> c_int {
    unsafe { ffi::sqlite3_extended_errcode(raw) }
}

/// Decode the failure currently recorded on a connection handle.
pub(crate) fn last_error(raw: *mut ffi::sqlite3) -> Error {
    sqlite_error(extended_error_code(raw), error_from_handle(raw))
}

pub fn error_from_code(code: i32) -> String {
    let errmsg = unsafe { ffi::sqlite3_errstr(code) };
    sqlite_errmsg_to_string(errmsg)
}

#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub fn sqlite_errmsg_to_string(errmsg: *const std::ffi::c_char) -> String {
    let errmsg = unsafe { std::ffi::CStr::from_ptr(errmsg) }.to_bytes();
    String::from_utf8_lossy(errmsg).to_string()
}
