use std::ffi::c_int;

/// Failures the raw wrapper layer can produce on its own.
///
/// Most native failures are reported as a bare status code; the owning
/// connection is the right place to read the message for it, so this
/// layer never fetches error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A native call returned this non-OK (extended) result code.
    Code(c_int),
    /// The SQL text is longer than the C interface can be handed.
    SqlTooLong(usize),
}

impl Error {
    /// The status code the driver layer should decode this as.
    pub fn code(&self) -> c_int {
        match self {
            Error::Code(code) => *code,
            Error::SqlTooLong(_) => litesql_ffi::SQLITE_TOOBIG,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Code(code) => write!(f, "sqlite returned status code {code}"),
            Error::SqlTooLong(len) => {
                write!(f, "sql text of {len} bytes exceeds the native length limit")
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
