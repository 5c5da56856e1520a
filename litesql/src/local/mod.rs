pub mod blob;
pub mod connection;
pub mod database;
pub mod functions;
pub mod rows;
pub mod statement;
pub mod transaction;

mod backup;
pub(crate) mod impls;

pub use crate::{Error, Result};
pub use blob::Blob;
pub use connection::Connection;
pub use database::Database;
pub use functions::{Aggregate, FunctionFlags, ScalarFunction};
pub use rows::Row;
pub use rows::Rows;
pub use statement::Statement;
pub use transaction::{Savepoint, Transaction};

use litesql_sys::ffi;

/// Return the version of the underlying SQLite library as a number.
pub fn version_number() -> i32 {
    unsafe { ffi::sqlite3_libversion_number() }
}

/// Return the version of the underlying SQLite library as a string.
pub fn version() -> &'static str {
    unsafe {
        std::ffi::CStr::from_ptr(ffi::sqlite3_libversion())
            .to_str()
            .unwrap()
    }
}
