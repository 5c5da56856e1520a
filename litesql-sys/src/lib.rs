pub mod ffi {
    //! Raw C bindings, re-exported for the driver crate.
    pub use litesql_ffi::*;
}

pub mod error;
pub mod statement;

pub use error::{Error, Result};
pub use statement::{prepare_stmt, Statement};
