//! # litesql
//!
//! litesql is a thin, safe, typed client for embedded SQLite. It wraps
//! the native library behind a small connection / prepared-statement /
//! transaction API, marshalling host values to and from SQLite's typed
//! column and parameter model.
//!
//! ## Getting started
//!
//! Build a [`Database`], open a [`Connection`] to it, and query:
//!
//! ```rust,no_run
//! # async fn run() {
//! use litesql::Builder;
//!
//! let db = Builder::new_local(":memory:").build().await.unwrap();
//! let conn = db.connect().unwrap();
//! conn.execute("CREATE TABLE IF NOT EXISTS users (email TEXT)", ()).await.unwrap();
//! conn.execute("INSERT INTO users (email) VALUES (?1)", ("alice@example.org",)).await.unwrap();
//! # }
//! ```
//!
//! Every operation is synchronous from SQLite's point of view; the
//! `async` surface exists so call sites compose with other async work,
//! and resolves immediately for the local backend.
//!
//! ## Transactions
//!
//! [`Connection::transaction`] returns a guard that rolls the
//! transaction back when dropped; call [`Transaction::commit`] to keep
//! the changes:
//!
//! ```rust,no_run
//! # async fn run(conn: litesql::Connection) -> litesql::Result<()> {
//! let tx = conn.transaction().await?;
//! tx.execute("INSERT INTO users (email) VALUES (?1)", ("bob@example.org",)).await?;
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

mod local;

pub use local::{version, version_number};
pub use local::{Aggregate, Blob, FunctionFlags};

pub use litesql_sys::ffi;

pub mod errors;
pub use errors::Error;

pub mod params;
pub use params::params_from_iter;

mod connection;
mod database;
mod events;
mod rows;
mod statement;
mod transaction;
mod value;

pub use value::{Value, ValueRef, ValueType, MAX_SAFE_INTEGER};

pub use self::{
    connection::Connection,
    database::{Builder, Database, DatabaseName, OpenFlags},
    events::ConnectionEvent,
    rows::{Column, Row, Rows},
    statement::{PrepareOptions, Statement},
    transaction::{DropBehavior, Transaction, TransactionBehavior},
};

/// Convenient alias for `Result` using the `litesql::Error` type.
pub type Result<T> = std::result::Result<T, errors::Error>;
pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;
