use std::sync::Once;

use litesql_sys::ffi;

use crate::database::{ConnectOptions, OpenFlags};
use crate::events::EventBus;
use crate::local::connection::Connection;
use crate::{Error::ConnectionFailed, Result};

/// A local database: a path, the resolved open flags, and the
/// connection options every [`Connection`] inherits.
pub struct Database {
    pub(crate) db_path: String,
    pub(crate) flags: OpenFlags,
    pub(crate) options: ConnectOptions,
    pub(crate) events: EventBus,
}

impl Database {
    pub(crate) fn new(
        db_path: String,
        flags: OpenFlags,
        options: ConnectOptions,
        events: EventBus,
    ) -> Result<Database> {
        if db_path.starts_with("http:") || db_path.starts_with("https:") {
            return Err(ConnectionFailed(format!(
                "`{db_path}` is not a local database path"
            )));
        }

        static SQLITE_INIT: Once = Once::new();

        SQLITE_INIT.call_once(|| {
            // The whole API relies on the serialized threading model;
            // nothing here is safe if another configuration won.
            unsafe {
                assert_eq!(
                    ffi::sqlite3_config(ffi::SQLITE_CONFIG_SERIALIZED),
                    ffi::SQLITE_OK,
                    "sqlite3 refused the serialized threading configuration; \
                     check that no other option was set before the first open"
                );

                assert_eq!(
                    ffi::sqlite3_initialize(),
                    ffi::SQLITE_OK,
                    "sqlite3 failed to initialize"
                );
            }
        });

        Ok(Database {
            db_path,
            flags,
            options,
            events,
        })
    }

    pub fn connect(&self) -> Result<Connection> {
        Connection::connect(self)
    }

    pub(crate) fn path(&self) -> &str {
        &self.db_path
    }
}
