use std::ffi::CString;
use std::sync::Arc;
use std::time::Duration;

use crate::events::{ConnectionEvent, EventBus};
use crate::local::impls::LocalConnection;
use crate::{Connection, Error, Result};

bitflags::bitflags! {
    /// Flags that can be passed to SQLite to open a database in
    /// specific modes.
    #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
    #[repr(C)]
    pub struct OpenFlags: ::std::os::raw::c_int {
        const SQLITE_OPEN_READ_ONLY = litesql_sys::ffi::SQLITE_OPEN_READONLY;
        const SQLITE_OPEN_READ_WRITE = litesql_sys::ffi::SQLITE_OPEN_READWRITE;
        const SQLITE_OPEN_CREATE = litesql_sys::ffi::SQLITE_OPEN_CREATE;
        const SQLITE_OPEN_URI = litesql_sys::ffi::SQLITE_OPEN_URI;
        const SQLITE_OPEN_MEMORY = litesql_sys::ffi::SQLITE_OPEN_MEMORY;
        const SQLITE_OPEN_NO_MUTEX = litesql_sys::ffi::SQLITE_OPEN_NOMUTEX;
    }
}

impl Default for OpenFlags {
    #[inline]
    fn default() -> OpenFlags {
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
    }
}

/// Name of a database within a connection: the main database, the
/// temporary schema, or an `ATTACH`ed database.
#[derive(Debug, Clone, Copy)]
pub enum DatabaseName<'a> {
    Main,
    Temp,
    Attached(&'a str),
}

impl DatabaseName<'_> {
    pub(crate) fn as_cstring(&self) -> Result<CString> {
        let s = match self {
            DatabaseName::Main => "main",
            DatabaseName::Temp => "temp",
            DatabaseName::Attached(s) => s,
        };
        CString::new(s).map_err(|_| Error::Misuse("database name contains a NUL byte".into()))
    }
}

impl Default for DatabaseName<'_> {
    fn default() -> Self {
        DatabaseName::Main
    }
}

/// Connection-scoped options resolved by the [`Builder`].
#[derive(Debug, Clone, Default)]
pub(crate) struct ConnectOptions {
    pub int64: bool,
    pub enable_load_extension: bool,
    pub busy_timeout: Option<Duration>,
}

/// A builder for [`Database`].
///
/// The recognized option set is exhaustive: `flags` (raw override),
/// `readonly`, `create`, `memory`, `int64`, `unsafe_concurrency`,
/// `enable_load_extension` and `busy_timeout`. A raw `flags` value
/// bypasses all other open-mode processing.
pub struct Builder {
    path: String,
    flags: Option<OpenFlags>,
    readonly: bool,
    create: bool,
    memory: bool,
    int64: bool,
    unsafe_concurrency: bool,
    enable_load_extension: bool,
    busy_timeout: Option<Duration>,
}

impl Builder {
    /// Create a builder for a local database: a filesystem path, a
    /// `file:` URL, or the literal `":memory:"`.
    pub fn new_local(path: impl AsRef<str>) -> Builder {
        Builder {
            path: path.as_ref().to_string(),
            flags: None,
            readonly: false,
            create: true,
            memory: false,
            int64: false,
            unsafe_concurrency: false,
            enable_load_extension: false,
            busy_timeout: None,
        }
    }

    /// Pass raw [`OpenFlags`] through, bypassing every other open-mode
    /// option.
    pub fn flags(mut self, flags: OpenFlags) -> Builder {
        self.flags = Some(flags);
        self
    }

    /// Open the database read-only.
    pub fn readonly(mut self, readonly: bool) -> Builder {
        self.readonly = readonly;
        self
    }

    /// Create the database file if missing (default true; ignored when
    /// `readonly`).
    pub fn create(mut self, create: bool) -> Builder {
        self.create = create;
        self
    }

    /// Open an in-memory database regardless of path.
    pub fn memory(mut self, memory: bool) -> Builder {
        self.memory = memory;
        self
    }

    /// Preserve the full 64 bits of INTEGER columns by default on
    /// statements prepared through this database's connections.
    pub fn int64(mut self, int64: bool) -> Builder {
        self.int64 = int64;
        self
    }

    /// Skip the serialized-mutex protection on the handle. Only safe
    /// when the caller guarantees single-threaded use.
    pub fn unsafe_concurrency(mut self, unsafe_concurrency: bool) -> Builder {
        self.unsafe_concurrency = unsafe_concurrency;
        self
    }

    /// Permit [`Connection::load_extension`].
    pub fn enable_load_extension(mut self, enable: bool) -> Builder {
        self.enable_load_extension = enable;
        self
    }

    /// Busy handler timeout applied to every connection at open.
    pub fn busy_timeout(mut self, timeout: Duration) -> Builder {
        self.busy_timeout = Some(timeout);
        self
    }

    fn resolve_flags(&self) -> OpenFlags {
        if let Some(flags) = self.flags {
            return flags;
        }
        let mut flags = OpenFlags::empty();
        if self.memory {
            flags |= OpenFlags::SQLITE_OPEN_MEMORY;
        }
        if self.readonly {
            flags |= OpenFlags::SQLITE_OPEN_READ_ONLY;
        } else {
            flags |= OpenFlags::SQLITE_OPEN_READ_WRITE;
            if self.create {
                flags |= OpenFlags::SQLITE_OPEN_CREATE;
            }
        }
        if self.unsafe_concurrency {
            flags |= OpenFlags::SQLITE_OPEN_NO_MUTEX;
        }
        flags
    }

    /// Build the [`Database`].
    pub async fn build(self) -> Result<Database> {
        let path = normalize_path(&self.path)?;
        let flags = self.resolve_flags();
        let options = ConnectOptions {
            int64: self.int64,
            enable_load_extension: self.enable_load_extension,
            busy_timeout: self.busy_timeout,
        };
        let events = EventBus::default();
        let db = crate::local::Database::new(path, flags, options, events.clone())?;
        Ok(Database { db, events })
    }
}

/// `file:` URLs become local paths; `":memory:"` and plain paths pass
/// through untouched.
fn normalize_path(path: &str) -> Result<String> {
    if path == ":memory:" || !path.starts_with("file:") {
        return Ok(path.to_string());
    }
    let url = url::Url::parse(path)
        .map_err(|e| Error::ConnectionFailed(format!("invalid database URL `{path}`: {e}")))?;
    let fs_path = url
        .to_file_path()
        .map_err(|_| Error::ConnectionFailed(format!("`{path}` is not a local file URL")))?;
    fs_path
        .to_str()
        .map(str::to_string)
        .ok_or(Error::InvalidUTF8Path)
}

/// A struct that knows how to open [`Connection`]s, and the
/// subscription target for their lifecycle events.
pub struct Database {
    db: crate::local::Database,
    events: EventBus,
}

impl Database {
    /// Open a new connection to this database.
    pub fn connect(&self) -> Result<Connection> {
        let conn = self.db.connect()?;
        Ok(Connection {
            conn: Arc::new(LocalConnection { conn }),
        })
    }

    /// Subscribe to both lifecycle events.
    pub fn subscribe_events<F>(&self, listener: F)
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(Box::new(listener));
    }

    /// Subscribe to connection-opened notifications.
    pub fn on_connect<F>(&self, listener: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.events.subscribe(Box::new(move |event| {
            if let ConnectionEvent::Connect { path } = event {
                listener(path);
            }
        }));
    }

    /// Subscribe to connection-closed notifications.
    pub fn on_close<F>(&self, listener: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.events.subscribe(Box::new(move |event| {
            if let ConnectionEvent::Close { path } = event {
                listener(path);
            }
        }));
    }

    /// The resolved filesystem path (or `":memory:"`) this database
    /// opens.
    pub fn path(&self) -> &str {
        self.db.path()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.db.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags_for(build: impl FnOnce(Builder) -> Builder) -> OpenFlags {
        build(Builder::new_local(":memory:")).resolve_flags()
    }

    #[test]
    fn default_flags_are_read_write_create() {
        assert_eq!(flags_for(|b| b), OpenFlags::default());
    }

    #[test]
    fn readonly_suppresses_create() {
        let flags = flags_for(|b| b.readonly(true));
        assert!(flags.contains(OpenFlags::SQLITE_OPEN_READ_ONLY));
        assert!(!flags.contains(OpenFlags::SQLITE_OPEN_CREATE));
        assert!(!flags.contains(OpenFlags::SQLITE_OPEN_READ_WRITE));
    }

    #[test]
    fn create_false_drops_create_flag() {
        let flags = flags_for(|b| b.create(false));
        assert_eq!(flags, OpenFlags::SQLITE_OPEN_READ_WRITE);
    }

    #[test]
    fn memory_adds_memory_flag() {
        let flags = flags_for(|b| b.memory(true));
        assert!(flags.contains(OpenFlags::SQLITE_OPEN_MEMORY));
        assert!(flags.contains(OpenFlags::SQLITE_OPEN_READ_WRITE));
    }

    #[test]
    fn raw_flags_bypass_option_processing() {
        let flags = flags_for(|b| {
            b.readonly(true)
                .memory(true)
                .flags(OpenFlags::SQLITE_OPEN_READ_WRITE)
        });
        assert_eq!(flags, OpenFlags::SQLITE_OPEN_READ_WRITE);
    }

    #[test]
    fn file_urls_become_paths() {
        assert_eq!(
            normalize_path("file:///tmp/some.db").unwrap(),
            "/tmp/some.db"
        );
        assert_eq!(normalize_path(":memory:").unwrap(), ":memory:");
        assert_eq!(normalize_path("plain/path.db").unwrap(), "plain/path.db");
    }
}
