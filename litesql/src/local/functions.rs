//! User-defined scalar and aggregate SQL functions.

use std::ffi::{c_int, c_void, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};

use litesql_sys::ffi;

use crate::local::connection::RegisteredFunction;
use crate::value::read_value;
use crate::{errors, Error, Result, Value};

use super::Connection;

bitflags::bitflags! {
    /// Behavior flags attached to a function registration.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct FunctionFlags: c_int {
        /// The function always returns the same result for the same
        /// inputs within one statement.
        const DETERMINISTIC = ffi::SQLITE_DETERMINISTIC;
        /// The function may only be invoked from top-level SQL, not
        /// from views, triggers or schema structures.
        const DIRECT_ONLY = ffi::SQLITE_DIRECTONLY;
        /// The function may call `sqlite3_result_subtype`.
        const SUBTYPE = ffi::SQLITE_SUBTYPE;
        /// The function is unlikely to cause problems even if misused.
        const INNOCUOUS = ffi::SQLITE_INNOCUOUS;
    }
}

/// A host callback implementing a scalar SQL function.
pub type ScalarFunction = Box<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// A host implementation of an aggregate SQL function.
///
/// State is per invocation: `init` seeds the accumulator when the first
/// row arrives, `step` folds each row into it, and `finish` produces
/// the result and gives the state up. An aggregate over zero rows calls
/// `finish` on a fresh `init` value.
pub trait Aggregate: Send + Sync {
    fn init(&self) -> Value;

    fn step(&self, acc: Value, args: &[Value]) -> Result<Value>;

    fn finish(&self, acc: Value) -> Result<Value> {
        Ok(acc)
    }
}

struct ScalarData {
    f: ScalarFunction,
}

struct AggregateData {
    agg: Box<dyn Aggregate>,
}

impl Connection {
    /// Create or redefine a scalar SQL function.
    ///
    /// `n_args` of `None` registers a variadic function. The callback's
    /// error message reaches the SQL evaluator through
    /// `sqlite3_result_error`.
    pub fn create_scalar_function(
        &self,
        name: &str,
        n_args: Option<usize>,
        flags: FunctionFlags,
        f: ScalarFunction,
    ) -> Result<()> {
        self.check_open()?;
        let n_arg = n_args.map(|n| n as c_int).unwrap_or(-1);
        let c_name = function_name(name)?;
        let data = Box::new(ScalarData { f });
        let rc = unsafe {
            ffi::sqlite3_create_function_v2(
                self.raw,
                c_name.as_ptr(),
                n_arg,
                ffi::SQLITE_UTF8 | flags.bits(),
                Box::into_raw(data) as *mut c_void,
                Some(scalar_trampoline),
                None,
                None,
                Some(drop_scalar_data),
            )
        };
        if rc != ffi::SQLITE_OK {
            // SQLite invokes the destructor on failure, so `data` is
            // already released here.
            return Err(errors::last_error(self.raw));
        }
        self.funcs.lock().push(RegisteredFunction {
            name: name.to_string(),
            n_arg,
        });
        Ok(())
    }

    /// Create or redefine an aggregate SQL function.
    pub fn create_aggregate_function(
        &self,
        name: &str,
        n_args: Option<usize>,
        flags: FunctionFlags,
        agg: Box<dyn Aggregate>,
    ) -> Result<()> {
        self.check_open()?;
        let n_arg = n_args.map(|n| n as c_int).unwrap_or(-1);
        let c_name = function_name(name)?;
        let data = Box::new(AggregateData { agg });
        let rc = unsafe {
            ffi::sqlite3_create_function_v2(
                self.raw,
                c_name.as_ptr(),
                n_arg,
                ffi::SQLITE_UTF8 | flags.bits(),
                Box::into_raw(data) as *mut c_void,
                None,
                Some(aggregate_step_trampoline),
                Some(aggregate_final_trampoline),
                Some(drop_aggregate_data),
            )
        };
        if rc != ffi::SQLITE_OK {
            return Err(errors::last_error(self.raw));
        }
        self.funcs.lock().push(RegisteredFunction {
            name: name.to_string(),
            n_arg,
        });
        Ok(())
    }
}

fn function_name(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| Error::Misuse("function name contains a NUL byte".into()))
}

/// Delete a previously registered function. Dropping the registration
/// triggers the destructor SQLite holds on the callback data.
pub(crate) fn unregister_function(
    raw: *mut ffi::sqlite3,
    name: &str,
    n_arg: c_int,
) -> Result<()> {
    let c_name = function_name(name)?;
    let rc = unsafe {
        ffi::sqlite3_create_function_v2(
            raw,
            c_name.as_ptr(),
            n_arg,
            ffi::SQLITE_UTF8,
            std::ptr::null_mut(),
            None,
            None,
            None,
            None,
        )
    };
    match rc {
        ffi::SQLITE_OK => Ok(()),
        _ => Err(errors::sqlite_error(rc, errors::error_from_code(rc))),
    }
}

unsafe fn collect_args(argc: c_int, argv: *mut *mut ffi::sqlite3_value) -> Vec<Value> {
    let mut args = Vec::with_capacity(argc as usize);
    for i in 0..argc {
        let raw = unsafe { *argv.offset(i as isize) };
        args.push(unsafe { read_value(raw, true) });
    }
    args
}

unsafe fn set_result(ctx: *mut ffi::sqlite3_context, value: &Value) {
    match value {
        Value::Null => unsafe { ffi::sqlite3_result_null(ctx) },
        Value::Integer(i) => unsafe { ffi::sqlite3_result_int64(ctx, *i) },
        Value::Real(f) => unsafe { ffi::sqlite3_result_double(ctx, *f) },
        Value::Text(s) => {
            if s.len() > c_int::MAX as usize {
                unsafe { ffi::sqlite3_result_error_toobig(ctx) };
                return;
            }
            unsafe {
                ffi::sqlite3_result_text(
                    ctx,
                    s.as_ptr() as *const std::ffi::c_char,
                    s.len() as c_int,
                    ffi::SQLITE_TRANSIENT(),
                )
            }
        }
        Value::Blob(b) => {
            if b.len() > c_int::MAX as usize {
                unsafe { ffi::sqlite3_result_error_toobig(ctx) };
                return;
            }
            let ptr = if b.is_empty() {
                // A zero-length blob still needs a non-NULL pointer.
                b"".as_ptr()
            } else {
                b.as_ptr()
            };
            unsafe {
                ffi::sqlite3_result_blob(
                    ctx,
                    ptr as *const c_void,
                    b.len() as c_int,
                    ffi::SQLITE_TRANSIENT(),
                )
            }
        }
    }
}

unsafe fn report_error(ctx: *mut ffi::sqlite3_context, message: &str) {
    unsafe {
        ffi::sqlite3_result_error(
            ctx,
            message.as_ptr() as *const std::ffi::c_char,
            message.len() as c_int,
        )
    };
}

unsafe extern "C" fn scalar_trampoline(
    ctx: *mut ffi::sqlite3_context,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) {
    let data = unsafe { &*(ffi::sqlite3_user_data(ctx) as *const ScalarData) };
    let args = unsafe { collect_args(argc, argv) };
    match catch_unwind(AssertUnwindSafe(|| (data.f)(&args))) {
        Ok(Ok(value)) => unsafe { set_result(ctx, &value) },
        Ok(Err(err)) => unsafe { report_error(ctx, &err.to_string()) },
        Err(_) => unsafe { report_error(ctx, "user-defined function panicked") },
    }
}

unsafe extern "C" fn drop_scalar_data(data: *mut c_void) {
    drop(unsafe { Box::from_raw(data as *mut ScalarData) });
}

unsafe extern "C" fn aggregate_step_trampoline(
    ctx: *mut ffi::sqlite3_context,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) {
    let data = unsafe { &*(ffi::sqlite3_user_data(ctx) as *const AggregateData) };
    let pcx = unsafe {
        ffi::sqlite3_aggregate_context(ctx, std::mem::size_of::<*mut Value>() as c_int)
    } as *mut *mut Value;
    if pcx.is_null() {
        unsafe { ffi::sqlite3_result_error_code(ctx, ffi::SQLITE_NOMEM) };
        return;
    }
    let acc = if unsafe { (*pcx).is_null() } {
        data.agg.init()
    } else {
        let boxed = unsafe { Box::from_raw(*pcx) };
        unsafe { *pcx = std::ptr::null_mut() };
        *boxed
    };
    let args = unsafe { collect_args(argc, argv) };
    match catch_unwind(AssertUnwindSafe(|| data.agg.step(acc, &args))) {
        Ok(Ok(next)) => unsafe { *pcx = Box::into_raw(Box::new(next)) },
        Ok(Err(err)) => unsafe { report_error(ctx, &err.to_string()) },
        Err(_) => unsafe { report_error(ctx, "user-defined aggregate panicked") },
    }
}

unsafe extern "C" fn aggregate_final_trampoline(ctx: *mut ffi::sqlite3_context) {
    let data = unsafe { &*(ffi::sqlite3_user_data(ctx) as *const AggregateData) };
    // Passing 0 returns the existing context or NULL when no row ever
    // reached the step callback.
    let pcx = unsafe { ffi::sqlite3_aggregate_context(ctx, 0) } as *mut *mut Value;
    let acc = if pcx.is_null() || unsafe { (*pcx).is_null() } {
        data.agg.init()
    } else {
        let boxed = unsafe { Box::from_raw(*pcx) };
        unsafe { *pcx = std::ptr::null_mut() };
        *boxed
    };
    match catch_unwind(AssertUnwindSafe(|| data.agg.finish(acc))) {
        Ok(Ok(value)) => unsafe { set_result(ctx, &value) },
        Ok(Err(err)) => unsafe { report_error(ctx, &err.to_string()) },
        Err(_) => unsafe { report_error(ctx, "user-defined aggregate panicked") },
    }
}

unsafe extern "C" fn drop_aggregate_data(data: *mut c_void) {
    drop(unsafe { Box::from_raw(data as *mut AggregateData) });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{ConnectOptions, OpenFlags};
    use crate::events::EventBus;
    use crate::local::Database;
    use crate::params::Params;

    fn setup() -> super::Connection {
        let db = Database::new(
            ":memory:".to_string(),
            OpenFlags::default(),
            ConnectOptions::default(),
            EventBus::default(),
        )
        .unwrap();
        db.connect().unwrap()
    }

    fn query_single(conn: &super::Connection, sql: &str) -> Result<Value> {
        let stmt = conn.prepare(sql)?;
        let row = stmt.query_row(&Params::None)?;
        row.get_value(0)
    }

    #[test]
    fn scalar_function_add() {
        let conn = setup();
        conn.create_scalar_function(
            "add",
            Some(2),
            FunctionFlags::DETERMINISTIC,
            Box::new(|args| {
                let a = args[0].as_integer().copied().unwrap_or(0);
                let b = args[1].as_integer().copied().unwrap_or(0);
                Ok(Value::Integer(a + b))
            }),
        )
        .unwrap();

        assert_eq!(
            query_single(&conn, "SELECT add(1, 2)").unwrap(),
            Value::Integer(3)
        );
    }

    #[test]
    fn scalar_function_error_reaches_sql() {
        let conn = setup();
        conn.create_scalar_function(
            "always_fails",
            Some(0),
            FunctionFlags::empty(),
            Box::new(|_| Err(Error::Misuse("nope".into()))),
        )
        .unwrap();

        let err = query_single(&conn, "SELECT always_fails()").unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    struct Summer;

    impl Aggregate for Summer {
        fn init(&self) -> Value {
            Value::Integer(0)
        }

        fn step(&self, acc: Value, args: &[Value]) -> Result<Value> {
            let acc = acc.as_integer().copied().unwrap_or(0);
            let x = args[0].as_integer().copied().unwrap_or(0);
            Ok(Value::Integer(acc + x))
        }
    }

    #[test]
    fn aggregate_sums_rows() {
        let conn = setup();
        conn.execute("CREATE TABLE nums (n INTEGER)", ()).unwrap();
        for n in [1i64, 2, 3, 4] {
            conn.execute("INSERT INTO nums VALUES (?1)", [n]).unwrap();
        }
        conn.create_aggregate_function(
            "mysum",
            Some(1),
            FunctionFlags::DETERMINISTIC,
            Box::new(Summer),
        )
        .unwrap();

        assert_eq!(
            query_single(&conn, "SELECT mysum(n) FROM nums").unwrap(),
            Value::Integer(10)
        );
    }

    #[test]
    fn aggregate_over_no_rows_finishes_on_init() {
        let conn = setup();
        conn.execute("CREATE TABLE empty_t (n INTEGER)", ()).unwrap();
        conn.create_aggregate_function(
            "mysum",
            Some(1),
            FunctionFlags::empty(),
            Box::new(Summer),
        )
        .unwrap();

        assert_eq!(
            query_single(&conn, "SELECT mysum(n) FROM empty_t").unwrap(),
            Value::Integer(0)
        );
    }

    #[test]
    fn varargs_function_sees_every_argument() {
        let conn = setup();
        conn.create_scalar_function(
            "argc",
            None,
            FunctionFlags::empty(),
            Box::new(|args| Ok(Value::Integer(args.len() as i64))),
        )
        .unwrap();

        assert_eq!(
            query_single(&conn, "SELECT argc(1, 'a', x'00', NULL)").unwrap(),
            Value::Integer(4)
        );
    }
}
