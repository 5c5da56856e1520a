use std::str::FromStr;

use litesql_sys::ffi;

use crate::{Error, Result};

/// The largest integer magnitude that survives a round trip through an
/// IEEE-754 double (2^53 - 1). Integers beyond it are rejected at bind
/// time and demoted to `Real` at extraction time unless the statement
/// was prepared with the `int64` option.
pub const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;

/// An owned host value: the closed set accepted as parameters and
/// produced as column cells. Booleans enter this set as `Integer(0|1)`.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueType {
    Integer = 1,
    Real,
    Text,
    Blob,
    Null,
}

impl FromStr for ValueType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<ValueType, Self::Err> {
        match s {
            "TEXT" => Ok(ValueType::Text),
            "INTEGER" => Ok(ValueType::Integer),
            "BLOB" => Ok(ValueType::Blob),
            "NULL" => Ok(ValueType::Null),
            "REAL" => Ok(ValueType::Real),
            _ => Err(()),
        }
    }
}

impl TryFrom<i32> for ValueType {
    type Error = ();

    fn try_from(code: i32) -> std::result::Result<ValueType, ()> {
        match code {
            ffi::SQLITE_INTEGER => Ok(ValueType::Integer),
            ffi::SQLITE_FLOAT => Ok(ValueType::Real),
            ffi::SQLITE_TEXT => Ok(ValueType::Text),
            ffi::SQLITE_BLOB => Ok(ValueType::Blob),
            ffi::SQLITE_NULL => Ok(ValueType::Null),
            _ => Err(()),
        }
    }
}

impl Value {
    /// Returns `true` if the value is [`Null`].
    ///
    /// [`Null`]: Value::Null
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns `true` if the value is [`Integer`].
    ///
    /// [`Integer`]: Value::Integer
    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Integer(..))
    }

    pub fn as_integer(&self) -> Option<&i64> {
        if let Self::Integer(v) = self {
            Some(v)
        } else {
            None
        }
    }

    /// Returns `true` if the value is [`Real`].
    ///
    /// [`Real`]: Value::Real
    #[must_use]
    pub fn is_real(&self) -> bool {
        matches!(self, Self::Real(..))
    }

    pub fn as_real(&self) -> Option<&f64> {
        if let Self::Real(v) = self {
            Some(v)
        } else {
            None
        }
    }

    /// Returns `true` if the value is [`Text`].
    ///
    /// [`Text`]: Value::Text
    #[must_use]
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(..))
    }

    pub fn as_text(&self) -> Option<&String> {
        if let Self::Text(v) = self {
            Some(v)
        } else {
            None
        }
    }

    /// Returns `true` if the value is [`Blob`].
    ///
    /// [`Blob`]: Value::Blob
    #[must_use]
    pub fn is_blob(&self) -> bool {
        matches!(self, Self::Blob(..))
    }

    pub fn as_blob(&self) -> Option<&Vec<u8>> {
        if let Self::Blob(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Integer(_) => ValueType::Integer,
            Value::Real(_) => ValueType::Real,
            Value::Text(_) => ValueType::Text,
            Value::Blob(_) => ValueType::Blob,
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Value {
        Value::Integer(value as i64)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Value {
        Value::Integer(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Value {
        Value::Integer(value as i64)
    }
}

impl TryFrom<u64> for Value {
    type Error = crate::Error;

    fn try_from(value: u64) -> Result<Value> {
        if value > i64::MAX as u64 {
            Err(Error::ToSqlConversionFailure(
                "u64 is too large to fit in an i64".into(),
            ))
        } else {
            Ok(Value::Integer(value as i64))
        }
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Value {
        Value::Real(value as f64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Value {
        Value::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Value {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Value {
        Value::Text(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Value {
        Value::Blob(value.to_owned())
    }
}

impl<const N: usize> From<[u8; N]> for Value {
    fn from(value: [u8; N]) -> Value {
        Value::Blob(value.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Value {
        Value::Blob(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Value {
        Value::Integer(value as i64)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

/// Read a native value slot into an owned [`Value`].
///
/// With `int64` off, INTEGER cells beyond [`MAX_SAFE_INTEGER`] come back
/// as `Real` with the precision loss that implies; with `int64` on the
/// full 64 bits are preserved.
///
/// # Safety
///
/// `raw` must point at a protected value slot that stays valid for the
/// duration of the call: a column of the row the cursor currently sits
/// on, or a function argument during its invocation.
pub(crate) unsafe fn read_value(raw: *mut ffi::sqlite3_value, int64: bool) -> Value {
    let type_code = unsafe { ffi::sqlite3_value_type(raw) };
    match type_code {
        ffi::SQLITE_NULL => Value::Null,
        ffi::SQLITE_INTEGER => {
            let v = unsafe { ffi::sqlite3_value_int64(raw) };
            if !int64 && v.unsigned_abs() > MAX_SAFE_INTEGER as u64 {
                Value::Real(v as f64)
            } else {
                Value::Integer(v)
            }
        }
        ffi::SQLITE_FLOAT => Value::Real(unsafe { ffi::sqlite3_value_double(raw) }),
        ffi::SQLITE_TEXT => {
            // Take the pointer before the byte count; the reverse order
            // is unspecified for cells sqlite had to convert.
            let ptr = unsafe { ffi::sqlite3_value_text(raw) };
            let len = unsafe { ffi::sqlite3_value_bytes(raw) };
            if ptr.is_null() {
                Value::Null
            } else {
                let bytes = unsafe { std::slice::from_raw_parts(ptr, len as usize) };
                Value::Text(String::from_utf8_lossy(bytes).into_owned())
            }
        }
        ffi::SQLITE_BLOB => {
            let ptr = unsafe { ffi::sqlite3_value_blob(raw) };
            let len = unsafe { ffi::sqlite3_value_bytes(raw) };
            assert!(len >= 0, "unexpected negative bytes value from sqlite3");
            if ptr.is_null() || len == 0 {
                // Zero-length blobs hand back a NULL pointer.
                Value::Blob(Vec::new())
            } else {
                let bytes =
                    unsafe { std::slice::from_raw_parts(ptr as *const u8, len as usize) };
                Value::Blob(bytes.to_vec())
            }
        }
        other => unreachable!("sqlite reported unknown value type {other}"),
    }
}

/// A borrowed view of a host value, used on the bind path to avoid
/// copying text and blob payloads into the driver before SQLite copies
/// them again.
pub enum ValueRef<'a> {
    Null,
    Integer(i64),
    Real(f64),
    Text(&'a [u8]),
    Blob(&'a [u8]),
}

impl ValueRef<'_> {
    pub fn data_type(&self) -> ValueType {
        match *self {
            ValueRef::Null => ValueType::Null,
            ValueRef::Integer(_) => ValueType::Integer,
            ValueRef::Real(_) => ValueType::Real,
            ValueRef::Text(_) => ValueType::Text,
            ValueRef::Blob(_) => ValueType::Blob,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_integer(&self) -> Option<&i64> {
        if let Self::Integer(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_real(&self) -> Option<&f64> {
        if let Self::Real(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_text(&self) -> Option<&[u8]> {
        if let Self::Text(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        if let Self::Blob(v) = self {
            Some(v)
        } else {
            None
        }
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(vr: ValueRef<'_>) -> Value {
        match vr {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(s) => Value::Text(String::from_utf8_lossy(s).to_string()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

impl<'a> From<&'a str> for ValueRef<'a> {
    fn from(s: &str) -> ValueRef<'_> {
        ValueRef::Text(s.as_bytes())
    }
}

impl<'a> From<&'a [u8]> for ValueRef<'a> {
    fn from(s: &[u8]) -> ValueRef<'_> {
        ValueRef::Blob(s)
    }
}

impl<'a> From<&'a Value> for ValueRef<'a> {
    fn from(v: &'a Value) -> ValueRef<'a> {
        match *v {
            Value::Null => ValueRef::Null,
            Value::Integer(i) => ValueRef::Integer(i),
            Value::Real(r) => ValueRef::Real(r),
            Value::Text(ref s) => ValueRef::Text(s.as_bytes()),
            Value::Blob(ref b) => ValueRef::Blob(b),
        }
    }
}

impl<'a, T> From<Option<T>> for ValueRef<'a>
where
    T: Into<ValueRef<'a>>,
{
    #[inline]
    fn from(s: Option<T>) -> ValueRef<'a> {
        match s {
            Some(x) => x.into(),
            None => ValueRef::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_marshals_to_integer() {
        assert_eq!(Value::from(true), Value::Integer(1));
        assert_eq!(Value::from(false), Value::Integer(0));
    }

    #[test]
    fn option_marshals_to_null() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(7i64)), Value::Integer(7));
    }

    #[test]
    fn u64_beyond_i64_is_rejected() {
        assert!(Value::try_from(u64::MAX).is_err());
        assert_eq!(Value::try_from(42u64).unwrap(), Value::Integer(42));
    }
}
