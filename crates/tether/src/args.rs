//! Argument checking for `RemoteObject::invoke` implementations.

use crate::object::InvokeError;
use crate::object::ObjectRef;
use crate::value::Record;
use crate::value::Value;

pub fn expect_len(args: &[Value], n: usize) -> Result<(), InvokeError> {
    if args.len() == n {
        Ok(())
    } else {
        Err(InvokeError::bad_arguments(format!("expected {} argument(s), got {}", n, args.len())))
    }
}

pub fn arg(args: &[Value], i: usize) -> Result<&Value, InvokeError> {
    args.get(i)
        .ok_or_else(|| InvokeError::bad_arguments(format!("missing argument {}", i)))
}

fn mismatch(i: usize, wanted: &str, found: &Value) -> InvokeError {
    InvokeError::bad_arguments(format!("argument {}: expected {}, got {}", i, wanted, found.type_name()))
}

pub fn expect_int(args: &[Value], i: usize) -> Result<i64, InvokeError> {
    let v = arg(args, i)?;
    v.as_int().ok_or_else(|| mismatch(i, "int", v))
}

pub fn expect_bool(args: &[Value], i: usize) -> Result<bool, InvokeError> {
    let v = arg(args, i)?;
    v.as_bool().ok_or_else(|| mismatch(i, "bool", v))
}

pub fn expect_text(args: &[Value], i: usize) -> Result<&str, InvokeError> {
    let v = arg(args, i)?;
    v.as_text().ok_or_else(|| mismatch(i, "text", v))
}

pub fn expect_list(args: &[Value], i: usize) -> Result<&[Value], InvokeError> {
    let v = arg(args, i)?;
    v.as_list().ok_or_else(|| mismatch(i, "list", v))
}

pub fn expect_record(args: &[Value], i: usize) -> Result<&Record, InvokeError> {
    let v = arg(args, i)?;
    v.as_record().ok_or_else(|| mismatch(i, "record", v))
}

pub fn expect_object(args: &[Value], i: usize) -> Result<&ObjectRef, InvokeError> {
    let v = arg(args, i)?;
    v.as_object().ok_or_else(|| mismatch(i, "object", v))
}
