//! Built-in callables, resolved only when an identifier has no environment
//! binding.

use std::sync::Arc;

use crate::value::Value;
use crate::vm::RuntimeError;

pub(crate) fn lookup(name: &str) -> Option<Value> {
    match name {
        "len" => Some(Value::func(builtin_len)),
        "lower" => Some(Value::func(builtin_lower)),
        "upper" => Some(Value::func(builtin_upper)),
        _ => None,
    }
}

fn builtin_len(args: &[Value]) -> Result<Value, RuntimeError> {
    expect_args("len", args, 1)?;

    let len = match &args[0] {
        Value::Null => 0,
        Value::Str(s) => s.len(),
        Value::Array(items) => items.len(),
        Value::Map(map) => map.len(),
        other => {
            return Err(RuntimeError::new(format!(
                "len: invalid argument: {}",
                other.type_name()
            )));
        }
    };

    Ok(Value::Int(len as i64))
}

fn builtin_lower(args: &[Value]) -> Result<Value, RuntimeError> {
    expect_args("lower", args, 1)?;

    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::Str(s) => Ok(Value::Str(Arc::from(s.to_ascii_lowercase().as_str()))),
        other => Err(RuntimeError::new(format!(
            "lower: invalid argument: {}, expected string",
            other.type_name()
        ))),
    }
}

fn builtin_upper(args: &[Value]) -> Result<Value, RuntimeError> {
    expect_args("upper", args, 1)?;

    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::Str(s) => Ok(Value::Str(Arc::from(s.to_ascii_uppercase().as_str()))),
        other => Err(RuntimeError::new(format!(
            "upper: invalid argument: {}, expected string",
            other.type_name()
        ))),
    }
}

fn expect_args(name: &str, args: &[Value], expected: usize) -> Result<(), RuntimeError> {
    if args.len() != expected {
        return Err(RuntimeError::new(format!(
            "{name}: wrong number of arguments: {}, expected {expected}",
            args.len()
        )));
    }
    Ok(())
}
