pub mod query;
pub mod update;

use anyhow::{anyhow, Result};
use crudstream::Value;

/// Interpret a command-line argument as a parameter value.
///
/// Integers and reals are recognised; `null` is NULL; anything else is text.
pub fn parse_value(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Ok(v) = raw.parse::<i64>() {
        return Value::Integer(v);
    }
    if let Ok(v) = raw.parse::<f64>() {
        return Value::Real(v);
    }
    Value::Text(raw.to_string())
}

/// Split a `name=value` argument.
pub fn parse_named(raw: &str) -> Result<(String, Value)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("named parameter must be name=value: {}", raw))?;
    Ok((name.trim().to_string(), parse_value(value)))
}
