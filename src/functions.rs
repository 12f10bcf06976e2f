//! Built-in functions callable from expressions.

use std::collections::BTreeMap;

use crate::expr::EvalError;
use crate::value::{TypeConstraint, Value, format_number};

/// Accepted argument counts: minimum, and maximum if bounded.
fn arity(name: &str) -> Option<(usize, Option<usize>)> {
    Some(match name {
        "format" => (1, None),
        "upper" | "lower" | "length" | "tostring" | "tonumber" | "keys" | "jsonencode" => {
            (1, Some(1))
        }
        "join" => (2, Some(2)),
        "lookup" => (2, Some(3)),
        "concat" | "coalesce" | "merge" => (0, None),
        _ => return None,
    })
}

/// Calls the built-in function `name`.
///
/// If any argument is not wholly known the result is unknown, once the
/// argument count has been checked.
pub fn call(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    let Some((min, max)) = arity(name) else {
        return Err(EvalError::new(
            "Call to unknown function",
            format!("There is no function named {name:?}."),
        ));
    };

    if args.len() < min || max.is_some_and(|max| args.len() > max) {
        let expected = match max {
            Some(max) if max == min => format!("{min}"),
            Some(max) => format!("{min} to {max}"),
            None => format!("at least {min}"),
        };
        return Err(EvalError::new(
            "Wrong number of arguments",
            format!("Function {name:?} expects {expected} argument(s), but got {}.", args.len()),
        ));
    }

    if !args.iter().all(Value::is_wholly_known) {
        return Ok(Value::Unknown);
    }

    let result = match name {
        "format" => format(&args),
        "upper" => string_arg(name, &args[0]).map(|s| Value::String(s.to_uppercase())),
        "lower" => string_arg(name, &args[0]).map(|s| Value::String(s.to_lowercase())),
        "length" => length(&args[0]),
        "join" => join(&args[0], &args[1]),
        "concat" => concat(args),
        "tostring" => TypeConstraint::String.convert(args[0].clone()),
        "tonumber" => TypeConstraint::Number.convert(args[0].clone()),
        "coalesce" => args
            .into_iter()
            .find(|arg| !arg.is_null() && arg.as_str() != Some(""))
            .ok_or_else(|| "no non-null, non-empty-string arguments".to_string()),
        "merge" => merge(args),
        "keys" => match &args[0] {
            Value::Object(fields) => Ok(Value::list(fields.keys().map(Value::string))),
            other => Err(format!("an object is required, but have {}", other.type_name())),
        },
        "lookup" => lookup(args),
        "jsonencode" => args[0]
            .to_json()
            .map(|json| Value::String(json.to_string()))
            .ok_or_else(|| "value is not wholly known".to_string()),
        _ => Err(format!("function {name:?} is not implemented")),
    };

    result.map_err(|detail| {
        EvalError::new(
            "Error in function call",
            format!("Call to function {name:?} failed: {detail}."),
        )
    })
}

fn string_arg<'a>(name: &str, value: &'a Value) -> Result<&'a str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("{name} requires a string, but have {}", value.type_name()))
}

fn format(args: &[Value]) -> Result<Value, String> {
    let pattern = string_arg("format", &args[0])?;
    let mut rest = args[1..].iter();
    let mut acc = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            acc.push(c);
            continue;
        }

        let verb = chars.next().ok_or("unterminated format verb at end of string")?;
        if verb == '%' {
            acc.push('%');
            continue;
        }

        let arg = rest
            .next()
            .ok_or_else(|| format!("not enough arguments for %{verb}"))?;

        match (verb, arg) {
            ('d', Value::Number(n)) if n.fract() == 0.0 => acc.push_str(&format_number(*n)),
            ('d', other) => return Err(format!("%d requires a whole number, but have {other}")),
            ('s', other) => match other.to_template_string() {
                Ok(Some(s)) => acc.push_str(&s),
                _ => return Err(format!("%s requires a primitive value, but have {}", other.type_name())),
            },
            ('v', Value::String(s)) => acc.push_str(s),
            ('v', other) => acc.push_str(&other.to_string()),
            (verb, _) => return Err(format!("unsupported format verb %{verb}")),
        }
    }

    if rest.next().is_some() {
        return Err("too many arguments for the format string".into());
    }

    Ok(Value::String(acc))
}

fn length(value: &Value) -> Result<Value, String> {
    let len = match value {
        Value::String(s) => s.chars().count(),
        Value::List(items) => items.len(),
        Value::Object(fields) => fields.len(),
        other => return Err(format!("cannot take the length of {}", other.type_name())),
    };
    Ok(Value::Number(len as f64))
}

fn join(separator: &Value, list: &Value) -> Result<Value, String> {
    let separator = string_arg("join", separator)?;
    let Value::List(items) = list else {
        return Err(format!("join requires a list, but have {}", list.type_name()));
    };

    let parts = items
        .iter()
        .map(|item| match item.to_template_string() {
            Ok(Some(s)) => Ok(s),
            _ => Err(format!("cannot join a {} element", item.type_name())),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Value::String(parts.join(separator)))
}

fn concat(args: Vec<Value>) -> Result<Value, String> {
    let mut acc = Vec::new();
    for arg in args {
        match arg {
            Value::List(items) => acc.extend(items),
            other => return Err(format!("all arguments must be lists, but have {}", other.type_name())),
        }
    }
    Ok(Value::List(acc))
}

fn merge(args: Vec<Value>) -> Result<Value, String> {
    let mut acc = BTreeMap::new();
    for arg in args {
        match arg {
            Value::Null => {}
            Value::Object(fields) => acc.extend(fields),
            other => return Err(format!("all arguments must be objects, but have {}", other.type_name())),
        }
    }
    Ok(Value::Object(acc))
}

fn lookup(mut args: Vec<Value>) -> Result<Value, String> {
    let default = if args.len() == 3 { args.pop() } else { None };
    let key = args.pop().unwrap_or_default();
    let source = args.pop().unwrap_or_default();

    let (Value::Object(mut fields), Value::String(key)) = (source, key) else {
        return Err("lookup requires an object and a string key".into());
    };

    fields
        .remove(&key)
        .or(default)
        .ok_or_else(|| format!("the given key {key:?} does not exist"))
}
