use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::Deserialize;

/// The runtime value every configuration element evaluates to.
///
/// `Unknown` stands for a value that cannot be determined yet, either because
/// it will only exist after apply or because its computation failed and the
/// failure was reported as a diagnostic. Every operation touching an unknown
/// value yields an unknown value rather than an error.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(from = "serde_json::Value")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Unknown,
}

impl Value {
    pub fn string(value: impl Into<String>) -> Self {
        Value::String(value.into())
    }

    pub fn number(value: impl Into<f64>) -> Self {
        Value::Number(value.into())
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(items.into_iter().collect())
    }

    pub fn object<K>(fields: impl IntoIterator<Item = (K, Value)>) -> Self
    where
        K: Into<String>,
    {
        Value::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Whether the value itself is known. A list or object is known even if
    /// some of its elements are not.
    pub fn is_known(&self) -> bool {
        !matches!(self, Value::Unknown)
    }

    /// Whether the value and everything nested inside it is known.
    pub fn is_wholly_known(&self) -> bool {
        match self {
            Value::Unknown => false,
            Value::List(items) => items.iter().all(Value::is_wholly_known),
            Value::Object(fields) => fields.values().all(Value::is_wholly_known),
            _ => true,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Object(_) => "object",
            Value::Unknown => "unknown",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(fields) => Some(fields),
            _ => None,
        }
    }

    /// Unknown-aware equality: the result is unknown whenever either side is
    /// not wholly known.
    pub fn equals(&self, other: &Value) -> Value {
        if !self.is_wholly_known() || !other.is_wholly_known() {
            return Value::Unknown;
        }
        Value::Bool(self == other)
    }

    /// Converts a primitive to the string used when interpolating it into a
    /// template. Collections and null cannot be interpolated.
    pub fn to_template_string(&self) -> Result<Option<String>, String> {
        match self {
            Value::Unknown => Ok(None),
            Value::String(s) => Ok(Some(s.clone())),
            Value::Number(n) => Ok(Some(format_number(*n))),
            Value::Bool(b) => Ok(Some(b.to_string())),
            Value::Null => Err("Cannot include a null value in a string template.".into()),
            other => Err(format!(
                "Cannot include the given value in a string template: string required, but have {}.",
                other.type_name()
            )),
        }
    }

    /// Converts the value into JSON. Returns `None` if it is not wholly known.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        use serde_json::Value as Json;

        Some(match self {
            Value::Unknown => return None,
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    Json::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n).map_or(Json::Null, Json::Number)
                }
            }
            Value::String(s) => Json::String(s.clone()),
            Value::List(items) => {
                Json::Array(items.iter().map(Value::to_json).collect::<Option<_>>()?)
            }
            Value::Object(fields) => Json::Object(
                fields
                    .iter()
                    .map(|(k, v)| v.to_json().map(|v| (k.clone(), v)))
                    .collect::<Option<_>>()?,
            ),
        })
    }
}

pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match value {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Json::Object(fields) => {
                Value::Object(fields.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(value.into())
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::String(s) => write!(f, "{s:?}"),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Object(fields) => {
                f.write_str("{")?;
                for (i, (key, item)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, " {key} = {item}")?;
                }
                if !fields.is_empty() {
                    f.write_str(" ")?;
                }
                f.write_str("}")
            }
            Value::Unknown => f.write_str("(known after apply)"),
        }
    }
}

/// A type constraint declared on an input variable or output value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeConstraint {
    Any,
    String,
    Number,
    Bool,
    List,
    Object,
}

impl TypeConstraint {
    /// Converts `value` to this type, following the usual primitive
    /// conversions: numbers and bools convert to strings and back. Unknown and
    /// null values pass through unchanged.
    pub fn convert(self, value: Value) -> Result<Value, String> {
        match (self, value) {
            (_, Value::Unknown) => Ok(Value::Unknown),
            (_, Value::Null) => Ok(Value::Null),
            (TypeConstraint::Any, value) => Ok(value),

            (TypeConstraint::String, value @ Value::String(_)) => Ok(value),
            (TypeConstraint::String, Value::Number(n)) => Ok(Value::String(format_number(n))),
            (TypeConstraint::String, Value::Bool(b)) => Ok(Value::String(b.to_string())),

            (TypeConstraint::Number, value @ Value::Number(_)) => Ok(value),
            (TypeConstraint::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| format!("a number is required, but {s:?} is not a valid number")),

            (TypeConstraint::Bool, value @ Value::Bool(_)) => Ok(value),
            (TypeConstraint::Bool, Value::String(s)) => match s.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(format!("a bool is required, but {s:?} is not a valid bool")),
            },

            (TypeConstraint::List, value @ Value::List(_)) => Ok(value),
            (TypeConstraint::Object, value @ Value::Object(_)) => Ok(value),

            (ty, value) => Err(format!("{ty} required, but have {}", value.type_name())),
        }
    }
}

impl Display for TypeConstraint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TypeConstraint::Any => "any",
            TypeConstraint::String => "string",
            TypeConstraint::Number => "number",
            TypeConstraint::Bool => "bool",
            TypeConstraint::List => "list",
            TypeConstraint::Object => "object",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wholly_known() {
        let partial = Value::object([("name", Value::string("x")), ("id", Value::Unknown)]);

        assert!(partial.is_known());
        assert!(!partial.is_wholly_known());
        assert!(Value::list([Value::from(1), Value::from(true)]).is_wholly_known());
    }

    #[test]
    fn test_equals_unknown() {
        assert_eq!(Value::from(1).equals(&Value::from(1)), Value::Bool(true));
        assert_eq!(Value::from(1).equals(&Value::Unknown), Value::Unknown);
    }

    #[test]
    fn test_display() {
        let value = Value::object([
            ("name", Value::string("jackson")),
            ("age", Value::from(30)),
            ("tags", Value::list([Value::Bool(true), Value::Null])),
        ]);

        assert_eq!(
            value.to_string(),
            r#"{ age = 30, name = "jackson", tags = [true, null] }"#
        );
        assert_eq!(Value::Number(1.5).to_string(), "1.5");
    }

    #[test]
    fn test_from_json() {
        let value: Value = serde_json::from_str(r#"{"a": [1, "b", null], "c": false}"#).unwrap();

        assert_eq!(
            value,
            Value::object([
                ("a", Value::list([Value::from(1), Value::from("b"), Value::Null])),
                ("c", Value::Bool(false)),
            ])
        );
        assert_eq!(
            value.to_json().unwrap(),
            serde_json::json!({"a": [1, "b", null], "c": false})
        );
        assert!(Value::list([Value::Unknown]).to_json().is_none());
    }

    #[test]
    fn test_template_string() {
        assert_eq!(Value::from(30).to_template_string(), Ok(Some("30".into())));
        assert_eq!(Value::Unknown.to_template_string(), Ok(None));
        assert!(Value::list([]).to_template_string().is_err());
    }

    #[test]
    fn test_type_conversion() {
        assert_eq!(
            TypeConstraint::String.convert(Value::from(30)),
            Ok(Value::string("30"))
        );
        assert_eq!(
            TypeConstraint::Number.convert(Value::string("4.5")),
            Ok(Value::Number(4.5))
        );
        assert_eq!(
            TypeConstraint::Bool.convert(Value::Unknown),
            Ok(Value::Unknown)
        );
        assert!(TypeConstraint::Number.convert(Value::string("many")).is_err());
        assert!(TypeConstraint::String.convert(Value::list([])).is_err());
    }
}
